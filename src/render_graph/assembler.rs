//! Builds a render graph from one configuration snapshot.

use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::device::{Device, SurfaceKind};
use crate::error::{ConfigResult, ConfigurationError};
use crate::images::ImageCache;
use crate::render_graph::{
    Filter, FilterPass, NodeId, PreviewGridNode, RenderGraph, RenderNode, ScreenCompositeNode,
    Sizing, Slot,
};

/// Handles to the nodes an assembled pipeline is made of.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineNodes {
    pub scene_capture: NodeId,
    pub shadow_map: Option<NodeId>,
    pub downsample: Option<NodeId>,
    pub blur: Option<NodeId>,
    pub composite: NodeId,
    pub preview: Option<NodeId>,
    /// Background `(source, composite)` pair on the overlay surface.
    pub background: Option<(NodeId, NodeId)>,
}

/// The assembler's product: a fully wired graph plus named handles into it.
pub struct Pipeline<D: Device> {
    pub graph: RenderGraph<D>,
    pub nodes: PipelineNodes,
}

/// Turns a [`PipelineConfig`] into a [`Pipeline`].
///
/// Topology is decided entirely here. Rebuilding for a new configuration
/// means assembling a fresh pipeline and dropping the old one with all of
/// its targets; graphs are never edited in place.
pub struct PipelineAssembler<'a> {
    config: &'a PipelineConfig,
    images: &'a ImageCache,
}

impl<'a> PipelineAssembler<'a> {
    pub fn new(config: &'a PipelineConfig, images: &'a ImageCache) -> Self {
        Self { config, images }
    }

    /// Builds every node for a `width`x`height` render and registers the sinks.
    ///
    /// The configuration is validated first. Any wiring or validation error
    /// aborts assembly; nothing partially built is returned. Resource
    /// failures such as an unavailable program only warn here, since the
    /// affected node degrades at evaluation time.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that allocates every node's targets
    /// * `width` - Render width in pixels
    /// * `height` - Render height in pixels
    ///
    /// # Example
    ///
    /// ```no_run
    /// use renderdag::*;
    ///
    /// let config = PipelineConfig::from_json(
    ///     r#"{ "enablePostprocess": true, "bloomEffect": { "enabled": true, "threshold": 0.5 } }"#,
    /// )?;
    /// let images = ImageCache::new();
    /// let mut device = SoftwareDevice::new(800, 600);
    /// let pipeline = PipelineAssembler::new(&config, &images).assemble(&mut device, 800, 600)?;
    ///
    /// let downsample = pipeline.nodes.downsample.expect("bloom is enabled");
    /// assert_eq!(pipeline.graph.node(downsample).unwrap().size(), (400, 300));
    /// assert_eq!(
    ///     pipeline.graph.sinks(SurfaceKind::Scene),
    ///     [pipeline.nodes.composite]
    /// );
    /// # Ok::<(), ConfigurationError>(())
    /// ```
    #[instrument(skip(self, device), fields(
        postprocess = self.config.enable_postprocess,
        shadow = self.config.enable_shadow,
    ))]
    pub fn assemble<D: Device>(
        &self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> ConfigResult<Pipeline<D>> {
        let config = self.config;
        config.validate()?;

        let mut graph = RenderGraph::new(width, height);
        let mut nodes = PipelineNodes::default();

        if let Some(name) = &config.background_image {
            let image = self
                .images
                .get(name)
                .ok_or_else(|| ConfigurationError::MissingImage(name.clone()))?;
            let source = graph.add(RenderNode::source(device, image));
            let composite = graph.add(RenderNode::screen_composite(
                ScreenCompositeNode::new(SurfaceKind::Overlay),
                width,
                height,
            ));
            graph.connect(composite, Slot::Primary, source)?;
            graph.add_sink(SurfaceKind::Overlay, composite)?;
            nodes.background = Some((source, composite));
        }

        let shadow_map = config
            .enable_shadow
            .then(|| graph.add(RenderNode::shadow_map(device, &config.shadow_quality)));

        let scene_capture = graph.add(RenderNode::scene_capture(device, width, height));
        if let Some(shadow_map) = shadow_map {
            graph.connect(scene_capture, Slot::Shadow, shadow_map)?;
        }

        let mut bloom = None;
        if config.bloom_active() {
            let sizing = Sizing::Viewport {
                scale: config.bloom_effect.threshold,
            };
            let downsample = FilterPass::new(device, Filter::LinearInterp, sizing, width, height)
                .with_gamma(config.bloom_effect.gamma);
            let downsample = graph.add(RenderNode::filter(downsample, width, height));
            graph.connect(downsample, Slot::Primary, scene_capture)?;

            let blur = graph.add(RenderNode::blur_composite(device, sizing, width, height));
            graph.connect(blur, Slot::Primary, downsample)?;
            bloom = Some((downsample, blur));
        }

        let composite = graph.add(RenderNode::screen_composite(
            ScreenCompositeNode::new(SurfaceKind::Scene)
                .with_gamma(config.rendering_image.gamma)
                .with_antialias(config.enable_antialias),
            width,
            height,
        ));
        graph.connect(composite, Slot::Primary, scene_capture)?;
        if let Some((_, blur)) = bloom {
            graph.connect(composite, Slot::Secondary, blur)?;
        }
        graph.add_sink(SurfaceKind::Scene, composite)?;

        if config.enable_preview {
            let preview = graph.add(RenderNode::preview_grid(
                PreviewGridNode::new(SurfaceKind::Scene),
                width,
                height,
            ));
            let tiles = [
                Some(scene_capture),
                bloom.map(|(downsample, _)| downsample),
                bloom.map(|(_, blur)| blur),
                shadow_map,
            ];
            for (index, producer) in tiles.into_iter().flatten().enumerate() {
                graph.connect(preview, Slot::Tile(index as u8), producer)?;
            }
            // Drawn after the composite so the tiles land on top.
            graph.add_sink(SurfaceKind::Scene, preview)?;
            nodes.preview = Some(preview);
        }

        nodes.scene_capture = scene_capture;
        nodes.shadow_map = shadow_map;
        nodes.downsample = bloom.map(|(downsample, _)| downsample);
        nodes.blur = bloom.map(|(_, blur)| blur);
        nodes.composite = composite;

        debug!(nodes = graph.node_count(), kinds = ?graph.describe(), "pipeline assembled");
        Ok(Pipeline { graph, nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::NodeKind;
    use crate::software::SoftwareDevice;

    fn assemble(config: &PipelineConfig) -> ConfigResult<Pipeline<SoftwareDevice>> {
        let mut device = SoftwareDevice::new(800, 600);
        PipelineAssembler::new(config, &ImageCache::new()).assemble(&mut device, 800, 600)
    }

    fn bloom_config(threshold: f32) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.enable_postprocess = true;
        config.bloom_effect.enabled = true;
        config.bloom_effect.threshold = threshold;
        config
    }

    #[test]
    fn plain_config_is_capture_plus_composite() {
        let pipeline = assemble(&PipelineConfig::default()).unwrap();
        let graph = &pipeline.graph;
        assert_eq!(graph.describe(), ["scene-capture", "screen-composite"]);
        assert_eq!(graph.sinks(SurfaceKind::Scene), [pipeline.nodes.composite]);
        assert!(graph.sinks(SurfaceKind::Overlay).is_empty());
    }

    #[test]
    fn downsample_follows_threshold() {
        let pipeline = assemble(&bloom_config(0.3)).unwrap();
        let downsample = pipeline.nodes.downsample.unwrap();
        let node = pipeline.graph.node(downsample).unwrap();
        assert_eq!(node.size(), (240, 180));
        let NodeKind::Filter(pass) = node.kind() else {
            panic!("downsample is not a filter");
        };
        assert_eq!(pass.filter(), Filter::LinearInterp);
        assert_eq!(pass.target().map(|t| (t.width(), t.height())), Some((240, 180)));

        let blur = pipeline.graph.node(pipeline.nodes.blur.unwrap()).unwrap();
        assert_eq!(blur.size(), (240, 180));
        assert_eq!(blur.input(Slot::Primary), Some(downsample));
    }

    #[test]
    fn bloom_needs_both_switches() {
        let mut config = bloom_config(0.25);
        config.enable_postprocess = false;
        let pipeline = assemble(&config).unwrap();
        assert!(pipeline.nodes.downsample.is_none());
        assert!(pipeline.nodes.blur.is_none());
        let composite = pipeline.graph.node(pipeline.nodes.composite).unwrap();
        assert_eq!(composite.input(Slot::Secondary), None);
    }

    #[test]
    fn composite_carries_gamma_and_antialias() {
        let mut config = PipelineConfig::default();
        config.enable_antialias = true;
        config.rendering_image.gamma = 2.2;
        let pipeline = assemble(&config).unwrap();
        let NodeKind::ScreenComposite(node) =
            pipeline.graph.node(pipeline.nodes.composite).unwrap().kind()
        else {
            panic!("composite is not a screen composite");
        };
        assert!(node.antialias());
        assert_eq!(node.gamma(), 2.2);
        assert_eq!(node.surface(), SurfaceKind::Scene);
    }

    #[test]
    fn missing_background_aborts_assembly() {
        let mut config = PipelineConfig::default();
        config.background_image = Some("sky".into());
        assert_eq!(
            assemble(&config).err(),
            Some(ConfigurationError::MissingImage("sky".into()))
        );
    }

    #[test]
    fn background_lives_on_the_overlay() {
        let mut config = PipelineConfig::default();
        config.background_image = Some("sky".into());
        let mut images = ImageCache::new();
        images.insert("sky", image::RgbaImage::new(16, 8));
        let mut device = SoftwareDevice::new(64, 64);
        let pipeline = PipelineAssembler::new(&config, &images)
            .assemble(&mut device, 64, 64)
            .unwrap();

        let (source, composite) = pipeline.nodes.background.unwrap();
        assert_eq!(pipeline.graph.sinks(SurfaceKind::Overlay), [composite]);
        assert_eq!(pipeline.graph.node(source).unwrap().size(), (16, 8));
        assert!(pipeline.graph.consumers(source).contains(&composite));
    }

    #[test]
    fn preview_observes_without_extra_roles() {
        let mut config = bloom_config(0.5);
        config.enable_shadow = true;
        config.enable_preview = true;
        config.shadow_quality.resolution = 64;
        let pipeline = assemble(&config).unwrap();
        let preview = pipeline.nodes.preview.unwrap();

        assert_eq!(
            pipeline.graph.sinks(SurfaceKind::Scene),
            [pipeline.nodes.composite, preview]
        );
        let node = pipeline.graph.node(preview).unwrap();
        assert_eq!(node.inputs().len(), 4);
        assert_eq!(node.input(Slot::Tile(0)), Some(pipeline.nodes.scene_capture));
        assert_eq!(node.input(Slot::Tile(3)), pipeline.nodes.shadow_map);
    }

    #[test]
    fn invalid_values_abort_before_building() {
        let config = bloom_config(0.0);
        assert!(matches!(
            assemble(&config),
            Err(ConfigurationError::Invalid(_))
        ));
    }
}
