//! The top-level driver tying configuration, graph and scheduler together.

use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::device::{Device, SurfaceKind};
use crate::error::{ConfigResult, ResourceError};
use crate::images::ImageCache;
use crate::render_graph::{Pipeline, PipelineAssembler};
use crate::scheduler::{FrameScheduler, TickReport};
use crate::scene::Scene;

/// Owns a device and the pipeline assembled for the current configuration.
///
/// ```ignore
/// let mut renderer = Renderer::new(SoftwareDevice::new(800, 600), 800, 600);
/// renderer.configure(PipelineConfig::from_json(json)?)?;
/// loop {
///     renderer.mark_dirty(SurfaceKind::Scene); // animation tick
///     renderer.tick(&mut scene)?;
/// }
/// ```
pub struct Renderer<D: Device> {
    device: D,
    config: PipelineConfig,
    images: ImageCache,
    pipeline: Option<Pipeline<D>>,
    scheduler: FrameScheduler,
    width: u32,
    height: u32,
}

impl<D: Device> Renderer<D> {
    /// A renderer with no pipeline yet; call [`configure`](Self::configure).
    pub fn new(device: D, width: u32, height: u32) -> Self {
        Self {
            device,
            config: PipelineConfig::default(),
            images: ImageCache::new(),
            pipeline: None,
            scheduler: FrameScheduler::new(),
            width,
            height,
        }
    }

    /// Assembles a new pipeline for `config` and replaces the current one.
    ///
    /// On error the previous pipeline (and configuration) stays in place.
    pub fn configure(&mut self, config: PipelineConfig) -> ConfigResult<()> {
        let assembled = PipelineAssembler::new(&config, &self.images).assemble(
            &mut self.device,
            self.width,
            self.height,
        );
        match assembled {
            Ok(pipeline) => {
                debug!(nodes = pipeline.graph.node_count(), "pipeline replaced");
                self.pipeline = Some(pipeline);
                self.config = config;
                self.scheduler.mark_all_dirty();
                Ok(())
            }
            Err(err) => {
                warn!(%err, "reconfiguration rejected; keeping previous pipeline");
                Err(err)
            }
        }
    }

    /// Rebuilds the pipeline for the current configuration, e.g. after the
    /// image cache changed.
    pub fn reconfigure(&mut self) -> ConfigResult<()> {
        self.configure(self.config.clone())
    }

    /// Resizes the surfaces and the current pipeline's targets, then
    /// marks every surface dirty. Without a pipeline only the surfaces
    /// change; the next [`configure`](Self::configure) builds at the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        match self.pipeline.as_mut() {
            Some(pipeline) => {
                self.scheduler
                    .resize(&mut pipeline.graph, &mut self.device, width, height)
            }
            None => {
                self.device.resize_surface(width, height);
                self.scheduler.mark_all_dirty();
            }
        }
    }

    /// Requests a redraw of `surface`, e.g. from an animation tick.
    pub fn mark_dirty(&mut self, surface: SurfaceKind) {
        self.scheduler.mark_dirty(surface);
    }

    /// Renders whatever is dirty. Without a pipeline this is a no-op.
    pub fn tick(&mut self, scene: &mut dyn Scene<D>) -> Result<TickReport, ResourceError> {
        match self.pipeline.as_mut() {
            Some(pipeline) => self
                .scheduler
                .tick(&mut pipeline.graph, &mut self.device, scene),
            None => Ok(TickReport::default()),
        }
    }

    /// The configuration the current pipeline was built from.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `None` until the first successful [`configure`](Self::configure).
    pub fn pipeline(&self) -> Option<&Pipeline<D>> {
        self.pipeline.as_ref()
    }

    /// Per-surface states and traversal counts.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Images the background option can name.
    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// Edits apply on the next [`reconfigure`](Self::reconfigure).
    pub fn images_mut(&mut self) -> &mut ImageCache {
        &mut self.images
    }

    /// The device, e.g. to read back a software surface.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable device access. Allocating or freeing pipeline targets
    /// through it is not tracked by the graph.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Current render size in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::software::SoftwareDevice;

    #[test]
    fn failed_reconfiguration_keeps_previous_pipeline() {
        let mut renderer = Renderer::new(SoftwareDevice::new(32, 32), 32, 32);
        renderer.configure(PipelineConfig::default()).unwrap();
        let before = renderer.pipeline().map(|p| p.nodes.clone());

        let mut broken = PipelineConfig::default();
        broken.background_image = Some("missing".into());
        assert_eq!(
            renderer.configure(broken),
            Err(ConfigurationError::MissingImage("missing".into()))
        );
        assert_eq!(renderer.pipeline().map(|p| p.nodes.clone()), before);
        assert_eq!(renderer.config(), &PipelineConfig::default());
    }

    #[test]
    fn reconfigure_picks_up_new_images() {
        let mut renderer = Renderer::new(SoftwareDevice::new(32, 32), 32, 32);
        let mut config = PipelineConfig::default();
        config.background_image = Some("sky".into());
        assert!(renderer.configure(config.clone()).is_err());

        renderer
            .images_mut()
            .insert("sky", image::RgbaImage::new(2, 2));
        renderer.configure(config).unwrap();
        renderer.reconfigure().unwrap();
        assert!(renderer.pipeline().unwrap().nodes.background.is_some());
    }

    #[test]
    fn resize_without_pipeline_resizes_surfaces() {
        let mut renderer = Renderer::new(SoftwareDevice::new(4, 4), 4, 4);
        renderer.resize(10, 6);
        assert_eq!(renderer.size(), (10, 6));
        assert_eq!(
            renderer.device().surface(SurfaceKind::Scene).dimensions(),
            (10, 6)
        );
    }
}
