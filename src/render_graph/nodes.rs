//! Concrete node kinds and their per-frame compute steps.

use glam::Mat4;
use image::RgbaImage;
use tracing::warn;

use crate::config::ShadowQuality;
use crate::device::{
    Bound, Destination, Device, Program, ProgramKind, Rgba, SurfaceKind, TRANSPARENT, TargetDesc,
    Viewport,
};
use crate::render_graph::filter::{FilterPass, sync_target};
use crate::render_graph::graph::FrameContext;
use crate::render_graph::{Filter, NodeId, NodeKind, RenderNode, RenderTarget, Sizing, Slot};
use crate::scene::SceneView;

/// Read-only view of a consumer's inputs during its compute step.
pub(crate) struct InputRefs<'g, D: Device> {
    slots: &'g [(Slot, NodeId)],
    nodes: &'g [Option<RenderNode<D>>],
}

impl<'g, D: Device> InputRefs<'g, D> {
    pub(crate) fn new(slots: &'g [(Slot, NodeId)], nodes: &'g [Option<RenderNode<D>>]) -> Self {
        Self { slots, nodes }
    }

    pub(crate) fn node(&self, slot: Slot) -> Option<&'g RenderNode<D>> {
        let (_, id) = self.slots.iter().find(|(s, _)| *s == slot)?;
        self.nodes.get(id.0)?.as_ref()
    }

    /// The producer's output, or `None` when unwired or absent this frame.
    pub(crate) fn image(&self, slot: Slot) -> Option<&'g D::Target> {
        self.node(slot)?.output()
    }

    /// Tile inputs in slot order.
    pub(crate) fn tiles(&self) -> Vec<Option<&'g D::Target>> {
        let mut tiles: Vec<(u8, NodeId)> = self
            .slots
            .iter()
            .filter_map(|(slot, id)| match slot {
                Slot::Tile(i) => Some((*i, *id)),
                _ => None,
            })
            .collect();
        tiles.sort_by_key(|(i, _)| *i);
        tiles
            .into_iter()
            .map(|(_, id)| {
                self.nodes
                    .get(id.0)
                    .and_then(Option::as_ref)
                    .and_then(RenderNode::output)
            })
            .collect()
    }
}

// ============================================================================
// Source
// ============================================================================

/// Wraps an externally supplied image. No computation.
pub struct SourceNode<D: Device> {
    image: Option<RenderTarget<D::Target>>,
}

impl<D: Device> SourceNode<D> {
    pub fn new(device: &mut D, image: &RgbaImage) -> Self {
        let image = match device.upload_image(image) {
            Ok(resource) => Some(RenderTarget::from_resource(
                resource,
                image.width(),
                image.height(),
            )),
            Err(err) => {
                warn!(%err, "source image unavailable");
                None
            }
        };
        Self { image }
    }

    pub fn image(&self) -> Option<&RenderTarget<D::Target>> {
        self.image.as_ref()
    }

    pub(crate) fn output(&self) -> Option<&D::Target> {
        self.image.as_ref().map(RenderTarget::resource)
    }
}

// ============================================================================
// Scene capture
// ============================================================================

/// Draws the live scene into an owned color+depth target.
pub struct SceneCaptureNode<D: Device> {
    target: Option<RenderTarget<D::Target>>,
    clear_color: Rgba,
}

impl<D: Device> SceneCaptureNode<D> {
    pub fn new(device: &mut D, width: u32, height: u32) -> Self {
        let mut node = Self {
            target: None,
            clear_color: TRANSPARENT,
        };
        node.resize(device, width, height);
        node
    }

    /// Color the target is cleared to before the scene draws.
    pub fn with_clear(mut self, color: Rgba) -> Self {
        self.clear_color = color;
        self
    }

    pub fn target(&self) -> Option<&RenderTarget<D::Target>> {
        self.target.as_ref()
    }

    pub(crate) fn resize(&mut self, device: &mut D, width: u32, height: u32) {
        sync_target(
            &mut self.target,
            device,
            TargetDesc {
                width,
                height,
                depth: true,
                label: "scene capture",
            },
        );
    }

    pub(crate) fn compute(&mut self, inputs: &InputRefs<'_, D>, cx: &mut FrameContext<'_, D>) -> bool {
        // An unwired or lightless shadow input means "no shadowing".
        let shadow = inputs
            .node(Slot::Shadow)
            .and_then(RenderNode::shadow_context);
        let Some(target) = self.target.as_mut() else {
            return false;
        };
        let aspect = target.width() as f32 / target.height() as f32;

        let mut bound = Bound::new(&mut *cx.device, Destination::Target(target.resource_mut()));
        bound.clear(self.clear_color);
        match cx
            .scene
            .draw(&mut bound, &SceneView::Camera { aspect }, shadow)
        {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "scene capture failed");
                false
            }
        }
    }
}

// ============================================================================
// Shadow map
// ============================================================================

/// Draws the scene from the scene's directional light.
pub struct ShadowMapNode<D: Device> {
    target: Option<RenderTarget<D::Target>>,
    scale: f32,
    view_depth: f32,
    light_view_projection: Option<Mat4>,
}

impl<D: Device> ShadowMapNode<D> {
    pub fn new(device: &mut D, quality: &ShadowQuality) -> Self {
        let mut target = None;
        sync_target(
            &mut target,
            device,
            TargetDesc {
                width: quality.resolution,
                height: quality.resolution,
                depth: true,
                label: "shadow map",
            },
        );
        Self {
            target,
            scale: quality.scale,
            view_depth: quality.view_depth,
            light_view_projection: None,
        }
    }

    pub fn target(&self) -> Option<&RenderTarget<D::Target>> {
        self.target.as_ref()
    }

    /// The matrix used for the last evaluation; `None` when the scene had no light.
    pub fn light_view_projection(&self) -> Option<Mat4> {
        self.light_view_projection
    }

    pub(crate) fn compute(&mut self, cx: &mut FrameContext<'_, D>) -> bool {
        self.light_view_projection = cx
            .scene
            .light()
            .map(|light| light.view_projection(self.scale, self.view_depth));
        let Some(target) = self.target.as_mut() else {
            return false;
        };

        let mut bound = Bound::new(&mut *cx.device, Destination::Target(target.resource_mut()));
        // Far plane everywhere: nothing occludes until the scene draws.
        bound.clear([1.0, 1.0, 1.0, 1.0]);
        let Some(view_projection) = self.light_view_projection else {
            return true;
        };
        match cx
            .scene
            .draw(&mut bound, &SceneView::Light { view_projection }, None)
        {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "shadow pass failed");
                false
            }
        }
    }
}

// ============================================================================
// Blur composite
// ============================================================================

/// A horizontal blur feeding a vertical blur, presented as one node.
///
/// Both passes keep their own memoization flags; the composite evaluates
/// and invalidates each exactly once per frame.
pub struct BlurCompositeNode<D: Device> {
    horizontal: FilterPass<D>,
    vertical: FilterPass<D>,
}

impl<D: Device> BlurCompositeNode<D> {
    pub fn new(device: &mut D, sizing: Sizing, width: u32, height: u32) -> Self {
        Self {
            horizontal: FilterPass::new(device, Filter::BlurHorizontal, sizing, width, height),
            vertical: FilterPass::new(device, Filter::BlurVertical, sizing, width, height),
        }
    }

    /// First pass; reads the composite's primary input.
    pub fn horizontal(&self) -> &FilterPass<D> {
        &self.horizontal
    }

    /// Second pass; its target is the composite's output.
    pub fn vertical(&self) -> &FilterPass<D> {
        &self.vertical
    }

    pub(crate) fn output(&self) -> Option<&D::Target> {
        self.vertical.output()
    }

    pub(crate) fn resize(&mut self, device: &mut D, width: u32, height: u32) {
        self.horizontal.resize(device, width, height);
        self.vertical.resize(device, width, height);
    }

    pub(crate) fn invalidate(&mut self) {
        self.horizontal.invalidate();
        self.vertical.invalidate();
    }

    pub(crate) fn compute(&mut self, device: &mut D, input: Option<&D::Target>) -> bool {
        self.horizontal.evaluate(device, input, None);
        self.vertical.evaluate(device, self.horizontal.output(), None)
    }
}

// ============================================================================
// Screen composite
// ============================================================================

/// Terminal node: blends primary and optional secondary onto a surface.
pub struct ScreenCompositeNode {
    surface: SurfaceKind,
    gamma: f32,
    antialias: bool,
}

impl ScreenCompositeNode {
    pub fn new(surface: SurfaceKind) -> Self {
        Self {
            surface,
            gamma: 1.0,
            antialias: false,
        }
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn surface(&self) -> SurfaceKind {
        self.surface
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn antialias(&self) -> bool {
        self.antialias
    }

    /// The composite program with this node's gamma and antialias flag.
    pub fn program(&self) -> Program {
        Program::new(ProgramKind::Composite)
            .with_gamma(self.gamma)
            .with_antialias(self.antialias)
    }

    pub(crate) fn compute<D: Device>(&mut self, inputs: &InputRefs<'_, D>, device: &mut D) -> bool {
        let primary = inputs.image(Slot::Primary);
        let secondary = inputs.image(Slot::Secondary);
        let mut bound = Bound::new(device, Destination::Surface(self.surface));
        bound.clear(TRANSPARENT);
        match bound.draw_with_program(&self.program(), &[primary, secondary]) {
            Ok(()) => true,
            Err(err) => {
                warn!(surface = ?self.surface, %err, "screen composite failed");
                false
            }
        }
    }
}

// ============================================================================
// Preview grid
// ============================================================================

/// Tiles several nodes' outputs over a surface for debugging.
///
/// Its tiles are ordinary input edges, so the nodes they reference are
/// evaluated through the same memoization as the production graph and cost
/// nothing extra when already computed this frame.
pub struct PreviewGridNode {
    surface: SurfaceKind,
}

impl PreviewGridNode {
    pub fn new(surface: SurfaceKind) -> Self {
        Self { surface }
    }

    pub fn surface(&self) -> SurfaceKind {
        self.surface
    }

    /// Viewport of tile `index` in a grid of `count` tiles.
    ///
    /// The grid is `ceil(sqrt(count))` columns wide and filled row by row
    /// from the top left; trailing cells stay empty.
    ///
    /// ```
    /// use renderdag::{PreviewGridNode, Viewport};
    ///
    /// let last = PreviewGridNode::tile_viewport(2, 3);
    /// assert_eq!(last, Viewport { x: 0.0, y: 0.5, width: 0.5, height: 0.5 });
    /// ```
    pub fn tile_viewport(index: usize, count: usize) -> Viewport {
        let columns = (count as f32).sqrt().ceil().max(1.0) as usize;
        let rows = count.div_ceil(columns).max(1);
        let width = 1.0 / columns as f32;
        let height = 1.0 / rows as f32;
        Viewport {
            x: (index % columns) as f32 * width,
            y: (index / columns) as f32 * height,
            width,
            height,
        }
    }

    pub(crate) fn compute<D: Device>(&mut self, inputs: &InputRefs<'_, D>, device: &mut D) -> bool {
        let tiles = inputs.tiles();
        let mut bound = Bound::new(device, Destination::Surface(self.surface));
        let mut ok = true;
        for (index, tile) in tiles.iter().enumerate() {
            let program = Program::new(ProgramKind::Blit)
                .with_viewport(Self::tile_viewport(index, tiles.len()));
            if let Err(err) = bound.draw_with_program(&program, &[*tile]) {
                warn!(tile = index, %err, "preview tile failed");
                ok = false;
            }
        }
        ok
    }
}

// ============================================================================
// Node constructors
// ============================================================================

/// Constructors wrap a kind with the sizing it always uses: sources and
/// shadow maps are fixed, composites and captures follow the render size,
/// and filters and blurs follow their pass's sizing.
impl<D: Device> RenderNode<D> {
    pub fn source(device: &mut D, image: &RgbaImage) -> Self {
        let sizing = Sizing::Fixed {
            width: image.width(),
            height: image.height(),
        };
        RenderNode::new(NodeKind::Source(SourceNode::new(device, image)), sizing, 1, 1)
    }

    pub fn scene_capture(device: &mut D, width: u32, height: u32) -> Self {
        let node = SceneCaptureNode::new(device, width, height);
        RenderNode::new(NodeKind::SceneCapture(node), Sizing::FULL, width, height)
    }

    pub fn shadow_map(device: &mut D, quality: &ShadowQuality) -> Self {
        let sizing = Sizing::Fixed {
            width: quality.resolution,
            height: quality.resolution,
        };
        RenderNode::new(
            NodeKind::ShadowMap(ShadowMapNode::new(device, quality)),
            sizing,
            1,
            1,
        )
    }

    pub fn filter(pass: FilterPass<D>, width: u32, height: u32) -> Self {
        let sizing = pass.sizing();
        RenderNode::new(NodeKind::Filter(pass), sizing, width, height)
    }

    pub fn blur_composite(device: &mut D, sizing: Sizing, width: u32, height: u32) -> Self {
        let node = BlurCompositeNode::new(device, sizing, width, height);
        RenderNode::new(NodeKind::BlurComposite(node), sizing, width, height)
    }

    pub fn screen_composite(node: ScreenCompositeNode, width: u32, height: u32) -> Self {
        RenderNode::new(NodeKind::ScreenComposite(node), Sizing::FULL, width, height)
    }

    pub fn preview_grid(node: PreviewGridNode, width: u32, height: u32) -> Self {
        RenderNode::new(NodeKind::PreviewGrid(node), Sizing::FULL, width, height)
    }
}
