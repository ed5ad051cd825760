//! Graph vertices: shared node state plus the closed set of node kinds.

use crate::device::{Device, SurfaceKind};
use crate::render_graph::filter::FilterPass;
use crate::render_graph::graph::FrameContext;
use crate::render_graph::nodes::{
    BlurCompositeNode, InputRefs, PreviewGridNode, SceneCaptureNode, ScreenCompositeNode,
    ShadowMapNode, SourceNode,
};
use crate::scene::ShadowContext;

/// Index of a node inside its [`RenderGraph`](crate::RenderGraph).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A named input slot on a consumer node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Primary,
    Secondary,
    /// Side-channel consulted while drawing, never composited.
    Shadow,
    /// Preview grid tile, in display order.
    Tile(u8),
}

/// How a node derives its target size from the render size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sizing {
    /// Render size times `scale`, rounded, at least 1x1.
    Viewport { scale: f32 },
    /// Independent of the render size (shadow maps, source images).
    Fixed { width: u32, height: u32 },
}

impl Sizing {
    pub const FULL: Sizing = Sizing::Viewport { scale: 1.0 };

    pub fn resolve(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            Sizing::Viewport { scale } => (scale_dim(width, scale), scale_dim(height, scale)),
            Sizing::Fixed { width, height } => (width, height),
        }
    }
}

fn scale_dim(dim: u32, scale: f32) -> u32 {
    ((dim as f32 * scale).round() as u32).max(1)
}

/// The closed set of node variants.
pub enum NodeKind<D: Device> {
    Source(SourceNode<D>),
    SceneCapture(SceneCaptureNode<D>),
    ShadowMap(ShadowMapNode<D>),
    Filter(FilterPass<D>),
    BlurComposite(BlurCompositeNode<D>),
    ScreenComposite(ScreenCompositeNode),
    PreviewGrid(PreviewGridNode),
}

impl<D: Device> NodeKind<D> {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::SceneCapture(_) => "scene-capture",
            NodeKind::ShadowMap(_) => "shadow-map",
            NodeKind::Filter(_) => "filter",
            NodeKind::BlurComposite(_) => "blur-composite",
            NodeKind::ScreenComposite(_) => "screen-composite",
            NodeKind::PreviewGrid(_) => "preview-grid",
        }
    }

    /// Whether downstream nodes may sample this kind.
    pub fn has_image_output(&self) -> bool {
        !matches!(
            self,
            NodeKind::ScreenComposite(_) | NodeKind::PreviewGrid(_)
        )
    }

    /// Whether this kind reads `slot`.
    pub fn accepts(&self, slot: Slot) -> bool {
        match self {
            NodeKind::Source(_) | NodeKind::ShadowMap(_) => false,
            NodeKind::SceneCapture(_) => slot == Slot::Shadow,
            NodeKind::Filter(_) | NodeKind::ScreenComposite(_) => {
                matches!(slot, Slot::Primary | Slot::Secondary)
            }
            NodeKind::BlurComposite(_) => slot == Slot::Primary,
            NodeKind::PreviewGrid(_) => matches!(slot, Slot::Tile(_)),
        }
    }

    /// The visible surface a terminal kind draws to.
    pub fn surface(&self) -> Option<SurfaceKind> {
        match self {
            NodeKind::ScreenComposite(node) => Some(node.surface()),
            NodeKind::PreviewGrid(node) => Some(node.surface()),
            _ => None,
        }
    }

    fn resize(&mut self, device: &mut D, width: u32, height: u32) {
        match self {
            NodeKind::Source(_)
            | NodeKind::ShadowMap(_)
            | NodeKind::ScreenComposite(_)
            | NodeKind::PreviewGrid(_) => {}
            NodeKind::SceneCapture(node) => node.resize(device, width, height),
            NodeKind::Filter(pass) => pass.resize(device, width, height),
            NodeKind::BlurComposite(node) => node.resize(device, width, height),
        }
    }

    fn invalidate(&mut self) {
        match self {
            NodeKind::Filter(pass) => pass.invalidate(),
            NodeKind::BlurComposite(node) => node.invalidate(),
            _ => {}
        }
    }

    fn compute(&mut self, inputs: &InputRefs<'_, D>, cx: &mut FrameContext<'_, D>) -> bool {
        match self {
            NodeKind::Source(node) => node.output().is_some(),
            NodeKind::SceneCapture(node) => node.compute(inputs, cx),
            NodeKind::ShadowMap(node) => node.compute(cx),
            NodeKind::Filter(pass) => pass.evaluate(
                cx.device,
                inputs.image(Slot::Primary),
                inputs.image(Slot::Secondary),
            ),
            NodeKind::BlurComposite(node) => node.compute(cx.device, inputs.image(Slot::Primary)),
            NodeKind::ScreenComposite(node) => node.compute(inputs, cx.device),
            NodeKind::PreviewGrid(node) => node.compute(inputs, cx.device),
        }
    }

    fn image(&self) -> Option<&D::Target> {
        match self {
            NodeKind::Source(node) => node.output(),
            NodeKind::SceneCapture(node) => node.target().map(|t| t.resource()),
            NodeKind::ShadowMap(node) => node.target().map(|t| t.resource()),
            NodeKind::Filter(pass) => pass.output(),
            NodeKind::BlurComposite(node) => node.output(),
            NodeKind::ScreenComposite(_) | NodeKind::PreviewGrid(_) => None,
        }
    }

    fn target_serial(&self) -> Option<u64> {
        match self {
            NodeKind::Source(node) => node.image().map(|t| t.serial()),
            NodeKind::SceneCapture(node) => node.target().map(|t| t.serial()),
            NodeKind::ShadowMap(node) => node.target().map(|t| t.serial()),
            NodeKind::Filter(pass) => pass.target().map(|t| t.serial()),
            NodeKind::BlurComposite(node) => node.vertical().target().map(|t| t.serial()),
            NodeKind::ScreenComposite(_) | NodeKind::PreviewGrid(_) => None,
        }
    }
}

/// A vertex of the render graph.
///
/// `evaluated` is true iff the node's compute step ran since the last
/// invalidation; `output()` is only available in that state.
pub struct RenderNode<D: Device> {
    pub(crate) kind: NodeKind<D>,
    pub(crate) inputs: Vec<(Slot, NodeId)>,
    sizing: Sizing,
    width: u32,
    height: u32,
    pub(crate) evaluated: bool,
    valid: bool,
    evaluations: u64,
}

impl<D: Device> RenderNode<D> {
    /// Wraps `kind` with no inputs, sized by `sizing` against a
    /// `width`x`height` render. Prefer the per-kind constructors such as
    /// [`RenderNode::scene_capture`], which pick the right sizing.
    pub fn new(kind: NodeKind<D>, sizing: Sizing, width: u32, height: u32) -> Self {
        let (width, height) = sizing.resolve(width, height);
        Self {
            kind,
            inputs: Vec::new(),
            sizing,
            width,
            height,
            evaluated: false,
            valid: false,
            evaluations: 0,
        }
    }

    /// What the node computes.
    pub fn kind(&self) -> &NodeKind<D> {
        &self.kind
    }

    /// Mutable access to the kind, e.g. to retune a filter's gamma.
    ///
    /// The memoized result is kept; invalidate the node to see the change.
    pub fn kind_mut(&mut self) -> &mut NodeKind<D> {
        &mut self.kind
    }

    /// Wired inputs, sorted by slot.
    pub fn inputs(&self) -> &[(Slot, NodeId)] {
        &self.inputs
    }

    /// The producer wired to `slot`, if any.
    pub fn input(&self, slot: Slot) -> Option<NodeId> {
        self.inputs
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, id)| *id)
    }

    /// Resolved `(width, height)` for the current render size.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn sizing(&self) -> Sizing {
        self.sizing
    }

    /// True between a compute step and the next invalidation.
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// How many times the compute step has run over the node's lifetime.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// The sampleable result; `None` before evaluation, after invalidation,
    /// for terminal nodes, and when the node's resources failed this frame.
    pub fn output(&self) -> Option<&D::Target> {
        if !(self.evaluated && self.valid) {
            return None;
        }
        self.kind.image()
    }

    /// Allocation identity of the node's owned target.
    pub fn target_serial(&self) -> Option<u64> {
        self.kind.target_serial()
    }

    /// The shadow map plus its light matrix, for shadow-map nodes with a light.
    pub fn shadow_context(&self) -> Option<ShadowContext<'_, D::Target>> {
        let map = self.output()?;
        match &self.kind {
            NodeKind::ShadowMap(node) => Some(ShadowContext {
                map,
                light_view_projection: node.light_view_projection()?,
            }),
            _ => None,
        }
    }

    pub(crate) fn resize(&mut self, device: &mut D, width: u32, height: u32) {
        let (w, h) = self.sizing.resolve(width, height);
        self.width = w;
        self.height = h;
        // Kinds resolve their own target sizes from the render size.
        self.kind.resize(device, width, height);
    }

    pub(crate) fn invalidate_self(&mut self) {
        self.evaluated = false;
        self.valid = false;
        self.kind.invalidate();
    }

    pub(crate) fn compute(&mut self, nodes: &[Option<RenderNode<D>>], cx: &mut FrameContext<'_, D>) {
        let RenderNode {
            kind,
            inputs,
            evaluated,
            valid,
            evaluations,
            ..
        } = self;
        let refs = InputRefs::new(inputs.as_slice(), nodes);
        *valid = kind.compute(&refs, cx);
        *evaluated = true;
        *evaluations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_sizing_rounds_consistently() {
        let sizing = Sizing::Viewport { scale: 0.3 };
        assert_eq!(sizing.resolve(800, 600), (240, 180));
        assert_eq!(sizing.resolve(1, 1), (1, 1));
        assert_eq!(Sizing::FULL.resolve(1920, 1080), (1920, 1080));
    }

    #[test]
    fn fixed_sizing_ignores_render_size() {
        let sizing = Sizing::Fixed {
            width: 2048,
            height: 2048,
        };
        assert_eq!(sizing.resolve(800, 600), (2048, 2048));
    }

    #[test]
    fn tiny_scales_never_reach_zero() {
        assert_eq!(Sizing::Viewport { scale: 0.01 }.resolve(10, 10), (1, 1));
    }
}
