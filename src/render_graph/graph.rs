//! The render graph arena: wiring, resize, invalidation and evaluation.

use tracing::{debug, trace};

use crate::device::{Device, SurfaceKind};
use crate::error::{ConfigResult, ConfigurationError};
use crate::render_graph::{NodeId, NodeKind, RenderNode, Slot};
use crate::scene::Scene;

/// Everything a node may touch while computing: the device and the scene.
pub struct FrameContext<'f, D: Device> {
    /// Device that owns every target the graph draws into.
    pub device: &'f mut D,
    /// Host scene, drawn by scene-capture and shadow-map nodes.
    pub scene: &'f mut dyn Scene<D>,
}

impl<'f, D: Device> FrameContext<'f, D> {
    /// Borrows the device and scene for one traversal.
    pub fn new(device: &'f mut D, scene: &'f mut dyn Scene<D>) -> Self {
        Self { device, scene }
    }
}

/// A directed acyclic graph of render nodes plus its drive lists.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]. Edges are
/// only added through [`connect`](Self::connect), which rejects anything that
/// would break the graph's invariants before a single frame is drawn.
pub struct RenderGraph<D: Device> {
    // `None` only while a node is computing, so it can borrow its inputs.
    nodes: Vec<Option<RenderNode<D>>>,
    sinks: Vec<(SurfaceKind, NodeId)>,
    width: u32,
    height: u32,
    evaluations: u64,
}

impl<D: Device> RenderGraph<D> {
    /// Creates an empty graph for a `width`x`height` render.
    ///
    /// The size is what [`Sizing`](crate::Sizing) resolves against until the
    /// next [`resize`](Self::resize).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            nodes: Vec::new(),
            sinks: Vec::new(),
            width,
            height,
            evaluations: 0,
        }
    }

    /// Moves `node` into the arena. It has no edges until
    /// [`connect`](Self::connect) wires it.
    pub fn add(&mut self, node: RenderNode<D>) -> NodeId {
        let id = NodeId(self.nodes.len());
        trace!(?id, kind = node.kind().name(), "node added");
        self.nodes.push(Some(node));
        id
    }

    /// The node behind `id`, or `None` for an id from another graph.
    pub fn node(&self, id: NodeId) -> Option<&RenderNode<D>> {
        self.nodes.get(id.0)?.as_ref()
    }

    /// Mutable access for tweaking a node in place.
    ///
    /// Edits do not re-arm memoization: call [`invalidate`](Self::invalidate)
    /// afterwards or the old result is reused.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut RenderNode<D>> {
        self.nodes.get_mut(id.0)?.as_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Node kind names in insertion order, for logging and tests.
    pub fn describe(&self) -> Vec<&'static str> {
        self.nodes
            .iter()
            .flatten()
            .map(|node| node.kind().name())
            .collect()
    }

    /// Ids of every node of the given kind name.
    pub fn find(&self, kind: &str) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.node(*id).is_some_and(|n| n.kind().name() == kind))
            .collect()
    }

    /// Render size the graph was last built or resized for.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total compute steps run across all nodes.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Wires `producer`'s output into `consumer`'s `slot`, replacing any
    /// previous producer on that slot.
    ///
    /// Checks run in this order, and the graph is untouched when one fails:
    /// both ids exist, the slot exists on the consumer, the producer has an
    /// image output, a shadow slot is fed by a shadow map, the edge closes no
    /// cycle, and a filter keeps a single production consumer. Preview tiles
    /// are exempt from the last check since they only observe.
    ///
    /// # Arguments
    ///
    /// * `consumer` - Node that will read the image
    /// * `slot` - Input on `consumer` to fill
    /// * `producer` - Node whose output is read
    ///
    /// # Example
    ///
    /// ```no_run
    /// use renderdag::*;
    ///
    /// let mut device = SoftwareDevice::new(64, 64);
    /// let mut graph = RenderGraph::new(64, 64);
    /// let capture = graph.add(RenderNode::scene_capture(&mut device, 64, 64));
    /// let composite = graph.add(RenderNode::screen_composite(
    ///     ScreenCompositeNode::new(SurfaceKind::Scene),
    ///     64,
    ///     64,
    /// ));
    /// graph.connect(composite, Slot::Primary, capture)?;
    ///
    /// // A composite draws to a surface and has nothing to sample.
    /// assert!(graph.connect(capture, Slot::Shadow, composite).is_err());
    /// # Ok::<(), ConfigurationError>(())
    /// ```
    pub fn connect(&mut self, consumer: NodeId, slot: Slot, producer: NodeId) -> ConfigResult<()> {
        let consumer_node = self
            .node(consumer)
            .ok_or(ConfigurationError::UnknownNode(consumer))?;
        let producer_node = self
            .node(producer)
            .ok_or(ConfigurationError::UnknownNode(producer))?;

        if !consumer_node.kind().accepts(slot) {
            return Err(ConfigurationError::UnknownSlot {
                consumer,
                slot,
                kind: consumer_node.kind().name(),
            });
        }
        if !producer_node.kind().has_image_output() {
            return Err(ConfigurationError::NotAnImage {
                producer,
                consumer,
                kind: producer_node.kind().name(),
            });
        }
        if slot == Slot::Shadow && !matches!(producer_node.kind(), NodeKind::ShadowMap(_)) {
            return Err(ConfigurationError::WrongProducer {
                consumer,
                slot,
                expected: "shadow-map",
                found: producer_node.kind().name(),
            });
        }
        if producer == consumer || self.reaches(producer, consumer) {
            return Err(ConfigurationError::Cycle { producer, consumer });
        }
        if matches!(producer_node.kind(), NodeKind::Filter(_))
            && !matches!(consumer_node.kind(), NodeKind::PreviewGrid(_))
        {
            // Preview tiles only observe; they never give a filter a second role.
            let existing = self.consumers(producer).into_iter().find(|other| {
                *other != consumer
                    && self
                        .node(*other)
                        .is_some_and(|n| !matches!(n.kind(), NodeKind::PreviewGrid(_)))
            });
            if let Some(existing) = existing {
                return Err(ConfigurationError::SharedFilter { producer, existing });
            }
        }

        let node = self
            .node_mut(consumer)
            .ok_or(ConfigurationError::UnknownNode(consumer))?;
        node.inputs.retain(|(s, _)| *s != slot);
        node.inputs.push((slot, producer));
        node.inputs.sort_by_key(|(s, _)| *s);
        trace!(?producer, ?consumer, ?slot, "connected");
        Ok(())
    }

    /// Removes whatever feeds `slot` on `consumer`.
    pub fn disconnect(&mut self, consumer: NodeId, slot: Slot) -> ConfigResult<Option<NodeId>> {
        let node = self
            .node_mut(consumer)
            .ok_or(ConfigurationError::UnknownNode(consumer))?;
        let previous = node.input(slot);
        node.inputs.retain(|(s, _)| *s != slot);
        Ok(previous)
    }

    /// Nodes that read `producer` through any slot.
    pub fn consumers(&self, producer: NodeId) -> Vec<NodeId> {
        self.ids()
            .filter(|id| {
                self.node(*id)
                    .is_some_and(|n| n.inputs().iter().any(|(_, input)| *input == producer))
            })
            .collect()
    }

    /// Whether `target` is among the transitive inputs of `from`.
    pub fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else { continue };
            for (_, input) in node.inputs() {
                if *input == target {
                    return true;
                }
                if !seen[input.0] {
                    seen[input.0] = true;
                    stack.push(*input);
                }
            }
        }
        false
    }

    /// Registers `id` on the drive list of `surface`, in evaluation order.
    pub fn add_sink(&mut self, surface: SurfaceKind, id: NodeId) -> ConfigResult<()> {
        if self.node(id).is_none() {
            return Err(ConfigurationError::UnknownNode(id));
        }
        if !self.sinks.contains(&(surface, id)) {
            self.sinks.push((surface, id));
        }
        Ok(())
    }

    /// Drive list of `surface`, in the order the sinks are evaluated.
    pub fn sinks(&self, surface: SurfaceKind) -> Vec<NodeId> {
        self.sinks
            .iter()
            .filter(|(s, _)| *s == surface)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Every sink across all surfaces, in registration order.
    pub fn all_sinks(&self) -> Vec<NodeId> {
        self.sinks.iter().map(|(_, id)| *id).collect()
    }

    /// Resizes every sink and, through them, every node they read.
    ///
    /// Each reachable node is visited once, however many paths lead to it.
    /// Targets are only reallocated where the resolved size changed, and
    /// nodes no sink reaches keep their old size. Returns the number of
    /// nodes visited.
    ///
    /// # Arguments
    ///
    /// * `device` - Device that owns the targets being reallocated
    /// * `width` - New render width in pixels
    /// * `height` - New render height in pixels
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use renderdag::*;
    /// # let mut device = SoftwareDevice::new(800, 600);
    /// # let mut graph = RenderGraph::new(800, 600);
    /// let capture = graph.add(RenderNode::scene_capture(&mut device, 800, 600));
    /// let composite = graph.add(RenderNode::screen_composite(
    ///     ScreenCompositeNode::new(SurfaceKind::Scene),
    ///     800,
    ///     600,
    /// ));
    /// graph.connect(composite, Slot::Primary, capture)?;
    /// graph.add_sink(SurfaceKind::Scene, composite)?;
    ///
    /// assert_eq!(graph.resize(&mut device, 1024, 768), 2);
    /// assert_eq!(graph.node(capture).unwrap().size(), (1024, 768));
    /// # Ok::<(), ConfigurationError>(())
    /// ```
    pub fn resize(&mut self, device: &mut D, width: u32, height: u32) -> usize {
        self.width = width;
        self.height = height;

        let mut stack = self.all_sinks();
        let mut seen = vec![false; self.nodes.len()];
        let mut visited = 0;
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            let Some(node) = self.node_mut(id) else { continue };
            node.resize(device, width, height);
            visited += 1;
            stack.extend(
                node.inputs()
                    .iter()
                    .map(|(_, input)| *input)
                    .filter(|input| !seen[input.0]),
            );
        }
        debug!(width, height, visited, "render graph resized");
        visited
    }

    /// Clears `id`'s memoization flag and, recursively, that of every input
    /// still marked evaluated.
    ///
    /// Safe to call repeatedly. Calling it on an inner node re-arms only that
    /// sub-graph; siblings keep their results. A blur composite re-arms both
    /// of its passes.
    ///
    /// # Arguments
    ///
    /// * `id` - Root of the sub-graph to re-arm; unknown ids are ignored
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use renderdag::*;
    /// # fn run<D: Device>(graph: &mut RenderGraph<D>, capture: NodeId, cx: &mut FrameContext<'_, D>) {
    /// graph.evaluate(capture, cx);
    /// graph.invalidate(capture);
    /// assert!(!graph.node(capture).unwrap().is_evaluated());
    /// assert!(graph.node(capture).unwrap().output().is_none());
    /// # }
    /// ```
    pub fn invalidate(&mut self, id: NodeId) {
        let Some(node) = self.node_mut(id) else { return };
        node.invalidate_self();
        let inputs: Vec<NodeId> = node.inputs().iter().map(|(_, input)| *input).collect();
        for input in inputs {
            if self.node(input).is_some_and(RenderNode::is_evaluated) {
                self.invalidate(input);
            }
        }
    }

    /// Re-arms everything `surface`'s sinks read, ready for a new frame.
    pub fn invalidate_sinks(&mut self, surface: SurfaceKind) {
        for sink in self.sinks(surface) {
            self.invalidate(sink);
        }
    }

    /// Evaluates `id` after its inputs, at most once until invalidated.
    ///
    /// Inputs are visited in slot order, so a node shared by several
    /// consumers computes on the first visit and is skipped after that.
    /// A node whose resources failed still counts as evaluated; it just
    /// has no [`output`](RenderNode::output), and its consumers degrade.
    ///
    /// # Arguments
    ///
    /// * `id` - Node to bring up to date; unknown ids are ignored
    /// * `cx` - Device and scene for this traversal
    ///
    /// # Example
    ///
    /// ```no_run
    /// use renderdag::*;
    ///
    /// fn frame<D: Device>(graph: &mut RenderGraph<D>, device: &mut D, scene: &mut dyn Scene<D>) {
    ///     let mut cx = FrameContext::new(device, scene);
    ///     for sink in graph.sinks(SurfaceKind::Scene) {
    ///         graph.evaluate(sink, &mut cx);
    ///     }
    ///     // Nothing is recomputed until the sinks are invalidated.
    ///     let before = graph.evaluations();
    ///     graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
    ///     assert_eq!(graph.evaluations(), before);
    /// }
    /// ```
    pub fn evaluate(&mut self, id: NodeId, cx: &mut FrameContext<'_, D>) {
        let Some(node) = self.node(id) else { return };
        if node.is_evaluated() {
            return;
        }
        let inputs: Vec<NodeId> = node.inputs().iter().map(|(_, input)| *input).collect();
        for input in inputs {
            self.evaluate(input, cx);
        }

        let Some(mut node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        node.compute(&self.nodes, cx);
        trace!(?id, kind = node.kind().name(), ok = node.output().is_some(), "evaluated");
        self.nodes[id.0] = Some(node);
        self.evaluations += 1;
    }

    /// Evaluates `surface`'s sinks in drive-list order.
    pub fn evaluate_sinks(&mut self, surface: SurfaceKind, cx: &mut FrameContext<'_, D>) {
        for sink in self.sinks(surface) {
            self.evaluate(sink, cx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Bound;
    use crate::error::ResourceError;
    use crate::render_graph::{Filter, FilterPass, ScreenCompositeNode, Sizing};
    use crate::scene::{SceneView, ShadowContext};
    use crate::software::SoftwareDevice;

    #[derive(Default)]
    struct FlatScene {
        draws: usize,
    }

    impl Scene<SoftwareDevice> for FlatScene {
        fn draw(
            &mut self,
            target: &mut Bound<'_, SoftwareDevice>,
            _view: &SceneView,
            _shadow: Option<ShadowContext<'_, crate::software::SoftwareTarget>>,
        ) -> Result<(), ResourceError> {
            self.draws += 1;
            target.clear([0.5, 0.5, 0.5, 1.0]);
            Ok(())
        }
    }

    fn filter(graph: &mut RenderGraph<SoftwareDevice>, device: &mut SoftwareDevice) -> NodeId {
        let pass = FilterPass::new(device, Filter::LinearInterp, Sizing::FULL, 8, 8);
        graph.add(RenderNode::filter(pass, 8, 8))
    }

    /// capture -> (a, b) -> composite: a diamond with a shared root.
    fn diamond(device: &mut SoftwareDevice) -> (RenderGraph<SoftwareDevice>, [NodeId; 4]) {
        let mut graph = RenderGraph::new(8, 8);
        let capture = graph.add(RenderNode::scene_capture(device, 8, 8));
        let a = filter(&mut graph, device);
        let b = filter(&mut graph, device);
        let sink = graph.add(RenderNode::screen_composite(
            ScreenCompositeNode::new(SurfaceKind::Scene),
            8,
            8,
        ));
        graph.connect(a, Slot::Primary, capture).unwrap();
        graph.connect(b, Slot::Primary, capture).unwrap();
        graph.connect(sink, Slot::Primary, a).unwrap();
        graph.connect(sink, Slot::Secondary, b).unwrap();
        graph.add_sink(SurfaceKind::Scene, sink).unwrap();
        (graph, [capture, a, b, sink])
    }

    #[test]
    fn shared_ancestor_computes_once_per_pass() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut scene = FlatScene::default();
        let (mut graph, [capture, a, b, sink]) = diamond(&mut device);

        let mut cx = FrameContext::new(&mut device, &mut scene);
        graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
        graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);

        assert_eq!(scene.draws, 1);
        for id in [capture, a, b, sink] {
            assert_eq!(graph.node(id).unwrap().evaluations(), 1, "{id:?}");
        }
        assert_eq!(graph.evaluations(), 4);
    }

    #[test]
    fn invalidate_re_arms_every_node() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut scene = FlatScene::default();
        let (mut graph, ids) = diamond(&mut device);

        {
            let mut cx = FrameContext::new(&mut device, &mut scene);
            graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
        }
        graph.invalidate_sinks(SurfaceKind::Scene);
        graph.invalidate_sinks(SurfaceKind::Scene);
        for id in ids {
            let node = graph.node(id).unwrap();
            assert!(!node.is_evaluated());
            assert!(node.output().is_none());
        }

        let mut cx = FrameContext::new(&mut device, &mut scene);
        graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
        for id in ids {
            assert_eq!(graph.node(id).unwrap().evaluations(), 2);
        }
        assert_eq!(scene.draws, 2);
    }

    #[test]
    fn partial_invalidation_leaves_siblings_alone() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut scene = FlatScene::default();
        let (mut graph, [capture, a, b, _sink]) = diamond(&mut device);
        {
            let mut cx = FrameContext::new(&mut device, &mut scene);
            graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
        }

        graph.invalidate(a);
        assert!(!graph.node(a).unwrap().is_evaluated());
        assert!(!graph.node(capture).unwrap().is_evaluated());
        assert!(graph.node(b).unwrap().is_evaluated());
    }

    #[test]
    fn output_is_absent_until_evaluated() {
        let mut device = SoftwareDevice::new(8, 8);
        let (graph, [capture, ..]) = diamond(&mut device);
        assert!(graph.node(capture).unwrap().output().is_none());
        assert!(graph.node(capture).unwrap().target_serial().is_some());
    }

    #[test]
    fn terminal_nodes_cannot_be_inputs() {
        let mut device = SoftwareDevice::new(8, 8);
        let (mut graph, [_, _, _, sink]) = diamond(&mut device);
        let consumer = filter(&mut graph, &mut device);

        let err = graph.connect(consumer, Slot::Primary, sink).unwrap_err();
        assert!(matches!(err, ConfigurationError::NotAnImage { .. }));
        assert!(graph.node(consumer).unwrap().inputs().is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut graph = RenderGraph::new(8, 8);
        let first = filter(&mut graph, &mut device);
        let second = filter(&mut graph, &mut device);
        graph.connect(second, Slot::Primary, first).unwrap();

        assert_eq!(
            graph.connect(first, Slot::Primary, second),
            Err(ConfigurationError::Cycle {
                producer: second,
                consumer: first
            })
        );
        assert!(matches!(
            graph.connect(first, Slot::Secondary, first),
            Err(ConfigurationError::Cycle { .. })
        ));
    }

    #[test]
    fn one_filter_instance_per_role() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut graph = RenderGraph::new(8, 8);
        let shared = filter(&mut graph, &mut device);
        let first = filter(&mut graph, &mut device);
        let second = filter(&mut graph, &mut device);
        graph.connect(first, Slot::Primary, shared).unwrap();

        let err = graph.connect(second, Slot::Primary, shared).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::SharedFilter {
                producer: shared,
                existing: first
            }
        );
        // Rewiring the same consumer is not a second role.
        graph.connect(first, Slot::Secondary, shared).unwrap();
    }

    #[test]
    fn unknown_slots_and_nodes_are_rejected() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut graph = RenderGraph::new(8, 8);
        let capture = graph.add(RenderNode::scene_capture(&mut device, 8, 8));
        let pass = filter(&mut graph, &mut device);

        assert!(matches!(
            graph.connect(capture, Slot::Primary, pass),
            Err(ConfigurationError::UnknownSlot { .. })
        ));
        assert!(matches!(
            graph.connect(capture, Slot::Shadow, pass),
            Err(ConfigurationError::WrongProducer { .. })
        ));
        assert_eq!(
            graph.connect(pass, Slot::Primary, NodeId(99)),
            Err(ConfigurationError::UnknownNode(NodeId(99)))
        );
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        let mut device = SoftwareDevice::new(8, 8);
        let (mut graph, [capture, a, ..]) = diamond(&mut device);
        let before = graph.node(capture).unwrap().target_serial();
        let created = device.stats().targets_created;

        graph.resize(&mut device, 8, 8);
        assert_eq!(graph.node(capture).unwrap().target_serial(), before);
        assert_eq!(device.stats().targets_created, created);

        graph.resize(&mut device, 16, 4);
        assert_ne!(graph.node(capture).unwrap().target_serial(), before);
        assert_eq!(graph.node(a).unwrap().size(), (16, 4));
        // capture + two filters; the composite owns no target.
        assert_eq!(device.stats().targets_created, created + 3);
    }

    #[test]
    fn resize_visits_shared_nodes_once() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut graph = RenderGraph::new(8, 8);
        let mut root = graph.add(RenderNode::scene_capture(&mut device, 8, 8));
        // Twelve stacked diamonds: 4096 paths from the sink to the capture.
        for _ in 0..12 {
            let a = filter(&mut graph, &mut device);
            let b = filter(&mut graph, &mut device);
            let join = filter(&mut graph, &mut device);
            graph.connect(a, Slot::Primary, root).unwrap();
            graph.connect(b, Slot::Primary, root).unwrap();
            graph.connect(join, Slot::Primary, a).unwrap();
            graph.connect(join, Slot::Secondary, b).unwrap();
            root = graph.add(RenderNode::blur_composite(&mut device, Sizing::FULL, 8, 8));
            graph.connect(root, Slot::Primary, join).unwrap();
        }
        let sink = graph.add(RenderNode::screen_composite(
            ScreenCompositeNode::new(SurfaceKind::Scene),
            8,
            8,
        ));
        graph.connect(sink, Slot::Primary, root).unwrap();
        graph.add_sink(SurfaceKind::Scene, sink).unwrap();

        assert_eq!(graph.resize(&mut device, 4, 4), graph.node_count());
        assert!(graph.ids().all(|id| graph.node(id).unwrap().size() == (4, 4)));
    }

    #[test]
    fn resize_skips_nodes_no_sink_reads() {
        let mut device = SoftwareDevice::new(8, 8);
        let (mut graph, _) = diamond(&mut device);
        let orphan = filter(&mut graph, &mut device);

        assert_eq!(graph.resize(&mut device, 2, 2), 4);
        assert_eq!(graph.node(orphan).unwrap().size(), (8, 8));
    }

    fn blur_passes(graph: &RenderGraph<SoftwareDevice>, id: NodeId) -> [(u64, bool); 2] {
        match graph.node(id).unwrap().kind() {
            NodeKind::BlurComposite(blur) => [
                (blur.horizontal().evaluations(), blur.horizontal().is_evaluated()),
                (blur.vertical().evaluations(), blur.vertical().is_evaluated()),
            ],
            other => panic!("expected a blur composite, got {}", other.name()),
        }
    }

    #[test]
    fn blur_composite_runs_each_pass_once_per_frame() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut scene = FlatScene::default();
        let mut graph = RenderGraph::new(8, 8);
        let capture = graph.add(RenderNode::scene_capture(&mut device, 8, 8));
        let blur = graph.add(RenderNode::blur_composite(&mut device, Sizing::FULL, 8, 8));
        let sink = graph.add(RenderNode::screen_composite(
            ScreenCompositeNode::new(SurfaceKind::Scene),
            8,
            8,
        ));
        graph.connect(blur, Slot::Primary, capture).unwrap();
        graph.connect(sink, Slot::Primary, capture).unwrap();
        graph.connect(sink, Slot::Secondary, blur).unwrap();
        graph.add_sink(SurfaceKind::Scene, sink).unwrap();

        for frame in 1..=3 {
            graph.invalidate_sinks(SurfaceKind::Scene);
            assert_eq!(blur_passes(&graph, blur), [(frame - 1, false); 2]);

            let mut cx = FrameContext::new(&mut device, &mut scene);
            graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
            graph.evaluate(blur, &mut cx);
            assert_eq!(blur_passes(&graph, blur), [(frame, true); 2]);
        }
        assert!(graph.node(blur).unwrap().output().is_some());
    }

    #[test]
    fn tweaked_filter_needs_invalidation() {
        let mut device = SoftwareDevice::new(8, 8);
        let mut scene = FlatScene::default();
        let (mut graph, [_, a, _, sink]) = diamond(&mut device);
        {
            let mut cx = FrameContext::new(&mut device, &mut scene);
            graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
        }
        let before = graph.node(a).unwrap().output().unwrap().color().get_pixel(0, 0).0;

        let NodeKind::Filter(pass) = graph.node_mut(a).unwrap().kind_mut() else {
            panic!("expected a filter");
        };
        pass.set_gamma(2.0);
        pass.set_antialias(true);
        let program = pass.program();
        assert_eq!(program.gamma, 2.0);
        assert!(program.antialias);
        assert_eq!(pass.size_for(16, 4), (16, 4));

        // Still memoized: the old image is served until the node is re-armed.
        {
            let mut cx = FrameContext::new(&mut device, &mut scene);
            graph.evaluate(sink, &mut cx);
        }
        assert_eq!(graph.node(a).unwrap().evaluations(), 1);

        graph.invalidate(a);
        let mut cx = FrameContext::new(&mut device, &mut scene);
        graph.evaluate(a, &mut cx);
        let after = graph.node(a).unwrap().output().unwrap().color().get_pixel(0, 0).0;
        assert_eq!(graph.node(a).unwrap().evaluations(), 2);
        assert!(after[0] < before[0], "{after:?} vs {before:?}");
        assert_eq!(after[3], 255);
    }

    #[test]
    fn disconnect_returns_previous_producer() {
        let mut device = SoftwareDevice::new(8, 8);
        let (mut graph, [_, a, b, sink]) = diamond(&mut device);
        assert_eq!(graph.disconnect(sink, Slot::Secondary), Ok(Some(b)));
        assert_eq!(graph.node(sink).unwrap().input(Slot::Primary), Some(a));
        assert_eq!(graph.node(sink).unwrap().input(Slot::Secondary), None);
    }
}
