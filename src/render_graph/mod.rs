//! Demand-driven render graph for multi-pass rendering pipelines.
//!
//! Nodes form a directed acyclic graph. Each node owns at most one output
//! target and reads any number of named inputs. A frame is produced by
//! pulling on the sink nodes: every node evaluates its inputs first, then
//! draws its own output, and remembers that it has done so until the next
//! invalidation. A node that feeds several consumers therefore runs exactly
//! once per frame, however many paths reach it.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  ShadowMap   │
//!                 └──────┬───────┘
//!                        ▼ shadow
//!                 ┌──────────────┐    ┌────────────┐    ┌───────────────┐
//!                 │ SceneCapture │───▶│ Downsample │───▶│ BlurComposite │
//!                 └──────┬───────┘    └────────────┘    └───────┬───────┘
//!                        │ primary                      secondary│
//!                        ▼                                       ▼
//!                 ┌──────────────────────────────────────────────────┐
//!                 │              ScreenComposite (sink)              │
//!                 └──────────────────────────────────────────────────┘
//! ```
//!
//! Per frame the scheduler calls [`RenderGraph::invalidate`] and then
//! [`RenderGraph::evaluate`] on every sink. Invalidation re-arms the
//! memoization flags depth-first; evaluation recomputes each node once.
//!
//! # Node Types
//!
//! - [`SourceNode`]: wraps an externally supplied image
//! - [`SceneCaptureNode`]: draws the live scene, consulting an optional shadow map
//! - [`ShadowMapNode`]: draws the scene from a directional light
//! - [`FilterPass`]: single-pass image filter (downsample, blurs, threshold, antialias)
//! - [`BlurCompositeNode`]: horizontal + vertical blur pair presented as one node
//! - [`ScreenCompositeNode`]: blends two inputs onto a visible surface
//! - [`PreviewGridNode`]: tiles other nodes' outputs for debugging
//!
//! # Example
//!
//! ```ignore
//! let pipeline = PipelineAssembler::new(&config, &images)
//!     .assemble(&mut device, 800, 600)?;
//! let mut graph = pipeline.graph;
//!
//! for sink in graph.sinks(SurfaceKind::Scene) {
//!     graph.invalidate(sink);
//! }
//! let mut cx = FrameContext::new(&mut device, &mut scene);
//! graph.evaluate_sinks(SurfaceKind::Scene, &mut cx);
//! ```

mod assembler;
mod filter;
mod graph;
mod nodes;
mod render_node;
mod render_target;

pub use assembler::{Pipeline, PipelineAssembler, PipelineNodes};
pub use filter::{Filter, FilterPass};
pub use graph::{FrameContext, RenderGraph};
pub use nodes::{
    BlurCompositeNode, PreviewGridNode, SceneCaptureNode, ScreenCompositeNode, ShadowMapNode,
    SourceNode,
};
pub use render_node::{NodeId, NodeKind, RenderNode, Sizing, Slot};
pub use render_target::RenderTarget;
