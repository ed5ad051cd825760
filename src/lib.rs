//! # renderdag
//!
//! **A demand-driven render pipeline: build the graph once, pull frames from it.**
//!
//! A frame is a small directed acyclic graph of passes (scene capture,
//! shadow map, bloom downsample and blur, screen composite). The graph is
//! assembled from a JSON option set, each node is computed at most once per
//! frame, and a scheduler skips surfaces nothing has marked dirty.
//!
//! ## Quick Start
//!
//! ```no_run
//! use renderdag::*;
//!
//! struct Flat;
//!
//! impl Scene<SoftwareDevice> for Flat {
//!     fn draw(
//!         &mut self,
//!         target: &mut Bound<'_, SoftwareDevice>,
//!         _view: &SceneView,
//!         _shadow: Option<ShadowContext<'_, SoftwareTarget>>,
//!     ) -> Result<(), ResourceError> {
//!         target.clear([0.5, 0.5, 0.5, 1.0]);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), PipelineError> {
//! let mut renderer = Renderer::new(SoftwareDevice::new(800, 600), 800, 600);
//! renderer.configure(PipelineConfig::from_json(
//!     r#"{ "enablePostprocess": true, "bloomEffect": { "enabled": true } }"#,
//! )?)?;
//! renderer.tick(&mut Flat)?;
//! let frame = renderer.device().surface(SurfaceKind::Scene);
//! # let _ = frame;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`PipelineConfig`] is the option snapshot; [`PipelineAssembler`] turns it into a [`RenderGraph`].
//! - [`FrameScheduler`] decides per refresh tick which surfaces are re-rendered.
//! - [`Device`] is the graphics seam: [`SoftwareDevice`] on the CPU, [`GpuDevice`] on wgpu.
//! - [`Renderer`] ties the three together for hosts that want one object.

mod camera;
mod config;
mod device;
mod error;
mod gpu;
mod gpu_device;
mod images;
mod render_graph;
mod renderer;
mod scene;
mod scheduler;
mod software;

pub use camera::Camera;
pub use config::{BloomEffect, PipelineConfig, RenderingImage, ShadowQuality};
pub use device::{
    Bound, Destination, Device, Program, ProgramKind, Rgba, SurfaceKind, TRANSPARENT, TargetDesc,
    Viewport,
};
pub use error::{ConfigResult, ConfigurationError, PipelineError, ResourceError};
pub use gpu::{GpuContext, OFFSCREEN_FORMAT};
pub use gpu_device::{GpuDevice, GpuTarget};
pub use images::ImageCache;
pub use render_graph::{
    BlurCompositeNode, Filter, FilterPass, FrameContext, NodeId, NodeKind, Pipeline,
    PipelineAssembler, PipelineNodes, PreviewGridNode, RenderGraph, RenderNode, RenderTarget,
    SceneCaptureNode, ScreenCompositeNode, ShadowMapNode, Sizing, Slot, SourceNode,
};
pub use renderer::Renderer;
pub use scene::{DirectionalLight, Scene, SceneView, ShadowContext};
pub use scheduler::{FrameScheduler, FrameState, TickReport};
pub use software::{DeviceStats, SoftwareDevice, SoftwareTarget};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};
