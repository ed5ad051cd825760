//! The graphics-device seam.
//!
//! The render graph never talks to a graphics API directly. Everything it
//! needs (allocate a target, bind a destination, run a pixel program over
//! some sampled inputs) goes through [`Device`]. Two implementations ship with
//! the crate: [`SoftwareDevice`](crate::SoftwareDevice) for headless CPU
//! rendering and [`GpuDevice`](crate::GpuDevice) on top of wgpu.

use image::RgbaImage;

use crate::error::ResourceError;
use crate::render_graph::Filter;

/// A visible surface a terminal node can draw to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// The main 3D surface.
    Scene,
    /// The secondary 2D layer (background images and similar).
    Overlay,
}

impl SurfaceKind {
    /// Every surface, in the order a tick visits them.
    pub const ALL: [SurfaceKind; 2] = [SurfaceKind::Scene, SurfaceKind::Overlay];
}

/// Straight RGBA color in `0.0..=1.0`.
pub type Rgba = [f32; 4];

pub const TRANSPARENT: Rgba = [0.0, 0.0, 0.0, 0.0];

/// Parameters for allocating an offscreen target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub width: u32,
    pub height: u32,
    /// Allocate a depth attachment alongside the color image.
    pub depth: bool,
    /// Debug label (visible in GPU debuggers).
    pub label: &'static str,
}

/// Where a draw lands: an owned offscreen target or a visible surface.
pub enum Destination<'a, T> {
    Target(&'a mut T),
    Surface(SurfaceKind),
}

impl<T> Destination<'_, T> {
    pub fn surface(&self) -> Option<SurfaceKind> {
        match self {
            Destination::Target(_) => None,
            Destination::Surface(kind) => Some(*kind),
        }
    }
}

/// Sub-rectangle of a destination, in fractions of its size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const FULL: Viewport = Viewport {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Converts to a pixel rectangle `(x, y, w, h)` inside a `width`x`height` image.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.x * width as f32).round().clamp(0.0, width as f32) as u32;
        let y0 = (self.y * height as f32).round().clamp(0.0, height as f32) as u32;
        let x1 = ((self.x + self.width) * width as f32)
            .round()
            .clamp(0.0, width as f32) as u32;
        let y1 = ((self.y + self.height) * height as f32)
            .round()
            .clamp(0.0, height as f32) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Which pixel program a draw runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Single-pass image filter over the primary (and optional secondary) input.
    Filter(Filter),
    /// Additive blend of primary and secondary onto a surface, then gamma.
    Composite,
    /// Plain copy into a viewport of the destination.
    Blit,
}

impl ProgramKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProgramKind::Filter(filter) => filter.name(),
            ProgramKind::Composite => "composite",
            ProgramKind::Blit => "blit",
        }
    }
}

/// A program plus the per-instance scalars nodes carry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Program {
    pub kind: ProgramKind,
    /// Exponent applied to the result (`Composite` uses its reciprocal).
    pub gamma: f32,
    pub antialias: bool,
    pub viewport: Viewport,
}

impl Program {
    pub fn new(kind: ProgramKind) -> Self {
        Self {
            kind,
            gamma: 1.0,
            antialias: false,
            viewport: Viewport::FULL,
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

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }
}

/// Capabilities the pipeline consumes from a graphics backend.
///
/// Absent inputs (`None` in `inputs`) must be sampled as fully transparent
/// black so a node whose producer failed degrades instead of crashing.
pub trait Device {
    /// An owned, bindable and sampleable image buffer.
    type Target;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<Self::Target, ResourceError>;

    /// Wraps an externally supplied image as a sampleable target.
    fn upload_image(&mut self, image: &RgbaImage) -> Result<Self::Target, ResourceError>;

    /// Compiles (or looks up) a program ahead of its first draw.
    fn prepare_program(&mut self, _kind: ProgramKind) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Makes `dest` the active draw destination. Prefer [`Bound::new`].
    fn bind(&mut self, dest: &Destination<'_, Self::Target>);

    fn unbind(&mut self);

    fn clear(&mut self, dest: &mut Destination<'_, Self::Target>, color: Rgba);

    fn draw_with_program(
        &mut self,
        dest: &mut Destination<'_, Self::Target>,
        program: &Program,
        inputs: &[Option<&Self::Target>],
    ) -> Result<(), ResourceError>;

    /// Resizes every visible surface.
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Called before any node draws to `surface` during a frame.
    fn begin_frame(&mut self, _surface: SurfaceKind) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Called after every sink of `surface` has been evaluated.
    fn end_frame(&mut self, _surface: SurfaceKind) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// A destination bound for the lifetime of the guard.
///
/// Creating the guard binds, dropping it unbinds, so a node can never leave
/// its target bound after its own draw step.
pub struct Bound<'a, D: Device> {
    device: &'a mut D,
    dest: Destination<'a, D::Target>,
}

impl<'a, D: Device> Bound<'a, D> {
    pub fn new(device: &'a mut D, dest: Destination<'a, D::Target>) -> Self {
        device.bind(&dest);
        Self { device, dest }
    }

    /// Fills the whole destination with `color`, depth included.
    pub fn clear(&mut self, color: Rgba) {
        self.device.clear(&mut self.dest, color);
    }

    pub fn draw_with_program(
        &mut self,
        program: &Program,
        inputs: &[Option<&D::Target>],
    ) -> Result<(), ResourceError> {
        self.device.draw_with_program(&mut self.dest, program, inputs)
    }

    pub fn destination(&self) -> &Destination<'a, D::Target> {
        &self.dest
    }

    /// Raw access for scene collaborators that issue their own draws.
    pub fn parts(&mut self) -> (&mut D, &mut Destination<'a, D::Target>) {
        (&mut *self.device, &mut self.dest)
    }
}

impl<D: Device> Drop for Bound<'_, D> {
    fn drop(&mut self) {
        self.device.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_maps_to_pixels() {
        let vp = Viewport {
            x: 0.5,
            y: 0.0,
            width: 0.5,
            height: 0.5,
        };
        assert_eq!(vp.to_pixels(800, 600), (400, 0, 400, 300));
        assert_eq!(Viewport::FULL.to_pixels(3, 7), (0, 0, 3, 7));
    }

    #[test]
    fn viewport_is_clamped_to_the_image() {
        let vp = Viewport {
            x: 0.75,
            y: 0.75,
            width: 0.5,
            height: 0.5,
        };
        assert_eq!(vp.to_pixels(100, 100), (75, 75, 25, 25));
    }

    #[test]
    fn program_names_follow_their_kind() {
        assert_eq!(ProgramKind::Composite.name(), "composite");
        assert_eq!(
            ProgramKind::Filter(Filter::BlurHorizontal).name(),
            "blur-horizontal"
        );
    }
}
