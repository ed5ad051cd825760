//! Single-pass image filters.

use tracing::warn;

use crate::device::{Bound, Destination, Device, Program, ProgramKind, TargetDesc};
use crate::render_graph::{RenderTarget, Sizing};

/// The pixel operation a [`FilterPass`] applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Nearest-texel copy.
    None,
    /// Bilinear resample; the usual downsample filter.
    LinearInterp,
    /// 9-tap gaussian along X, in source texels.
    BlurHorizontal,
    /// 9-tap gaussian along Y, in source texels.
    BlurVertical,
    /// Keeps light above a luminance knee (0.5, fully kept at 1.0).
    LightThreshold,
    /// 3x3 box blur.
    Blur3x3,
    /// 5x5 box blur.
    Blur5x5,
    /// Edge-aware smoothing with nearest sampling.
    Antialias,
    /// Edge-aware smoothing with bilinear sampling.
    AntialiasLinear,
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Filter::None => "none",
            Filter::LinearInterp => "linear-interp",
            Filter::BlurHorizontal => "blur-horizontal",
            Filter::BlurVertical => "blur-vertical",
            Filter::LightThreshold => "light-threshold",
            Filter::Blur3x3 => "blur-3x3",
            Filter::Blur5x5 => "blur-5x5",
            Filter::Antialias => "antialias",
            Filter::AntialiasLinear => "antialias-linear",
        }
    }
}

/// One filter instance: its program parameters, its own target and its own
/// memoization flag.
///
/// The filter kind, gamma factor and antialias switch are instance state,
/// not per-call arguments. Two roles therefore need two instances; the graph
/// refuses to wire one filter into two production consumers.
pub struct FilterPass<D: Device> {
    filter: Filter,
    gamma: f32,
    antialias: bool,
    sizing: Sizing,
    target: Option<RenderTarget<D::Target>>,
    evaluated: bool,
    valid: bool,
    evaluations: u64,
}

impl<D: Device> FilterPass<D> {
    /// Creates the pass and allocates its target for a `width`x`height` render.
    ///
    /// Allocation and program failures are logged; the pass then renders as
    /// absent until a later resize succeeds.
    pub fn new(device: &mut D, filter: Filter, sizing: Sizing, width: u32, height: u32) -> Self {
        if let Err(err) = device.prepare_program(ProgramKind::Filter(filter)) {
            warn!(filter = filter.name(), %err, "filter program unavailable");
        }
        let mut pass = Self {
            filter,
            gamma: 1.0,
            antialias: false,
            sizing,
            target: None,
            evaluated: false,
            valid: false,
            evaluations: 0,
        };
        pass.resize(device, width, height);
        pass
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Takes effect on the next evaluation after an invalidate.
    pub fn set_gamma(&mut self, gamma: f32) {
        self.gamma = gamma;
    }

    pub fn antialias(&self) -> bool {
        self.antialias
    }

    pub fn set_antialias(&mut self, antialias: bool) {
        self.antialias = antialias;
    }

    pub fn program(&self) -> Program {
        Program::new(ProgramKind::Filter(self.filter))
            .with_gamma(self.gamma)
            .with_antialias(self.antialias)
    }

    pub fn sizing(&self) -> Sizing {
        self.sizing
    }

    /// Target dimensions for a `width`x`height` render.
    ///
    /// ```
    /// # use renderdag::*;
    /// let mut device = SoftwareDevice::new(800, 600);
    /// let pass = FilterPass::new(&mut device, Filter::LinearInterp, Sizing::Viewport { scale: 0.3 }, 800, 600);
    /// assert_eq!(pass.size_for(800, 600), (240, 180));
    /// ```
    pub fn size_for(&self, width: u32, height: u32) -> (u32, u32) {
        self.sizing.resolve(width, height)
    }

    /// Reallocates the target only when the resolved size changed.
    pub fn resize(&mut self, device: &mut D, width: u32, height: u32) {
        let (w, h) = self.sizing.resolve(width, height);
        sync_target(
            &mut self.target,
            device,
            TargetDesc {
                width: w,
                height: h,
                depth: false,
                label: self.filter.name(),
            },
        );
    }

    pub fn invalidate(&mut self) {
        self.evaluated = false;
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Runs the filter once per frame; later calls return the memoized result.
    pub fn evaluate(
        &mut self,
        device: &mut D,
        primary: Option<&D::Target>,
        secondary: Option<&D::Target>,
    ) -> bool {
        if self.evaluated {
            return self.valid;
        }
        let program = self.program();
        self.valid = match self.target.as_mut() {
            Some(target) => {
                let mut bound = Bound::new(device, Destination::Target(target.resource_mut()));
                match bound.draw_with_program(&program, &[primary, secondary]) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(filter = self.filter.name(), %err, "filter pass failed");
                        false
                    }
                }
            }
            None => false,
        };
        self.evaluated = true;
        self.evaluations += 1;
        self.valid
    }

    /// The filtered image, present only after a successful evaluation.
    pub fn output(&self) -> Option<&D::Target> {
        if !(self.evaluated && self.valid) {
            return None;
        }
        self.target.as_ref().map(RenderTarget::resource)
    }

    pub fn target(&self) -> Option<&RenderTarget<D::Target>> {
        self.target.as_ref()
    }
}

/// Brings an optional owned target in line with `desc`.
///
/// Existing targets of the right size are kept. A failed allocation is
/// logged and leaves the slot empty.
pub(crate) fn sync_target<D: Device>(
    slot: &mut Option<RenderTarget<D::Target>>,
    device: &mut D,
    desc: TargetDesc,
) {
    let result = match slot.as_mut() {
        Some(target) => target.ensure_size(device, desc.width, desc.height).map(|_| ()),
        None => RenderTarget::new(device, desc).map(|target| *slot = Some(target)),
    };
    if let Err(err) = result {
        warn!(label = desc.label, %err, "render target unavailable");
        *slot = None;
    }
}
