//! Headless CPU implementation of [`Device`].
//!
//! Targets are plain [`RgbaImage`]s with an optional float depth buffer, and
//! the pixel programs run on the CPU (see [`kernels`]). This backend is what
//! the tests and the demo binary drive; it also offers knobs for simulating
//! allocation and program failures.

mod kernels;

use std::collections::HashSet;

use image::RgbaImage;
use tracing::trace;

use crate::device::{Destination, Device, Program, ProgramKind, Rgba, SurfaceKind, TargetDesc};
use crate::error::ResourceError;

/// A CPU render target.
pub struct SoftwareTarget {
    color: RgbaImage,
    depth: Option<Vec<f32>>,
}

impl SoftwareTarget {
    fn new(width: u32, height: u32, depth: bool) -> Self {
        Self {
            color: RgbaImage::new(width, height),
            depth: depth.then(|| vec![1.0; width as usize * height as usize]),
        }
    }

    /// Color contents as 8-bit RGBA.
    pub fn color(&self) -> &RgbaImage {
        &self.color
    }

    /// Row-major depth values in `0.0..=1.0`, if the target has depth.
    pub fn depth(&self) -> Option<&[f32]> {
        self.depth.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }
}

/// Call counters, for asserting how much work a frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub targets_created: u64,
    pub uploads: u64,
    pub binds: u64,
    pub clears: u64,
    pub draws: u64,
    pub frames: u64,
}

/// A [`Device`] that renders into plain `RgbaImage`s.
///
/// Runs headless with no GPU, which makes it the device of choice for
/// tests. [`stats`](Self::stats) counts every call, and the `fail_*` and
/// `lose_*` knobs inject the resource failures the pipeline must survive.
pub struct SoftwareDevice {
    scene: RgbaImage,
    overlay: RgbaImage,
    bind_depth: u32,
    stats: DeviceStats,
    max_target_pixels: Option<u64>,
    failing_programs: HashSet<ProgramKind>,
    lost_surfaces: HashSet<SurfaceKind>,
    failing_presents: HashSet<SurfaceKind>,
}

impl SoftwareDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            scene: RgbaImage::new(width, height),
            overlay: RgbaImage::new(width, height),
            bind_depth: 0,
            stats: DeviceStats::default(),
            max_target_pixels: None,
            failing_programs: HashSet::new(),
            lost_surfaces: HashSet::new(),
            failing_presents: HashSet::new(),
        }
    }

    /// Refuses to allocate targets larger than `pixels`.
    pub fn with_target_limit(mut self, pixels: u64) -> Self {
        self.max_target_pixels = Some(pixels);
        self
    }

    /// Makes `kind` fail to compile and draw.
    pub fn fail_program(&mut self, kind: ProgramKind) {
        self.failing_programs.insert(kind);
    }

    /// Makes `begin_frame` fail for `surface` until restored.
    pub fn lose_surface(&mut self, surface: SurfaceKind) {
        self.lost_surfaces.insert(surface);
    }

    pub fn restore_surface(&mut self, surface: SurfaceKind) {
        self.lost_surfaces.remove(&surface);
        self.failing_presents.remove(&surface);
    }

    /// Makes `end_frame` fail for `surface` until restored. The frame is
    /// drawn but never counted as presented.
    pub fn fail_present(&mut self, surface: SurfaceKind) {
        self.failing_presents.insert(surface);
    }

    pub fn surface(&self, kind: SurfaceKind) -> &RgbaImage {
        match kind {
            SurfaceKind::Scene => &self.scene,
            SurfaceKind::Overlay => &self.overlay,
        }
    }

    fn surface_mut(&mut self, kind: SurfaceKind) -> &mut RgbaImage {
        match kind {
            SurfaceKind::Scene => &mut self.scene,
            SurfaceKind::Overlay => &mut self.overlay,
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    /// Number of currently open [`Bound`](crate::device::Bound) guards.
    pub fn bind_depth(&self) -> u32 {
        self.bind_depth
    }

    /// The color image behind `dest`, for scenes that rasterize themselves.
    pub fn color_mut<'d>(
        &'d mut self,
        dest: &'d mut Destination<'_, SoftwareTarget>,
    ) -> &'d mut RgbaImage {
        match dest {
            Destination::Target(target) => &mut target.color,
            Destination::Surface(kind) => self.surface_mut(*kind),
        }
    }

    /// Fills a pixel rectangle, depth-tested when the destination has depth.
    ///
    /// Pixels are written only where `depth` is nearer than what is stored.
    pub fn fill_rect(
        &mut self,
        dest: &mut Destination<'_, SoftwareTarget>,
        rect: (u32, u32, u32, u32),
        color: Rgba,
        depth: f32,
    ) {
        let (x0, y0, w, h) = rect;
        let px = image::Rgba(kernels::to_u8(color));
        match dest {
            Destination::Target(target) => {
                let (tw, th) = (target.color.width(), target.color.height());
                for y in y0..(y0 + h).min(th) {
                    for x in x0..(x0 + w).min(tw) {
                        let index = (y * tw + x) as usize;
                        if let Some(buffer) = target.depth.as_mut() {
                            if depth >= buffer[index] {
                                continue;
                            }
                            buffer[index] = depth;
                        }
                        target.color.put_pixel(x, y, px);
                    }
                }
            }
            Destination::Surface(kind) => {
                let image = self.surface_mut(*kind);
                let (tw, th) = image.dimensions();
                for y in y0..(y0 + h).min(th) {
                    for x in x0..(x0 + w).min(tw) {
                        image.put_pixel(x, y, px);
                    }
                }
            }
        }
    }
}

impl Device for SoftwareDevice {
    type Target = SoftwareTarget;

    fn create_target(&mut self, desc: &TargetDesc) -> Result<SoftwareTarget, ResourceError> {
        let pixels = desc.width as u64 * desc.height as u64;
        let too_large = self.max_target_pixels.is_some_and(|max| pixels > max);
        if pixels == 0 || too_large {
            return Err(ResourceError::TargetAllocation {
                width: desc.width,
                height: desc.height,
                reason: format!("{} exceeds the software target limit", desc.label),
            });
        }
        self.stats.targets_created += 1;
        trace!(label = desc.label, width = desc.width, height = desc.height, "software target created");
        Ok(SoftwareTarget::new(desc.width, desc.height, desc.depth))
    }

    fn upload_image(&mut self, image: &RgbaImage) -> Result<SoftwareTarget, ResourceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ResourceError::Upload("image has no pixels".into()));
        }
        self.stats.uploads += 1;
        Ok(SoftwareTarget {
            color: image.clone(),
            depth: None,
        })
    }

    fn prepare_program(&mut self, kind: ProgramKind) -> Result<(), ResourceError> {
        if self.failing_programs.contains(&kind) {
            return Err(ResourceError::ProgramCompile {
                program: kind.name(),
                reason: "disabled on this device".into(),
            });
        }
        Ok(())
    }

    fn bind(&mut self, _dest: &Destination<'_, SoftwareTarget>) {
        self.bind_depth += 1;
        self.stats.binds += 1;
    }

    fn unbind(&mut self) {
        self.bind_depth = self.bind_depth.saturating_sub(1);
    }

    fn clear(&mut self, dest: &mut Destination<'_, SoftwareTarget>, color: Rgba) {
        self.stats.clears += 1;
        let px = image::Rgba(kernels::to_u8(color));
        if let Destination::Target(target) = dest {
            if let Some(depth) = target.depth.as_mut() {
                depth.fill(1.0);
            }
        }
        for pixel in self.color_mut(dest).pixels_mut() {
            *pixel = px;
        }
    }

    fn draw_with_program(
        &mut self,
        dest: &mut Destination<'_, SoftwareTarget>,
        program: &Program,
        inputs: &[Option<&SoftwareTarget>],
    ) -> Result<(), ResourceError> {
        self.prepare_program(program.kind)?;
        self.stats.draws += 1;
        let inputs: Vec<Option<&RgbaImage>> =
            inputs.iter().map(|input| input.map(|t| &t.color)).collect();
        kernels::run(self.color_mut(dest), program, &inputs);
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        for kind in SurfaceKind::ALL {
            let surface = self.surface_mut(kind);
            if surface.dimensions() != (width, height) {
                *surface = RgbaImage::new(width, height);
            }
        }
    }

    fn begin_frame(&mut self, surface: SurfaceKind) -> Result<(), ResourceError> {
        if self.lost_surfaces.contains(&surface) {
            return Err(ResourceError::Surface {
                surface,
                reason: "surface lost".into(),
            });
        }
        Ok(())
    }

    fn end_frame(&mut self, surface: SurfaceKind) -> Result<(), ResourceError> {
        if self.failing_presents.contains(&surface) {
            return Err(ResourceError::Surface {
                surface,
                reason: "present failed".into(),
            });
        }
        self.stats.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Bound;

    #[test]
    fn bound_guard_unbinds_on_drop() {
        let mut device = SoftwareDevice::new(4, 4);
        {
            let mut bound = Bound::new(&mut device, Destination::Surface(SurfaceKind::Scene));
            bound.clear([1.0, 0.0, 0.0, 1.0]);
        }
        assert_eq!(device.bind_depth(), 0);
        assert_eq!(device.stats().binds, 1);
        assert_eq!(device.surface(SurfaceKind::Scene).get_pixel(3, 3).0, [255, 0, 0, 255]);
        assert_eq!(device.surface(SurfaceKind::Overlay).get_pixel(3, 3).0, [0, 0, 0, 0]);
    }

    #[test]
    fn target_limit_fails_allocation() {
        let mut device = SoftwareDevice::new(4, 4).with_target_limit(16);
        let desc = TargetDesc {
            width: 4,
            height: 4,
            depth: false,
            label: "ok",
        };
        assert!(device.create_target(&desc).is_ok());
        let err = device
            .create_target(&TargetDesc { width: 5, ..desc })
            .err()
            .unwrap();
        assert!(matches!(err, ResourceError::TargetAllocation { width: 5, .. }));
        assert_eq!(device.stats().targets_created, 1);
    }

    #[test]
    fn fill_rect_respects_depth() {
        let mut device = SoftwareDevice::new(4, 4);
        let mut target = device
            .create_target(&TargetDesc {
                width: 4,
                height: 4,
                depth: true,
                label: "depth",
            })
            .unwrap();
        let mut dest = Destination::Target(&mut target);
        device.fill_rect(&mut dest, (0, 0, 4, 4), [1.0, 0.0, 0.0, 1.0], 0.5);
        device.fill_rect(&mut dest, (0, 0, 2, 2), [0.0, 1.0, 0.0, 1.0], 0.8);
        device.fill_rect(&mut dest, (2, 2, 9, 9), [0.0, 0.0, 1.0, 1.0], 0.2);

        assert_eq!(target.color().get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(target.color().get_pixel(3, 3).0, [0, 0, 255, 255]);
        assert_eq!(target.depth().map(|d| d[15]), Some(0.2));
    }

    #[test]
    fn failing_program_reports_compile_error() {
        let mut device = SoftwareDevice::new(2, 2);
        device.fail_program(ProgramKind::Composite);
        let mut dest = Destination::Surface(SurfaceKind::Scene);
        let program = Program::new(ProgramKind::Composite);
        assert!(matches!(
            device.draw_with_program(&mut dest, &program, &[None, None]),
            Err(ResourceError::ProgramCompile { program: "composite", .. })
        ));
        assert_eq!(device.stats().draws, 0);
    }

    #[test]
    fn resize_surface_reallocates_on_change() {
        let mut device = SoftwareDevice::new(2, 2);
        device.resize_surface(3, 5);
        assert_eq!(device.surface(SurfaceKind::Scene).dimensions(), (3, 5));
        assert_eq!(device.surface(SurfaceKind::Overlay).dimensions(), (3, 5));
    }
}
