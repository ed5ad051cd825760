//! Owned render targets for buffer-owning nodes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{Device, TargetDesc};
use crate::error::ResourceError;

/// An offscreen target owned by exactly one node.
///
/// Other nodes never hold a `RenderTarget`; they reach its pixels through the
/// producer's `output()` accessor, which only hands out shared borrows.
/// Reallocation replaces the resource wholesale and only happens when the
/// requested dimensions differ from the current allocation.
pub struct RenderTarget<T> {
    resource: T,
    width: u32,
    height: u32,
    depth: bool,
    label: &'static str,
    serial: u64,
}

impl<T> RenderTarget<T> {
    /// Allocates a new target through the device.
    pub fn new<D>(device: &mut D, desc: TargetDesc) -> Result<Self, ResourceError>
    where
        D: Device<Target = T>,
    {
        let resource = device.create_target(&desc)?;
        Ok(Self {
            resource,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            label: desc.label,
            serial: next_serial(),
        })
    }

    /// Wraps an already-created resource (e.g. an uploaded image).
    pub fn from_resource(resource: T, width: u32, height: u32) -> Self {
        Self {
            resource,
            width,
            height,
            depth: false,
            label: "source image",
            serial: next_serial(),
        }
    }

    /// Recreates the target if `(width, height)` differs from the allocation.
    ///
    /// Returns `true` when a new resource was allocated. On failure the old
    /// resource is kept untouched.
    pub fn ensure_size<D>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> Result<bool, ResourceError>
    where
        D: Device<Target = T>,
    {
        if self.width == width && self.height == height {
            return Ok(false);
        }
        let desc = TargetDesc {
            width,
            height,
            depth: self.depth,
            label: self.label,
        };
        *self = Self::new(device, desc)?;
        Ok(true)
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut T {
        &mut self.resource
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Allocation identity: changes every time the resource is recreated.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

fn next_serial() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
