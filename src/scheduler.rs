//! Per-surface dirty tracking and frame driving.
//!
//! Each visible surface runs the state machine
//! `Clean -> (mark_dirty) -> Dirty -> (tick) -> Rendering -> Clean`.
//! A tick on a clean surface does nothing at all: no invalidation and no
//! evaluation, which is what keeps idle frames free.

use tracing::{debug, instrument, trace};

use crate::device::{Device, SurfaceKind};
use crate::error::ResourceError;
use crate::render_graph::{FrameContext, RenderGraph};
use crate::scene::Scene;

/// Where one surface is in its redraw cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameState {
    /// The last frame is current; ticks skip the surface.
    #[default]
    Clean,
    /// Something changed; the next tick renders the surface.
    Dirty,
    /// Inside a tick, between `begin_frame` and `end_frame`.
    Rendering,
}

/// Surfaces rendered during one [`FrameScheduler::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rendered: Vec<SurfaceKind>,
}

impl TickReport {
    /// True when the tick skipped every surface.
    pub fn is_idle(&self) -> bool {
        self.rendered.is_empty()
    }
}

/// Decides once per refresh tick whether each surface needs a new frame.
#[derive(Debug)]
pub struct FrameScheduler {
    states: [FrameState; 2],
    traversals: [u64; 2],
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn index(surface: SurfaceKind) -> usize {
    match surface {
        SurfaceKind::Scene => 0,
        SurfaceKind::Overlay => 1,
    }
}

impl FrameScheduler {
    /// Starts with every surface dirty so the first tick draws something.
    pub fn new() -> Self {
        Self {
            states: [FrameState::Dirty; 2],
            traversals: [0; 2],
        }
    }

    /// Requests a redraw of `surface` on the next tick.
    pub fn mark_dirty(&mut self, surface: SurfaceKind) {
        self.states[index(surface)] = FrameState::Dirty;
    }

    /// Requests a redraw of every surface.
    pub fn mark_all_dirty(&mut self) {
        for surface in SurfaceKind::ALL {
            self.mark_dirty(surface);
        }
    }

    /// Where `surface` is in its state machine. Outside a tick this is
    /// always `Clean` or `Dirty`.
    pub fn state(&self, surface: SurfaceKind) -> FrameState {
        self.states[index(surface)]
    }

    /// True when the next tick will render `surface`.
    pub fn is_dirty(&self, surface: SurfaceKind) -> bool {
        self.state(surface) == FrameState::Dirty
    }

    /// Number of full invalidate+evaluate passes run for `surface`.
    pub fn traversals(&self, surface: SurfaceKind) -> u64 {
        self.traversals[index(surface)]
    }

    /// Resizes the device surfaces and every node reachable from a sink, then
    /// marks everything dirty.
    pub fn resize<D: Device>(
        &mut self,
        graph: &mut RenderGraph<D>,
        device: &mut D,
        width: u32,
        height: u32,
    ) {
        device.resize_surface(width, height);
        graph.resize(device, width, height);
        self.mark_all_dirty();
    }

    /// Renders every dirty surface: invalidate all of its sinks, then
    /// evaluate them in registration order.
    ///
    /// Clean surfaces cost nothing. A surface whose frame cannot begin or
    /// cannot be presented stays dirty, is left out of the report and does
    /// not count a traversal; the error is returned and surfaces already
    /// rendered this tick stay clean.
    ///
    /// # Arguments
    ///
    /// * `graph` - Graph whose sinks drive each surface
    /// * `device` - Device that owns the surfaces
    /// * `scene` - Host scene drawn by capture and shadow nodes
    ///
    /// # Example
    ///
    /// ```no_run
    /// use renderdag::*;
    ///
    /// fn refresh<D: Device>(
    ///     scheduler: &mut FrameScheduler,
    ///     graph: &mut RenderGraph<D>,
    ///     device: &mut D,
    ///     scene: &mut dyn Scene<D>,
    ///     animating: bool,
    /// ) -> Result<(), ResourceError> {
    ///     if animating {
    ///         scheduler.mark_dirty(SurfaceKind::Scene);
    ///     }
    ///     let report = scheduler.tick(graph, device, scene)?;
    ///     if report.is_idle() {
    ///         // Nothing changed: no node ran and nothing was presented.
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[instrument(level = "trace", skip_all)]
    pub fn tick<D: Device>(
        &mut self,
        graph: &mut RenderGraph<D>,
        device: &mut D,
        scene: &mut dyn Scene<D>,
    ) -> Result<TickReport, ResourceError> {
        let mut report = TickReport::default();
        for surface in SurfaceKind::ALL {
            let slot = index(surface);
            if self.states[slot] != FrameState::Dirty {
                continue;
            }
            if graph.sinks(surface).is_empty() {
                self.states[slot] = FrameState::Clean;
                continue;
            }

            self.states[slot] = FrameState::Rendering;
            if let Err(err) = device.begin_frame(surface) {
                self.states[slot] = FrameState::Dirty;
                return Err(err);
            }
            graph.invalidate_sinks(surface);
            {
                let mut cx = FrameContext::new(&mut *device, &mut *scene);
                graph.evaluate_sinks(surface, &mut cx);
            }
            if let Err(err) = device.end_frame(surface) {
                self.states[slot] = FrameState::Dirty;
                return Err(err);
            }
            self.states[slot] = FrameState::Clean;
            self.traversals[slot] += 1;
            report.rendered.push(surface);
            trace!(?surface, traversal = self.traversals[slot], "frame rendered");
        }
        if !report.is_idle() {
            debug!(rendered = ?report.rendered, "tick");
        }
        Ok(report)
    }
}
