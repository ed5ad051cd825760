//! Error taxonomy for pipeline construction and per-frame rendering.
//!
//! Construction problems ([`ConfigurationError`]) abort assembly before any
//! frame is drawn. Resource problems ([`ResourceError`]) surface while
//! allocating targets or compiling programs; the graph logs them and renders
//! the affected node as absent instead of aborting the frame.

use crate::device::SurfaceKind;
use crate::render_graph::{NodeId, Slot};

/// Convenience result type for wiring and assembly.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Errors detected while building or rewiring a render graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The producer has nothing to sample (terminal nodes draw to a surface).
    #[error("node {producer:?} ({kind}) has no image output and cannot feed {consumer:?}")]
    NotAnImage {
        producer: NodeId,
        consumer: NodeId,
        kind: &'static str,
    },

    /// The edge would make a node reachable from its own inputs.
    #[error("connecting {producer:?} into {consumer:?} would create a cycle")]
    Cycle { producer: NodeId, consumer: NodeId },

    /// A filter instance is already serving another consumer.
    #[error("filter node {producer:?} already feeds {existing:?}; one filter instance per role")]
    SharedFilter { producer: NodeId, existing: NodeId },

    /// The consumer kind has no such input slot.
    #[error("{kind} node {consumer:?} has no {slot:?} input")]
    UnknownSlot {
        consumer: NodeId,
        slot: Slot,
        kind: &'static str,
    },

    /// The slot only accepts a specific producer kind.
    #[error("{slot:?} input of {consumer:?} expects a {expected} producer, got {found}")]
    WrongProducer {
        consumer: NodeId,
        slot: Slot,
        expected: &'static str,
        found: &'static str,
    },

    /// The id does not belong to this graph.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// A background image was requested that the image cache does not hold.
    #[error("image '{0}' is not registered in the image cache")]
    MissingImage(String),

    /// Option values outside their documented ranges.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    /// Build a [`ConfigurationError::Invalid`] value.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Errors raised by the graphics device while allocating or drawing.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("failed to allocate {width}x{height} render target: {reason}")]
    TargetAllocation {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("failed to compile program '{program}': {reason}")]
    ProgramCompile {
        program: &'static str,
        reason: String,
    },

    #[error("surface {surface:?} unavailable: {reason}")]
    Surface { surface: SurfaceKind, reason: String },

    #[error("failed to upload image: {0}")]
    Upload(String),
}

/// Top-level error for callers that drive the whole pipeline.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_name_the_nodes() {
        let err = ConfigurationError::Cycle {
            producer: NodeId(3),
            consumer: NodeId(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("NodeId(3)"));
        assert!(msg.contains("cycle"));
    }

    #[test]
    fn pipeline_error_wraps_both_classes() {
        let cfg: PipelineError = ConfigurationError::invalid("bad gamma").into();
        assert!(matches!(cfg, PipelineError::Configuration(_)));
        assert_eq!(cfg.to_string(), "invalid configuration: bad gamma");

        let res: PipelineError = ResourceError::Upload("empty image".into()).into();
        assert!(matches!(res, PipelineError::Resource(_)));
    }
}
