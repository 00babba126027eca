//! Scheduler error types

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler-specific error types.
///
/// The core distinguishes invariant violations (bugs, fail fast, no
/// cycle proceeds in an inconsistent state) from configuration errors
/// (typed, state left unchanged). Capacity/constraint exhaustion is not
/// an error at all: it surfaces as `Application::server() == None`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("node '{0}' already exists under this parent")]
    DuplicateNode(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("application '{0}' already exists")]
    DuplicateApplication(String),

    #[error("application '{0}' not found")]
    ApplicationNotFound(String),

    #[error("allocation '{0}' not found")]
    AllocationNotFound(String),

    #[error("sub-allocation '{0}' already exists")]
    DuplicateAllocation(String),

    #[error("resource vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("capacity component must be non-negative, got {0}")]
    NegativeCapacity(f64),

    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    #[error("identity group '{0}' not found")]
    IdentityGroupNotFound(String),
}

impl SchedulerError {
    /// Classify the error for metrics/logging.
    pub fn category(&self) -> &'static str {
        match self {
            SchedulerError::DuplicateNode(_) => "duplicate_node",
            SchedulerError::NodeNotFound(_) => "node_not_found",
            SchedulerError::DuplicateApplication(_) => "duplicate_application",
            SchedulerError::ApplicationNotFound(_) => "application_not_found",
            SchedulerError::AllocationNotFound(_) => "allocation_not_found",
            SchedulerError::DuplicateAllocation(_) => "duplicate_allocation",
            SchedulerError::DimensionMismatch { .. } => "dimension_mismatch",
            SchedulerError::NegativeCapacity(_) => "negative_capacity",
            SchedulerError::UnknownLabel(_) => "unknown_label",
            SchedulerError::IdentityGroupNotFound(_) => "identity_not_found",
        }
    }

    /// Invariant violations are bugs: the caller attempted something the
    /// data model forbids outright, as opposed to a configuration mistake.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateNode(_)
                | SchedulerError::NodeNotFound(_)
                | SchedulerError::DuplicateApplication(_)
                | SchedulerError::ApplicationNotFound(_)
                | SchedulerError::AllocationNotFound(_)
                | SchedulerError::DuplicateAllocation(_)
        )
    }
}

#[macro_export]
macro_rules! dimension_mismatch {
    ($expected:expr, $actual:expr) => {
        $crate::error::SchedulerError::DimensionMismatch {
            expected: $expected,
            actual: $actual,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_errors() {
        let err = SchedulerError::NodeNotFound("a".into());
        assert_eq!(err.category(), "node_not_found");
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn configuration_errors_are_not_invariant_violations() {
        let err = SchedulerError::DimensionMismatch {
            expected: 2,
            actual: 3,
        };
        assert!(!err.is_invariant_violation());
    }
}
