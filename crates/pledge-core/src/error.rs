//! Error types for the deferred-value runtime
//!
//! Failures inside the settlement machinery never surface as Rust errors:
//! they become rejections carrying a [`Value`](crate::Value). [`FailureKind`]
//! classifies those recovered failures for logging and statistics. The
//! remaining enums cover the scheduler driver and configuration loading.

use thiserror::Error;

/// A failure recovered inside the resolution procedure or the scheduler and
/// converted into a rejection of the affected downstream value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FailureKind {
    /// A deferred value was resolved with itself
    #[error("Chaining cycle detected: a deferred value cannot be resolved with itself")]
    SelfReference,

    /// An `onFulfilled`/`onRejected` handler threw
    #[error("Reaction handler threw")]
    HandlerFailure,

    /// Reading the `then` member of a candidate thenable threw
    #[error("Reading `then` threw")]
    ThenAccessFailure,

    /// Calling a thenable's `then` member threw before either callback ran
    #[error("Calling `then` threw")]
    ThenInvocationFailure,
}

/// Errors reported while driving the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// `run_until_idle` hit the configured task budget with work still queued
    #[error("Task budget of {budget} exhausted with {remaining} task(s) still queued")]
    BudgetExhausted {
        /// Tasks allowed per drive
        budget: usize,
        /// Live tasks left in the queue
        remaining: usize,
    },
}

/// Errors produced while loading a [`RuntimeConfig`](crate::RuntimeConfig)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A setting could not be parsed
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Raw value that failed to parse
        value: String,
    },

    /// A setting parsed but is below its minimum
    #[error("{key} must be at least {min}, got {actual}")]
    OutOfRange {
        /// Setting name
        key: &'static str,
        /// Smallest accepted value
        min: usize,
        /// Value that was supplied
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_messages() {
        assert!(FailureKind::SelfReference.to_string().contains("itself"));
        assert_eq!(FailureKind::HandlerFailure.to_string(), "Reaction handler threw");
    }

    #[test]
    fn test_budget_message() {
        let err = SchedulerError::BudgetExhausted {
            budget: 10,
            remaining: 3,
        };
        assert_eq!(
            err.to_string(),
            "Task budget of 10 exhausted with 3 task(s) still queued"
        );
    }
}
