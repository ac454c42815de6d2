/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use miette::Diagnostic;
use thiserror::Error;

/// Signal subsystem result
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors raised while wiring a display's periodic source into the registry
///
/// Only source creation is surfaced to `subscribe` callers. Control errors
/// (pause/resume/release) are logged on the manager's queue and swallowed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SignalError {
    #[error("Failed to create periodic source for display {device}: {reason}")]
    #[diagnostic(
        code(signal::source_creation_failed),
        help("The display may have been disconnected. Retry later or run without frame pacing.")
    )]
    SourceCreation { device: u32, reason: String },

    #[error("Periodic source control failed for display {device}: {reason}")]
    #[diagnostic(
        code(signal::source_control_failed),
        help("The source could not be paused or resumed. Frames may be delivered late.")
    )]
    SourceControl { device: u32, reason: String },

    #[error("Failed to start dispatch queue: {0}")]
    #[diagnostic(
        code(signal::queue_spawn_failed),
        help("The OS refused to create a worker thread. Check thread limits.")
    )]
    QueueSpawn(String),

    #[error("Signal registry has been shut down")]
    #[diagnostic(
        code(signal::registry_closed),
        help("Create a new registry; subscriptions are not accepted after shutdown.")
    )]
    RegistryClosed,
}

/// Execution context errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ExecutorError {
    #[error("Execution queue is closed")]
    #[diagnostic(
        code(executor::closed),
        help("The queue's worker has exited or every receiver was dropped.")
    )]
    Closed,

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(code(executor::spawn_failed))]
    Spawn(String),
}

impl From<ExecutorError> for SignalError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Spawn(reason) => SignalError::QueueSpawn(reason),
            ExecutorError::Closed => SignalError::QueueSpawn("queue closed".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_maps_to_queue_spawn() {
        let err: SignalError = ExecutorError::Spawn("EAGAIN".into()).into();
        assert_eq!(err, SignalError::QueueSpawn("EAGAIN".into()));
    }

    #[test]
    fn test_source_creation_message() {
        let err = SignalError::SourceCreation {
            device: 3,
            reason: "no such display".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to create periodic source for display 3: no such display"
        );
    }
}
