use thiserror::Error;

use crate::types::{QueueStatus, Status};

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by queues, the queue service and the broker gateway
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Operation is not valid for the queue's current lifecycle status
    #[error("Cannot {operation} queue {queue_id} - Status: {status}")]
    InvalidState {
        queue_id: String,
        status: QueueStatus,
        operation: &'static str,
    },

    #[error("Queue is currently running. Cannot dispose.")]
    QueueRunning(String),

    #[error("Queue service has not been initialised")]
    ServiceNotInitialised,

    #[error("Queue service has already been initialised")]
    AlreadyInitialised,

    #[error("Queue service not started")]
    ServiceNotStarted,

    #[error("{0} has not been specified")]
    MissingConfig(&'static str),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Queue ID {0} not found in registry")]
    QueueNotFound(String),

    #[error("Queue {0} has already been disposed")]
    QueueDisposed(String),

    #[error("Bean is wrong type for queue {queue_id} (expected {expected})")]
    WrongQueueKind {
        queue_id: String,
        expected: &'static str,
    },

    #[error("Failed to clear queues of {0}")]
    ClearFailed(String),

    #[error("No processor registered for bean type '{0}'")]
    NoProcessor(String),

    #[error("Could not create processor for bean type '{bean_type}': {reason}")]
    ProcessorInstantiation { bean_type: String, reason: String },

    #[error("Bean {0} not found in submission queue or status set")]
    BeanNotFound(String),

    #[error("Cannot {operation} bean '{bean}' with status {status}")]
    IllegalBeanState {
        bean: String,
        status: Status,
        operation: &'static str,
    },

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessorError),
}

impl QueueError {
    pub(crate) fn invalid_state(
        queue_id: impl Into<String>,
        status: QueueStatus,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            queue_id: queue_id.into(),
            status,
            operation,
        }
    }

    /// Check whether this error came from the broker gateway
    pub fn is_broker(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Serialization(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Outcome reported by a processor that did not complete its bean
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Processing failed; the bean is marked FAILED
    #[error("{0}")]
    Failed(String),

    /// Processing stopped because termination was requested
    #[error("terminated on request")]
    Terminated,
}

impl ProcessorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl From<QueueError> for ProcessorError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Processing(inner) => inner,
            other => Self::Failed(other.to_string()),
        }
    }
}
