use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConsumerId;

/// Lifecycle events emitted by the queue service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Service was initialised and its job queue created
    Initialised {
        job_queue_id: String,
        at: DateTime<Utc>,
    },

    /// A queue was started
    Started { queue_id: String, at: DateTime<Utc> },

    /// A queue was stopped gracefully
    Stopped { queue_id: String, at: DateTime<Utc> },

    /// A kill command was broadcast for a queue's consumer
    Killed {
        queue_id: String,
        consumer_id: ConsumerId,
        at: DateTime<Utc>,
    },

    /// A new active queue joined the registry
    Registered { queue_id: String, at: DateTime<Utc> },

    /// An active queue left the registry
    Deregistered { queue_id: String, at: DateTime<Utc> },

    /// A queue released its destinations
    Disposed { queue_id: String, at: DateTime<Utc> },

    /// A bean was submitted to a queue
    Submitted {
        queue_id: String,
        bean_id: String,
        bean_type: String,
        at: DateTime<Utc>,
    },

    /// Termination of a bean was requested on a status topic
    TerminateRequested {
        queue_id: String,
        bean_id: String,
        at: DateTime<Utc>,
    },

    /// A pause or resume command was broadcast
    CommandSent {
        queue_id: String,
        command: String,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Initialised { .. } => "initialised",
            Self::Started { .. } => "started",
            Self::Stopped { .. } => "stopped",
            Self::Killed { .. } => "killed",
            Self::Registered { .. } => "registered",
            Self::Deregistered { .. } => "deregistered",
            Self::Disposed { .. } => "disposed",
            Self::Submitted { .. } => "submitted",
            Self::TerminateRequested { .. } => "terminate_requested",
            Self::CommandSent { .. } => "command_sent",
        }
    }

    /// Get the queue ID from any event
    pub fn queue_id(&self) -> &str {
        match self {
            Self::Initialised { job_queue_id, .. } => job_queue_id,
            Self::Started { queue_id, .. }
            | Self::Stopped { queue_id, .. }
            | Self::Killed { queue_id, .. }
            | Self::Registered { queue_id, .. }
            | Self::Deregistered { queue_id, .. }
            | Self::Disposed { queue_id, .. }
            | Self::Submitted { queue_id, .. }
            | Self::TerminateRequested { queue_id, .. }
            | Self::CommandSent { queue_id, .. } => queue_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Initialised { at, .. }
            | Self::Started { at, .. }
            | Self::Stopped { at, .. }
            | Self::Killed { at, .. }
            | Self::Registered { at, .. }
            | Self::Deregistered { at, .. }
            | Self::Disposed { at, .. }
            | Self::Submitted { at, .. }
            | Self::TerminateRequested { at, .. }
            | Self::CommandSent { at, .. } => at,
        }
    }
}
