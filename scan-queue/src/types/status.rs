use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a queue
///
/// `Initialised -> Started <-> Stopped -> Disposed`, with `Killed`
/// reachable from `Started` or `Stopped` as the forced alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Initialised,
    Started,
    Stopped,
    Disposed,
    Killed,
}

impl QueueStatus {
    /// A queue may only be started from `Initialised` or `Stopped`
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Initialised | Self::Stopped)
    }

    /// Only a `Started` queue is active
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// No further start is possible
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Disposed | Self::Killed)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialised => "INITIALISED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Disposed => "DISPOSED",
            Self::Killed => "KILLED",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a single bean as it travels through a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    None,
    Submitted,
    Queued,
    Running,
    RequestPause,
    Paused,
    RequestResume,
    Resumed,
    RequestTerminate,
    Terminated,
    Complete,
    Failed,
}

impl Status {
    /// Bean will not change status again
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminated | Self::Complete | Self::Failed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Resumed)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::RequestPause | Self::Paused)
    }

    pub fn is_resumed(&self) -> bool {
        matches!(self, Self::RequestResume | Self::Resumed)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::RequestTerminate | Self::Terminated)
    }

    /// Bean is somewhere between being picked up and finishing
    pub fn is_active(&self) -> bool {
        self.is_running() || self.is_paused() || matches!(self, Self::RequestResume)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Submitted => "SUBMITTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::RequestPause => "REQUEST_PAUSE",
            Self::Paused => "PAUSED",
            Self::RequestResume => "REQUEST_RESUME",
            Self::Resumed => "RESUMED",
            Self::RequestTerminate => "REQUEST_TERMINATE",
            Self::Terminated => "TERMINATED",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_initialised_and_stopped_are_startable() {
        assert!(QueueStatus::Initialised.is_startable());
        assert!(QueueStatus::Stopped.is_startable());
        assert!(!QueueStatus::Started.is_startable());
        assert!(!QueueStatus::Disposed.is_startable());
        assert!(!QueueStatus::Killed.is_startable());
    }

    #[test]
    fn only_started_is_active() {
        for status in [
            QueueStatus::Initialised,
            QueueStatus::Stopped,
            QueueStatus::Disposed,
            QueueStatus::Killed,
        ] {
            assert!(!status.is_active(), "{status} should not be active");
        }
        assert!(QueueStatus::Started.is_active());
    }

    #[test]
    fn bean_status_classes() {
        assert!(Status::Complete.is_final());
        assert!(Status::Failed.is_final());
        assert!(Status::Terminated.is_final());
        assert!(!Status::RequestTerminate.is_final());
        assert!(Status::RequestTerminate.is_terminated());
        assert!(Status::Paused.is_active());
        assert!(!Status::Submitted.is_active());
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&Status::RequestTerminate).unwrap();
        assert_eq!(json, "\"REQUEST_TERMINATE\"");
        let json = serde_json::to_string(&QueueStatus::Initialised).unwrap();
        assert_eq!(json, "\"INITIALISED\"");
    }
}
