use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConsumerId;

/// Coarse state a consumer reports in its heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerStatus {
    Starting,
    Running,
    Paused,
    Stopped,
}

/// Periodic liveness message published by a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBean {
    pub consumer_id: ConsumerId,
    pub consumer_name: Option<String>,
    pub consumer_status: ConsumerStatus,
    pub host_name: Option<String>,
    pub beamline: Option<String>,
    /// When this beat was published
    pub publish_time: DateTime<Utc>,
    /// When the heartbeating consumer started
    pub conception_time: DateTime<Utc>,
    /// Beats published by this consumer so far
    pub sequence: u64,
}

impl HeartbeatBean {
    pub fn new(consumer_id: ConsumerId, consumer_status: ConsumerStatus) -> Self {
        let now = Utc::now();
        Self {
            consumer_id,
            consumer_name: None,
            consumer_status,
            host_name: None,
            beamline: None,
            publish_time: now,
            conception_time: now,
            sequence: 0,
        }
    }
}

/// Asks a consumer to terminate, out of band from submission traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillBean {
    pub consumer_id: ConsumerId,
    /// Release the consumer's broker connection as well
    pub disconnect: bool,
    pub restart: bool,
    /// Terminate the hosting process
    pub exit_process: bool,
    pub message: Option<String>,
}

impl KillBean {
    pub fn new(consumer_id: ConsumerId, disconnect: bool, exit_process: bool) -> Self {
        Self {
            consumer_id,
            disconnect,
            restart: false,
            exit_process,
            message: None,
        }
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }
}

/// Asks a consumer to stop (or resume) pulling new beans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseBean {
    pub consumer_id: ConsumerId,
    pub pause: bool,
}

impl PauseBean {
    pub fn pause(consumer_id: ConsumerId) -> Self {
        Self {
            consumer_id,
            pause: true,
        }
    }

    pub fn resume(consumer_id: ConsumerId) -> Self {
        Self {
            consumer_id,
            pause: false,
        }
    }
}

/// Everything that travels on a command topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ConsumerCommand {
    Kill(KillBean),
    Pause(PauseBean),
}

impl ConsumerCommand {
    /// The consumer this command is addressed to
    pub fn consumer_id(&self) -> ConsumerId {
        match self {
            Self::Kill(kill) => kill.consumer_id,
            Self::Pause(pause) => pause.consumer_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Kill(_) => "kill",
            Self::Pause(pause) if pause.pause => "pause",
            Self::Pause(_) => "resume",
        }
    }
}

impl From<KillBean> for ConsumerCommand {
    fn from(kill: KillBean) -> Self {
        Self::Kill(kill)
    }
}

impl From<PauseBean> for ConsumerCommand {
    fn from(pause: PauseBean) -> Self {
        Self::Pause(pause)
    }
}

/// Receipt for a broadcast command
///
/// A receipt only says the command was handed to the broker. It does not
/// confirm that the addressed consumer received or honoured it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSent {
    pub consumer_id: ConsumerId,
    pub topic: String,
    pub command: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_tagged_on_the_wire() {
        let id = ConsumerId::new();
        let json = serde_json::to_value(ConsumerCommand::from(PauseBean::pause(id))).unwrap();
        assert_eq!(json["command"], "pause");
        assert_eq!(json["pause"], true);

        let back: ConsumerCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back.consumer_id(), id);
        assert_eq!(back.name(), "pause");
    }

    #[test]
    fn resume_is_a_pause_bean_with_pause_false() {
        let command = ConsumerCommand::from(PauseBean::resume(ConsumerId::new()));
        assert_eq!(command.name(), "resume");
    }
}
