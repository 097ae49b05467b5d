//! Broker destination naming.
//!
//! Every destination a queue touches is derived from its queue ID plus a
//! fixed suffix, so two queues only share a destination name when they
//! share an ID. Heartbeat and command destinations are normally shared by
//! every queue of one service and are derived from the service's queue
//! root instead.

use serde::{Deserialize, Serialize};

pub const SUBMISSION_QUEUE_SUFFIX: &str = ".submission.queue";
pub const STATUS_SET_SUFFIX: &str = ".status.queue";
pub const STATUS_TOPIC_SUFFIX: &str = ".status.topic";
pub const HEARTBEAT_TOPIC_SUFFIX: &str = ".heartbeat.topic";
pub const COMMAND_SET_SUFFIX: &str = ".command.queue";
pub const COMMAND_TOPIC_SUFFIX: &str = ".command.topic";

pub const JOB_QUEUE_SUFFIX: &str = ".job-queue";
pub const ACTIVE_QUEUE_PREFIX: &str = ".active-queue-";
pub const ACTIVE_QUEUE_SUFFIX: &str = ".atoms";

/// Destination names of one queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueNameMap {
    pub submission_queue_name: String,
    pub status_set_name: String,
    pub status_topic_name: String,
    pub heartbeat_topic_name: String,
    pub command_set_name: String,
    pub command_topic_name: String,
}

impl QueueNameMap {
    /// Derive every destination from the queue ID
    pub fn for_queue(queue_id: &str) -> Self {
        Self {
            submission_queue_name: format!("{queue_id}{SUBMISSION_QUEUE_SUFFIX}"),
            status_set_name: format!("{queue_id}{STATUS_SET_SUFFIX}"),
            status_topic_name: format!("{queue_id}{STATUS_TOPIC_SUFFIX}"),
            heartbeat_topic_name: format!("{queue_id}{HEARTBEAT_TOPIC_SUFFIX}"),
            command_set_name: format!("{queue_id}{COMMAND_SET_SUFFIX}"),
            command_topic_name: format!("{queue_id}{COMMAND_TOPIC_SUFFIX}"),
        }
    }

    /// Queue-specific destinations, with heartbeats and commands on the
    /// service-wide destinations
    pub fn for_service_queue(queue_id: &str, shared: &ServiceDestinations) -> Self {
        Self {
            heartbeat_topic_name: shared.heartbeat_topic_name.clone(),
            command_set_name: shared.command_set_name.clone(),
            command_topic_name: shared.command_topic_name.clone(),
            ..Self::for_queue(queue_id)
        }
    }

    pub fn with_heartbeat_topic(mut self, topic: impl Into<String>) -> Self {
        self.heartbeat_topic_name = topic.into();
        self
    }

    pub fn with_command_destinations(
        mut self,
        command_set: impl Into<String>,
        command_topic: impl Into<String>,
    ) -> Self {
        self.command_set_name = command_set.into();
        self.command_topic_name = command_topic.into();
        self
    }
}

/// Heartbeat and command destinations shared by all queues of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDestinations {
    pub heartbeat_topic_name: String,
    pub command_set_name: String,
    pub command_topic_name: String,
}

impl ServiceDestinations {
    pub fn for_root(queue_root: &str) -> Self {
        Self {
            heartbeat_topic_name: format!("{queue_root}{HEARTBEAT_TOPIC_SUFFIX}"),
            command_set_name: format!("{queue_root}{COMMAND_SET_SUFFIX}"),
            command_topic_name: format!("{queue_root}{COMMAND_TOPIC_SUFFIX}"),
        }
    }
}

/// ID of the job queue of a service rooted at `queue_root`
pub fn job_queue_id(queue_root: &str) -> String {
    format!("{queue_root}{JOB_QUEUE_SUFFIX}")
}

/// Candidate ID for an active queue; `index` is the registry size and
/// `nonce` a random three-digit number
pub fn active_queue_id(queue_root: &str, index: usize, nonce: u16) -> String {
    format!("{queue_root}{ACTIVE_QUEUE_PREFIX}{index}-{nonce:03}{ACTIVE_QUEUE_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn all_names(map: &QueueNameMap) -> [&str; 6] {
        [
            map.submission_queue_name.as_str(),
            map.status_set_name.as_str(),
            map.status_topic_name.as_str(),
            map.heartbeat_topic_name.as_str(),
            map.command_set_name.as_str(),
            map.command_topic_name.as_str(),
        ]
    }

    #[test]
    fn names_follow_suffix_table() {
        let map = QueueNameMap::for_queue("i15-1.job-queue");
        assert_eq!(map.submission_queue_name, "i15-1.job-queue.submission.queue");
        assert_eq!(map.status_set_name, "i15-1.job-queue.status.queue");
        assert_eq!(map.status_topic_name, "i15-1.job-queue.status.topic");
        assert_eq!(map.heartbeat_topic_name, "i15-1.job-queue.heartbeat.topic");
        assert_eq!(map.command_set_name, "i15-1.job-queue.command.queue");
        assert_eq!(map.command_topic_name, "i15-1.job-queue.command.topic");
    }

    #[test]
    fn service_queue_shares_heartbeat_and_commands() {
        let shared = ServiceDestinations::for_root("i15-1");
        let map = QueueNameMap::for_service_queue("i15-1.job-queue", &shared);
        assert_eq!(map.heartbeat_topic_name, "i15-1.heartbeat.topic");
        assert_eq!(map.command_topic_name, "i15-1.command.topic");
        assert_eq!(map.submission_queue_name, "i15-1.job-queue.submission.queue");
    }

    #[test]
    fn active_queue_ids_are_zero_padded() {
        assert_eq!(active_queue_id("root", 2, 7), "root.active-queue-2-007.atoms");
    }

    proptest! {
        #[test]
        fn names_are_deterministic(id in "[a-z0-9.-]{1,24}") {
            prop_assert_eq!(QueueNameMap::for_queue(&id), QueueNameMap::for_queue(&id));
            let map = QueueNameMap::for_queue(&id);
            prop_assert_eq!(map.submission_queue_name, format!("{id}{SUBMISSION_QUEUE_SUFFIX}"));
        }

        #[test]
        fn distinct_active_queues_never_collide(
            root in "[a-z]{1,8}",
            a in (0usize..50, 0u16..999),
            b in (0usize..50, 0u16..999),
        ) {
            prop_assume!(a != b);
            let first = QueueNameMap::for_queue(&active_queue_id(&root, a.0, a.1));
            let second = QueueNameMap::for_queue(&active_queue_id(&root, b.0, b.1));
            let first: HashSet<&str> = all_names(&first).into_iter().collect();
            for name in all_names(&second) {
                prop_assert!(!first.contains(name));
            }
        }
    }
}
