//! Queue service configuration.
//!
//! The service needs a queue root (prefix of every derived destination)
//! and a broker URI before `init()`. Both can be set directly or layered
//! from the environment:
//!
//! ```rust
//! use scan_queue::QueueServiceConfig;
//!
//! let config = QueueServiceConfig::new()
//!     .with_queue_root("i15-1")
//!     .with_uri("vm://localhost");
//! assert_eq!(config.heartbeat_capacity, 100);
//! ```
//!
//! ```bash
//! export SCANQ_QUEUE_ROOT=i15-1
//! export SCANQ_URI=vm://localhost
//! export SCANQ_HEARTBEAT_CAPACITY=250
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

/// Default number of heartbeats a monitor retains
pub const DEFAULT_HEARTBEAT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueServiceConfig {
    /// Prefix of every queue ID and destination name
    pub queue_root: Option<String>,
    /// Broker URI
    pub uri: Option<String>,
    /// Heartbeats retained per monitor
    pub heartbeat_capacity: usize,
}

impl Default for QueueServiceConfig {
    fn default() -> Self {
        Self {
            queue_root: None,
            uri: None,
            heartbeat_capacity: DEFAULT_HEARTBEAT_CAPACITY,
        }
    }
}

impl QueueServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_root(mut self, queue_root: impl Into<String>) -> Self {
        self.queue_root = Some(queue_root.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_heartbeat_capacity(mut self, capacity: usize) -> Self {
        self.heartbeat_capacity = capacity;
        self
    }

    /// Read `<prefix>QUEUE_ROOT`, `<prefix>URI` and
    /// `<prefix>HEARTBEAT_CAPACITY` from the process environment
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`from_env`](Self::from_env), over any key/value source
    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_ascii_uppercase(), value))
            })
            .collect();

        let mut config = Self::default();
        config.queue_root = values.get("QUEUE_ROOT").cloned();
        config.uri = values.get("URI").cloned();
        if let Some(raw) = values.get("HEARTBEAT_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) => config.heartbeat_capacity = capacity,
                Err(_) => warn!("Ignoring unparsable heartbeat capacity '{}'", raw),
            }
        }
        config
    }
}

/// Tuning of the in-memory broker
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    /// How long an idle consumer waits before polling its submission queue again
    pub poll_interval: Duration,
    /// Interval between heartbeats of a started consumer
    pub heartbeat_interval: Duration,
    /// Messages buffered per topic before slow subscribers start lagging
    pub topic_capacity: usize,
    /// Entries a status set holds before its oldest finished beans are dropped
    pub status_set_capacity: usize,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(2),
            topic_capacity: 1000,
            status_set_capacity: 1000,
        }
    }
}
