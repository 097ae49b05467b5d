//! Lifecycle events and counters of the queue service.

pub mod metrics;

#[cfg(feature = "tracing-basic")]
pub mod subscriber;

pub use metrics::{LiveMetrics, MetricsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use subscriber::init_tracing;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::debug;

use crate::{
    broker::BoxStream,
    types::{ConsumerId, QueueEvent},
};

const EVENT_CAPACITY: usize = 1024;

/// Broadcasts [`QueueEvent`]s and keeps [`LiveMetrics`]
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<QueueEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    fn emit(&self, event: QueueEvent) {
        debug!("Queue event {} for {}", event.event_name(), event.queue_id());
        // Nobody listening is fine
        let _ = self.event_broadcaster.send(event);
    }

    pub fn record_initialised(&self, job_queue_id: &str) {
        self.emit(QueueEvent::Initialised {
            job_queue_id: job_queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_started(&self, queue_id: &str) {
        self.emit(QueueEvent::Started {
            queue_id: queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_stopped(&self, queue_id: &str) {
        self.emit(QueueEvent::Stopped {
            queue_id: queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_killed(&self, queue_id: &str, consumer_id: ConsumerId) {
        self.metrics.increment_killed();
        self.emit(QueueEvent::Killed {
            queue_id: queue_id.to_string(),
            consumer_id,
            at: Utc::now(),
        });
    }

    pub fn record_registered(&self, queue_id: &str) {
        self.metrics.increment_registered();
        self.emit(QueueEvent::Registered {
            queue_id: queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_deregistered(&self, queue_id: &str) {
        self.metrics.increment_deregistered();
        self.emit(QueueEvent::Deregistered {
            queue_id: queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_disposed(&self, queue_id: &str) {
        self.emit(QueueEvent::Disposed {
            queue_id: queue_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_submitted(&self, queue_id: &str, bean_id: &str, bean_type: &str) {
        self.metrics.increment_submitted();
        self.emit(QueueEvent::Submitted {
            queue_id: queue_id.to_string(),
            bean_id: bean_id.to_string(),
            bean_type: bean_type.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_terminate_requested(&self, queue_id: &str, bean_id: &str) {
        self.emit(QueueEvent::TerminateRequested {
            queue_id: queue_id.to_string(),
            bean_id: bean_id.to_string(),
            at: Utc::now(),
        });
    }

    pub fn record_command(&self, queue_id: &str, command: &str) {
        self.metrics.increment_commands();
        self.emit(QueueEvent::CommandSent {
            queue_id: queue_id.to_string(),
            command: command.to_string(),
            at: Utc::now(),
        });
    }

    /// Events emitted from now on; lagging readers skip what they missed
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|result| result.ok());
        Box::pin(stream)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_broadcaster.subscribe()
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
