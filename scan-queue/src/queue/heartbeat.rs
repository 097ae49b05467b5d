use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::Queue;
use crate::{
    broker::{BrokerGateway, Subscriber},
    config::DEFAULT_HEARTBEAT_CAPACITY,
    types::{ConsumerId, HeartbeatBean, Queueable},
    QueueError, QueueResult,
};

/// Bounded, oldest-first heartbeat history
#[derive(Debug)]
pub struct HeartbeatRecorder {
    inner: RwLock<RecorderState>,
}

#[derive(Debug)]
struct RecorderState {
    capacity: usize,
    beats: VecDeque<HeartbeatBean>,
}

impl HeartbeatRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RecorderState {
                capacity,
                beats: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Append, evicting the oldest beats beyond capacity
    pub fn record(&self, beat: HeartbeatBean) {
        let mut state = self.inner.write();
        state.beats.push_back(beat);
        while state.beats.len() > state.capacity {
            state.beats.pop_front();
        }
    }

    pub fn latest(&self) -> Option<HeartbeatBean> {
        self.inner.read().beats.back().cloned()
    }

    pub fn recording(&self) -> Vec<HeartbeatBean> {
        self.inner.read().beats.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Takes effect immediately; shrinking drops the oldest beats
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.inner.write();
        state.capacity = capacity;
        let excess = state.beats.len().saturating_sub(capacity);
        state.beats.drain(..excess);
    }

    pub fn clear(&self) {
        self.inner.write().beats.clear();
    }
}

/// State reached from the subscription callback
struct Watch {
    target: RwLock<ConsumerId>,
    recorder: HeartbeatRecorder,
}

impl Watch {
    fn accept(&self, beat: HeartbeatBean) -> bool {
        if beat.consumer_id != *self.target.read() {
            return false;
        }
        self.recorder.record(beat);
        true
    }
}

/// Watches one consumer's heartbeats on a heartbeat topic
///
/// Beats from other consumers sharing the topic are discarded. Failing to
/// subscribe fails construction; there is no retry.
pub struct HeartbeatMonitor {
    topic: String,
    watch: Arc<Watch>,
    queue_id: RwLock<Option<String>>,
    locked: AtomicBool,
    subscriber: Box<dyn Subscriber<HeartbeatBean>>,
    disconnected: AtomicBool,
}

impl HeartbeatMonitor {
    pub async fn new<G: BrokerGateway>(
        gateway: &G,
        uri: &str,
        topic: &str,
        consumer_id: ConsumerId,
    ) -> QueueResult<Self> {
        Self::with_capacity(gateway, uri, topic, consumer_id, DEFAULT_HEARTBEAT_CAPACITY).await
    }

    pub async fn with_capacity<G: BrokerGateway>(
        gateway: &G,
        uri: &str,
        topic: &str,
        consumer_id: ConsumerId,
        capacity: usize,
    ) -> QueueResult<Self> {
        let subscriber = gateway.create_subscriber::<HeartbeatBean>(uri, topic).await?;
        let watch = Arc::new(Watch {
            target: RwLock::new(consumer_id),
            recorder: HeartbeatRecorder::new(capacity),
        });

        let sink = watch.clone();
        subscriber.add_listener(Arc::new(move |beat: HeartbeatBean| {
            sink.accept(beat);
        }))?;
        debug!("Monitoring heartbeats of {} on {}", consumer_id, topic);

        Ok(Self {
            topic: topic.to_string(),
            watch,
            queue_id: RwLock::new(None),
            locked: AtomicBool::new(false),
            subscriber,
            disconnected: AtomicBool::new(false),
        })
    }

    /// Monitor a queue's consumer; the result is locked to that consumer
    pub async fn for_queue<T, G>(queue: &Queue<T, G>, capacity: usize) -> QueueResult<Self>
    where
        T: Queueable,
        G: BrokerGateway,
    {
        let monitor = Self::with_capacity(
            queue.gateway().as_ref(),
            queue.uri(),
            &queue.names().heartbeat_topic_name,
            queue.consumer_id(),
            capacity,
        )
        .await?;
        monitor.set_queue_id(queue.queue_id());
        monitor.lock();
        Ok(monitor)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_id(&self) -> ConsumerId {
        *self.watch.target.read()
    }

    /// Watch a different consumer and forget the old one's beats
    pub fn set_consumer_id(&self, consumer_id: ConsumerId) -> QueueResult<()> {
        if self.is_locked() {
            return Err(QueueError::UnsupportedOperation(format!(
                "Heartbeat monitor is locked to consumer {}",
                self.consumer_id()
            )));
        }
        *self.watch.target.write() = consumer_id;
        self.watch.recorder.clear();
        info!("Heartbeat monitor on {} now follows {}", self.topic, consumer_id);
        Ok(())
    }

    /// Prevent any further change of consumer
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn queue_id(&self) -> Option<String> {
        self.queue_id.read().clone()
    }

    pub fn set_queue_id(&self, queue_id: impl Into<String>) {
        *self.queue_id.write() = Some(queue_id.into());
    }

    /// Apply the consumer filter to one beat; true if it was kept
    pub fn accept(&self, beat: HeartbeatBean) -> bool {
        self.watch.accept(beat)
    }

    pub fn latest(&self) -> Option<HeartbeatBean> {
        self.watch.recorder.latest()
    }

    pub fn recording(&self) -> Vec<HeartbeatBean> {
        self.watch.recorder.recording()
    }

    pub fn capacity(&self) -> usize {
        self.watch.recorder.capacity()
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.watch.recorder.set_capacity(capacity);
    }

    /// Stop listening; idempotent
    pub async fn disconnect(&self) -> QueueResult<()> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.subscriber.disconnect().await
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("topic", &self.topic)
            .field("consumer_id", &self.consumer_id())
            .field("queue_id", &self.queue_id())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConsumerStatus;

    fn beat(id: ConsumerId, sequence: u64) -> HeartbeatBean {
        let mut beat = HeartbeatBean::new(id, ConsumerStatus::Running);
        beat.sequence = sequence;
        beat
    }

    #[test]
    fn recorder_keeps_newest_within_capacity() {
        let recorder = HeartbeatRecorder::new(3);
        let id = ConsumerId::new();
        for sequence in 0..5 {
            recorder.record(beat(id, sequence));
        }
        let kept: Vec<u64> = recorder.recording().iter().map(|b| b.sequence).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(recorder.latest().map(|b| b.sequence), Some(4));
    }

    #[test]
    fn shrinking_capacity_truncates_oldest() {
        let recorder = HeartbeatRecorder::new(10);
        let id = ConsumerId::new();
        for sequence in 0..6 {
            recorder.record(beat(id, sequence));
        }
        recorder.set_capacity(2);
        let kept: Vec<u64> = recorder.recording().iter().map(|b| b.sequence).collect();
        assert_eq!(kept, vec![4, 5]);

        recorder.set_capacity(4);
        recorder.record(beat(id, 6));
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn empty_recorder_has_no_latest() {
        let recorder = HeartbeatRecorder::new(DEFAULT_HEARTBEAT_CAPACITY);
        assert!(recorder.is_empty());
        assert!(recorder.latest().is_none());
    }
}
