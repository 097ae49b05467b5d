//! In-process broker.
//!
//! Named queues and sets hold JSON messages in FIFO order; topics are
//! tokio broadcast channels. Every connection created by one
//! [`MemoryBroker`] (or its clones) sees the same destinations.

mod consumer;

pub use consumer::MemoryConsumer;

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    broker::{BrokerGateway, Consumer, Listener, Message, Publisher, Submitter, Subscriber},
    config::MemoryBrokerConfig,
    names::QueueNameMap,
    types::{Queueable, Status},
    QueueError, QueueResult,
};

const SUPPORTED_SCHEMES: [&str; 2] = ["vm://", "memory://"];

/// Key the memory broker uses to find a bean inside a queue or set
const UNIQUE_ID_KEY: &str = "uniqueId";

pub(crate) fn check_uri(uri: &str) -> QueueResult<()> {
    if SUPPORTED_SCHEMES.iter().any(|scheme| uri.starts_with(scheme)) {
        Ok(())
    } else {
        Err(QueueError::Broker(format!(
            "Unsupported broker URI '{}' (expected vm:// or memory://)",
            uri
        )))
    }
}

fn unique_id(message: &Value) -> Option<&str> {
    message.get(UNIQUE_ID_KEY).and_then(Value::as_str)
}

/// Destinations shared by every connection of one broker
fn is_finished(message: &Value) -> bool {
    message
        .get("status")
        .and_then(|status| serde_json::from_value::<Status>(status.clone()).ok())
        .is_some_and(|status| status.is_final())
}

pub(crate) struct BrokerState {
    pub(crate) config: MemoryBrokerConfig,
    destinations: RwLock<HashMap<String, VecDeque<Value>>>,
    topics: RwLock<HashMap<String, broadcast::Sender<Value>>>,
}

impl BrokerState {
    fn new(config: MemoryBrokerConfig) -> Self {
        Self {
            config,
            destinations: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn push_back(&self, name: &str, message: Value) {
        self.destinations
            .write()
            .entry(name.to_string())
            .or_default()
            .push_back(message);
    }

    pub(crate) fn pop_front(&self, name: &str) -> Option<Value> {
        self.destinations.write().get_mut(name)?.pop_front()
    }

    /// Replace the entry with the same unique ID, or append
    pub(crate) fn upsert(&self, name: &str, message: Value) {
        let mut destinations = self.destinations.write();
        let entries = destinations.entry(name.to_string()).or_default();
        let existing = unique_id(&message).and_then(|id| {
            entries
                .iter()
                .position(|entry| unique_id(entry) == Some(id))
        });
        match existing {
            Some(index) => entries[index] = message,
            None => entries.push_back(message),
        }

        // Only finished beans are dropped; live ones stay however many there are
        while entries.len() > self.config.status_set_capacity {
            match entries.iter().position(is_finished) {
                Some(index) => {
                    entries.remove(index);
                }
                None => break,
            }
        }
    }

    pub(crate) fn snapshot(&self, name: &str) -> Vec<Value> {
        self.destinations
            .read()
            .get(name)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self, name: &str) -> usize {
        self.destinations.read().get(name).map_or(0, VecDeque::len)
    }

    pub(crate) fn clear(&self, name: &str) {
        if let Some(entries) = self.destinations.write().get_mut(name) {
            entries.clear();
        }
    }

    pub(crate) fn remove(&self, name: &str, id: &str) -> Option<Value> {
        let mut destinations = self.destinations.write();
        let entries = destinations.get_mut(name)?;
        let index = entries.iter().position(|entry| unique_id(entry) == Some(id))?;
        entries.remove(index)
    }

    /// Move an entry; positive `amount` moves it towards the head
    pub(crate) fn reorder(&self, name: &str, id: &str, amount: i32) -> bool {
        let mut destinations = self.destinations.write();
        let Some(entries) = destinations.get_mut(name) else {
            return false;
        };
        let Some(index) = entries.iter().position(|entry| unique_id(entry) == Some(id)) else {
            return false;
        };
        let last = entries.len().saturating_sub(1) as i64;
        let target = (index as i64 - i64::from(amount)).clamp(0, last) as usize;
        if target == index {
            return false;
        }
        match entries.remove(index) {
            Some(entry) => {
                entries.insert(target, entry);
                true
            }
            None => false,
        }
    }

    pub(crate) fn topic(&self, name: &str) -> broadcast::Sender<Value> {
        if let Some(sender) = self.topics.read().get(name) {
            return sender.clone();
        }
        self.topics
            .write()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.config.topic_capacity).0)
            .clone()
    }

    pub(crate) fn publish(&self, topic: &str, message: Value) {
        // No subscribers is not an error for a topic
        let _ = self.topic(topic).send(message);
    }
}

/// Spawn a task that hands every message on `topic` to `listener`
///
/// The receiver is created before this returns, so nothing published
/// afterwards is missed.
pub(crate) fn spawn_listener<M: Message>(
    state: &BrokerState,
    topic: &str,
    listener: Listener<M>,
) -> JoinHandle<()> {
    let mut receiver = state.topic(topic).subscribe();
    let topic = topic.to_string();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(value) => match serde_json::from_value::<M>(value) {
                    Ok(message) => listener(message),
                    Err(e) => debug!("Skipping unreadable message on {}: {}", topic, e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Listener on {} lagged, skipped {} messages", topic, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Gateway over in-process destinations
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_config(MemoryBrokerConfig::default())
    }

    pub fn with_config(config: MemoryBrokerConfig) -> Self {
        Self {
            state: Arc::new(BrokerState::new(config)),
        }
    }

    pub fn config(&self) -> &MemoryBrokerConfig {
        &self.state.config
    }

    /// Messages currently held in a queue or set, head first
    pub fn messages(&self, name: &str) -> Vec<Value> {
        self.state.snapshot(name)
    }

    pub fn queue_len(&self, name: &str) -> usize {
        self.state.len(name)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for MemoryBroker {
    async fn create_consumer<T: Queueable>(
        &self,
        uri: &str,
        names: &QueueNameMap,
    ) -> QueueResult<Arc<dyn Consumer<T>>> {
        check_uri(uri)?;
        let consumer = MemoryConsumer::<T>::new(self.state.clone(), names.clone());
        Ok(Arc::new(consumer))
    }

    async fn create_publisher<M: Message>(
        &self,
        uri: &str,
        topic: &str,
    ) -> QueueResult<Box<dyn Publisher<M>>> {
        check_uri(uri)?;
        Ok(Box::new(MemoryPublisher::new(self.state.clone(), topic)))
    }

    async fn create_submitter<T: Queueable>(
        &self,
        uri: &str,
        queue: &str,
    ) -> QueueResult<Box<dyn Submitter<T>>> {
        check_uri(uri)?;
        Ok(Box::new(MemorySubmitter::<T>::new(self.state.clone(), queue)))
    }

    async fn create_subscriber<M: Message>(
        &self,
        uri: &str,
        topic: &str,
    ) -> QueueResult<Box<dyn Subscriber<M>>> {
        check_uri(uri)?;
        Ok(Box::new(MemorySubscriber::<M>::new(self.state.clone(), topic)))
    }
}

pub struct MemoryPublisher<M> {
    state: Arc<BrokerState>,
    topic: String,
    status_set: Option<String>,
    connected: AtomicBool,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> MemoryPublisher<M> {
    pub(crate) fn new(state: Arc<BrokerState>, topic: &str) -> Self {
        Self {
            state,
            topic: topic.to_string(),
            status_set: None,
            connected: AtomicBool::new(true),
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message> Publisher<M> for MemoryPublisher<M> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn set_status_set(&mut self, set_name: &str) {
        self.status_set = Some(set_name.to_string());
    }

    async fn broadcast(&self, message: &M) -> QueueResult<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(QueueError::Broker(format!(
                "Publisher on {} is disconnected",
                self.topic
            )));
        }
        let value = serde_json::to_value(message)?;
        if let Some(set) = &self.status_set {
            self.state.upsert(set, value.clone());
        }
        self.state.publish(&self.topic, value);
        Ok(())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

pub struct MemorySubmitter<T> {
    state: Arc<BrokerState>,
    queue: String,
    connected: AtomicBool,
    _bean: PhantomData<fn(T)>,
}

impl<T: Queueable> MemorySubmitter<T> {
    pub(crate) fn new(state: Arc<BrokerState>, queue: &str) -> Self {
        Self {
            state,
            queue: queue.to_string(),
            connected: AtomicBool::new(true),
            _bean: PhantomData,
        }
    }

    fn ensure_connected(&self) -> QueueResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QueueError::Broker(format!(
                "Submitter for {} is disconnected",
                self.queue
            )))
        }
    }
}

#[async_trait]
impl<T: Queueable> Submitter<T> for MemorySubmitter<T> {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn submit(&self, bean: &T) -> QueueResult<()> {
        self.ensure_connected()?;
        self.state.push_back(&self.queue, serde_json::to_value(bean)?);
        Ok(())
    }

    async fn remove(&self, bean: &T) -> QueueResult<bool> {
        self.ensure_connected()?;
        Ok(self.state.remove(&self.queue, bean.unique_id()).is_some())
    }

    async fn reorder(&self, bean: &T, amount: i32) -> QueueResult<bool> {
        self.ensure_connected()?;
        Ok(self.state.reorder(&self.queue, bean.unique_id(), amount))
    }

    async fn disconnect(&self) -> QueueResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

pub struct MemorySubscriber<M> {
    state: Arc<BrokerState>,
    topic: String,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    _message: PhantomData<fn(M)>,
}

impl<M: Message> MemorySubscriber<M> {
    pub(crate) fn new(state: Arc<BrokerState>, topic: &str) -> Self {
        Self {
            state,
            topic: topic.to_string(),
            listeners: Mutex::new(Vec::new()),
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message> Subscriber<M> for MemorySubscriber<M> {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn add_listener(&self, listener: Listener<M>) -> QueueResult<()> {
        let handle = spawn_listener(&self.state, &self.topic, listener);
        self.listeners.lock().push(handle);
        Ok(())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
        Ok(())
    }
}

impl<M> Drop for MemorySubscriber<M> {
    fn drop(&mut self) {
        for handle in self.listeners.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueueAtom, Status};
    use std::time::Duration;

    const URI: &str = "vm://localhost";

    #[tokio::test]
    async fn rejects_foreign_uris() {
        let broker = MemoryBroker::new();
        let result = broker
            .create_submitter::<QueueAtom>("tcp://localhost:61616", "q")
            .await;
        assert!(matches!(result, Err(QueueError::Broker(_))));
    }

    #[tokio::test]
    async fn submitter_keeps_fifo_order_and_reorders() {
        let broker = MemoryBroker::new();
        let submitter = broker.create_submitter::<QueueAtom>(URI, "q").await.unwrap();
        let atoms: Vec<QueueAtom> = (0..3)
            .map(|i| QueueAtom::new("move", format!("m{i}")))
            .collect();
        for atom in &atoms {
            submitter.submit(atom).await.unwrap();
        }

        assert!(submitter.reorder(&atoms[2], 2).await.unwrap());
        let names: Vec<String> = broker
            .messages("q")
            .iter()
            .map(|m| m["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["m2", "m0", "m1"]);

        assert!(submitter.remove(&atoms[0]).await.unwrap());
        assert!(!submitter.remove(&atoms[0]).await.unwrap());
        assert_eq!(broker.queue_len("q"), 2);
    }

    #[tokio::test]
    async fn disconnected_submitter_refuses_work() {
        let broker = MemoryBroker::new();
        let submitter = broker.create_submitter::<QueueAtom>(URI, "q").await.unwrap();
        submitter.disconnect().await.unwrap();
        let result = submitter.submit(&QueueAtom::new("move", "m")).await;
        assert!(result.unwrap_err().is_broker());
    }

    #[tokio::test]
    async fn publisher_records_latest_state_in_status_set() {
        let broker = MemoryBroker::new();
        let mut publisher = broker
            .create_publisher::<QueueAtom>(URI, "t")
            .await
            .unwrap();
        publisher.set_status_set("s");

        let mut atom = QueueAtom::new("move", "m");
        atom.set_status(Status::Running);
        publisher.broadcast(&atom).await.unwrap();
        atom.set_status(Status::Complete);
        publisher.broadcast(&atom).await.unwrap();

        let set = broker.messages("s");
        assert_eq!(set.len(), 1);
        assert_eq!(set[0]["status"], "COMPLETE");
    }

    #[tokio::test]
    async fn full_status_set_drops_oldest_finished_beans() {
        let broker = MemoryBroker::with_config(MemoryBrokerConfig {
            status_set_capacity: 2,
            ..MemoryBrokerConfig::default()
        });
        let mut publisher = broker
            .create_publisher::<QueueAtom>(URI, "t")
            .await
            .unwrap();
        publisher.set_status_set("s");

        let mut running = QueueAtom::new("move", "running");
        running.set_status(Status::Running);
        publisher.broadcast(&running).await.unwrap();
        for name in ["first", "second", "third"] {
            let mut done = QueueAtom::new("move", name);
            done.set_status(Status::Complete);
            publisher.broadcast(&done).await.unwrap();
        }

        let names: Vec<String> = broker
            .messages("s")
            .iter()
            .map(|m| m["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["running", "third"]);

        // Beans still in flight are never dropped
        for name in ["a", "b"] {
            let mut live = QueueAtom::new("move", name);
            live.set_status(Status::Running);
            publisher.broadcast(&live).await.unwrap();
        }
        assert_eq!(broker.queue_len("s"), 3);
    }

    #[tokio::test]
    async fn subscriber_receives_broadcasts() {
        let broker = MemoryBroker::new();
        let subscriber = broker
            .create_subscriber::<QueueAtom>(URI, "t")
            .await
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        subscriber
            .add_listener(Arc::new(move |atom: QueueAtom| {
                sink.lock().push(atom.name().to_string())
            }))
            .unwrap();

        let publisher = broker
            .create_publisher::<QueueAtom>(URI, "t")
            .await
            .unwrap();
        publisher.broadcast(&QueueAtom::new("move", "m1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec!["m1".to_string()]);

        subscriber.disconnect().await.unwrap();
        publisher.broadcast(&QueueAtom::new("move", "m2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().len(), 1);
    }
}
