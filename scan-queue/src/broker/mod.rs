//! Broker gateway ports.
//!
//! The queue core never talks to a message broker directly. It asks a
//! [`BrokerGateway`] for consumers, publishers, submitters and subscribers
//! and drives them through these traits. Serialization of beans and the
//! consumer's own processing loop live behind the gateway.

#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::{
    names::QueueNameMap,
    processor::ProcessorRegistry,
    types::{ConsumerId, Queueable},
    QueueResult,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Anything that can be carried by a broker destination
pub trait Message: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<M> Message for M where M: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{}

/// Push-subscription callback; invoked on the subscriber's own task
pub type Listener<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Worker bound to one queue's destinations
///
/// A consumer pulls beans from its submission queue, runs a processor for
/// each, and records status changes in its status set and on its status
/// topic. It heartbeats on its heartbeat topic and obeys commands
/// addressed to its ID on its command topic.
#[async_trait]
pub trait Consumer<T: Queueable>: Send + Sync {
    fn consumer_id(&self) -> ConsumerId;

    /// Destinations this consumer is bound to
    fn names(&self) -> &QueueNameMap;

    /// Processors used for the beans this consumer pulls
    fn set_runner(&self, processors: Arc<ProcessorRegistry<T>>);

    /// Begin pulling from the submission queue
    async fn start(&self) -> QueueResult<()>;

    /// Finish the bean in flight, then halt
    async fn stop(&self) -> QueueResult<()>;

    /// Release the broker connection; idempotent
    async fn disconnect(&self) -> QueueResult<()>;

    /// Remove every message held in the named queue or set
    async fn clear_queue(&self, name: &str) -> QueueResult<()>;

    /// Beans waiting to be processed, head first
    async fn submission_queue(&self) -> QueueResult<Vec<T>>;

    /// Latest known state of every bean this consumer has seen
    async fn status_set(&self) -> QueueResult<Vec<T>>;
}

/// Broadcasts messages on a topic
#[async_trait]
pub trait Publisher<M: Message>: Send + Sync {
    fn topic(&self) -> &str;

    /// Also record every broadcast message in the named set
    fn set_status_set(&mut self, set_name: &str);

    async fn broadcast(&self, message: &M) -> QueueResult<()>;

    async fn disconnect(&self) -> QueueResult<()>;
}

/// Places beans on a submission queue
#[async_trait]
pub trait Submitter<T: Queueable>: Send + Sync {
    fn queue_name(&self) -> &str;

    async fn submit(&self, bean: &T) -> QueueResult<()>;

    /// Remove a bean that has not been picked up yet
    async fn remove(&self, bean: &T) -> QueueResult<bool>;

    /// Move a waiting bean; positive `amount` moves it towards the head
    async fn reorder(&self, bean: &T, amount: i32) -> QueueResult<bool>;

    async fn disconnect(&self) -> QueueResult<()>;
}

/// Receives messages broadcast on a topic
#[async_trait]
pub trait Subscriber<M: Message>: Send + Sync {
    fn topic(&self) -> &str;

    /// Deliver every message published from now on to `listener`
    fn add_listener(&self, listener: Listener<M>) -> QueueResult<()>;

    async fn disconnect(&self) -> QueueResult<()>;
}

/// Factory for broker-side connections
#[async_trait]
pub trait BrokerGateway: Send + Sync + 'static {
    async fn create_consumer<T: Queueable>(
        &self,
        uri: &str,
        names: &QueueNameMap,
    ) -> QueueResult<Arc<dyn Consumer<T>>>;

    async fn create_publisher<M: Message>(
        &self,
        uri: &str,
        topic: &str,
    ) -> QueueResult<Box<dyn Publisher<M>>>;

    async fn create_submitter<T: Queueable>(
        &self,
        uri: &str,
        queue: &str,
    ) -> QueueResult<Box<dyn Submitter<T>>>;

    async fn create_subscriber<M: Message>(
        &self,
        uri: &str,
        topic: &str,
    ) -> QueueResult<Box<dyn Subscriber<M>>>;
}
