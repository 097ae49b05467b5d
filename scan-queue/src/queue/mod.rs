//! The unit of execution: one consumer, its heartbeat monitor and a
//! lifecycle status.
//!
//! ```text
//! INITIALISED -> STARTED <-> STOPPED -> DISPOSED
//!                   \          /
//!                    -> KILLED -> DISPOSED
//! ```
//!
//! Transitions of one queue are serialized; the status itself can be read
//! at any time without waiting for a transition in progress.

pub mod heartbeat;

pub use heartbeat::{HeartbeatMonitor, HeartbeatRecorder};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::{
    broker::{BrokerGateway, Consumer},
    names::QueueNameMap,
    processor::ProcessorRegistry,
    types::{
        CommandSent, ConsumerCommand, ConsumerId, KillBean, PauseBean, QueueAtom, QueueBean,
        QueueStatus, Queueable,
    },
    QueueError, QueueResult,
};

/// The service's single long-lived queue
pub type JobQueue<G> = Queue<QueueBean, G>;

/// A short-lived child queue running the atoms of one job
pub type ActiveQueue<G> = Queue<QueueAtom, G>;

pub struct Queue<T: Queueable, G: BrokerGateway> {
    queue_id: String,
    uri: String,
    names: QueueNameMap,
    gateway: Arc<G>,
    consumer: Arc<dyn Consumer<T>>,
    monitor: HeartbeatMonitor,
    status: RwLock<QueueStatus>,
    transition: Mutex<()>,
    disconnected: AtomicBool,
}

impl<T: Queueable, G: BrokerGateway> Queue<T, G> {
    /// Create the consumer and heartbeat monitor; the queue starts out
    /// INITIALISED
    pub async fn new(
        queue_id: impl Into<String>,
        uri: impl Into<String>,
        names: QueueNameMap,
        gateway: Arc<G>,
        processors: Arc<ProcessorRegistry<T>>,
        heartbeat_capacity: usize,
    ) -> QueueResult<Self> {
        let queue_id = queue_id.into();
        let uri = uri.into();

        let consumer = gateway.create_consumer::<T>(&uri, &names).await?;
        consumer.set_runner(processors);

        let monitor = HeartbeatMonitor::with_capacity(
            gateway.as_ref(),
            &uri,
            &names.heartbeat_topic_name,
            consumer.consumer_id(),
            heartbeat_capacity,
        )
        .await?;
        monitor.set_queue_id(queue_id.clone());
        monitor.lock();

        info!("Created {} queue {}", T::KIND, queue_id);
        Ok(Self {
            queue_id,
            uri,
            names,
            gateway,
            consumer,
            monitor,
            status: RwLock::new(QueueStatus::Initialised),
            transition: Mutex::new(()),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn names(&self) -> &QueueNameMap {
        &self.names
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn consumer(&self) -> &Arc<dyn Consumer<T>> {
        &self.consumer
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer.consumer_id()
    }

    pub fn status(&self) -> QueueStatus {
        *self.status.read()
    }

    /// Heartbeat monitor locked to this queue's consumer
    pub fn heartbeat_monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    fn set_status(&self, status: QueueStatus) {
        *self.status.write() = status;
    }

    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub async fn start(&self) -> QueueResult<()> {
        let _transition = self.transition.lock().await;
        let status = self.status();
        if status.is_active() {
            warn!("Queue {} is already started", self.queue_id);
            return Ok(());
        }
        if !status.is_startable() {
            return Err(QueueError::invalid_state(&self.queue_id, status, "start"));
        }

        self.consumer.start().await?;
        self.set_status(QueueStatus::Started);
        info!("Started queue {}", self.queue_id);
        Ok(())
    }

    /// Stop gracefully, or with `force` broadcast a kill instead
    ///
    /// A forced stop never waits for the consumer; the queue reads KILLED
    /// as soon as the kill is handed to the broker.
    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub async fn stop(&self, force: bool) -> QueueResult<()> {
        let _transition = self.transition.lock().await;
        let status = self.status();
        if !status.is_active() {
            warn!("Queue {} is not active ({}), nothing to stop", self.queue_id, status);
            return Ok(());
        }

        if force {
            self.broadcast_kill(KillBean::new(self.consumer_id(), true, false))
                .await?;
            self.set_status(QueueStatus::Killed);
            warn!("Killed queue {}", self.queue_id);
        } else {
            self.consumer.stop().await?;
            self.set_status(QueueStatus::Stopped);
            info!("Stopped queue {}", self.queue_id);
        }
        Ok(())
    }

    /// Broadcast a kill for this queue's consumer and mark the queue KILLED
    pub async fn kill(&self, disconnect: bool, exit_process: bool) -> QueueResult<CommandSent> {
        self.kill_with(disconnect, false, exit_process).await
    }

    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub async fn kill_with(
        &self,
        disconnect: bool,
        restart: bool,
        exit_process: bool,
    ) -> QueueResult<CommandSent> {
        let _transition = self.transition.lock().await;
        let status = self.status();
        if !matches!(status, QueueStatus::Started | QueueStatus::Stopped) {
            return Err(QueueError::invalid_state(&self.queue_id, status, "kill"));
        }

        let kill = KillBean::new(self.consumer_id(), disconnect, exit_process).with_restart(restart);
        let sent = self.broadcast_kill(kill).await?;
        self.set_status(QueueStatus::Killed);
        warn!("Killed queue {}", self.queue_id);
        Ok(sent)
    }

    async fn broadcast_kill(&self, kill: KillBean) -> QueueResult<CommandSent> {
        self.send_command(kill.into()).await
    }

    /// Ask the consumer to stop or resume pulling new beans
    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub async fn send_pause(&self, pause: bool) -> QueueResult<CommandSent> {
        let status = self.status();
        if status.is_final() {
            return Err(QueueError::invalid_state(
                &self.queue_id,
                status,
                if pause { "pause" } else { "resume" },
            ));
        }
        let bean = if pause {
            PauseBean::pause(self.consumer_id())
        } else {
            PauseBean::resume(self.consumer_id())
        };
        self.send_command(bean.into()).await
    }

    async fn send_command(&self, command: ConsumerCommand) -> QueueResult<CommandSent> {
        let mut publisher = self
            .gateway
            .create_publisher::<ConsumerCommand>(&self.uri, &self.names.command_topic_name)
            .await?;
        publisher.set_status_set(&self.names.command_set_name);

        let sent = publisher.broadcast(&command).await;
        let closed = publisher.disconnect().await;
        if let Err(e) = &sent {
            error!("Failed to send {} to {}: {}", command.name(), self.queue_id, e);
        }
        sent?;
        closed?;

        Ok(CommandSent {
            consumer_id: command.consumer_id(),
            topic: self.names.command_topic_name.clone(),
            command: command.name(),
        })
    }

    /// Empty the submission queue and status set
    ///
    /// True only if both read back empty. Concurrent submitters may refill
    /// them at any time.
    pub async fn clear_queues(&self) -> QueueResult<bool> {
        self.consumer
            .clear_queue(&self.names.submission_queue_name)
            .await?;
        self.consumer.clear_queue(&self.names.status_set_name).await?;

        let submissions = self.consumer.submission_queue().await?;
        let statuses = self.consumer.status_set().await?;
        Ok(submissions.is_empty() && statuses.is_empty())
    }

    /// Release the heartbeat subscription and the consumer; idempotent
    pub async fn disconnect(&self) -> QueueResult<()> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.monitor.disconnect().await?;
        self.consumer.disconnect().await
    }

    /// Clear, disconnect, clear again and mark DISPOSED
    ///
    /// The second clear catches messages released by disconnecting. A
    /// disposed queue can be disposed again without effect.
    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub async fn dispose(&self) -> QueueResult<()> {
        let _transition = self.transition.lock().await;
        let status = self.status();
        if status.is_active() {
            return Err(QueueError::QueueRunning(self.queue_id.clone()));
        }
        if status == QueueStatus::Disposed {
            warn!("Queue {} is already disposed", self.queue_id);
            return Ok(());
        }

        self.clear_queues().await?;
        self.disconnect().await?;
        if !self.clear_queues().await? {
            error!("Queue {} still holds messages after disposal", self.queue_id);
            return Err(QueueError::ClearFailed(self.queue_id.clone()));
        }

        self.set_status(QueueStatus::Disposed);
        info!("Disposed queue {}", self.queue_id);
        Ok(())
    }

    /// True if beans are waiting in the submission queue
    pub async fn has_submitted_jobs_pending(&self) -> QueueResult<bool> {
        Ok(!self.consumer.submission_queue().await?.is_empty())
    }

    pub async fn submission_queue(&self) -> QueueResult<Vec<T>> {
        self.consumer.submission_queue().await
    }

    pub async fn status_set(&self) -> QueueResult<Vec<T>> {
        self.consumer.status_set().await
    }
}

impl<T: Queueable, G: BrokerGateway> std::fmt::Debug for Queue<T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("queue_id", &self.queue_id)
            .field("kind", &T::KIND)
            .field("status", &self.status())
            .field("consumer_id", &self.consumer_id())
            .finish()
    }
}
