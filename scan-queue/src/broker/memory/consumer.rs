use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use super::{spawn_listener, BrokerState, MemoryPublisher};
use crate::{
    broker::{Consumer, Publisher},
    error::ProcessorError,
    names::QueueNameMap,
    processor::{panic_message, BeanControl, ProcessContext, ProcessorRegistry},
    types::{ConsumerCommand, ConsumerId, ConsumerStatus, HeartbeatBean, KillBean, Queueable, Status},
    QueueError, QueueResult,
};

/// Tasks alive while the consumer is started
struct Running {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// Bean currently handed to a processor
struct InFlight {
    bean_id: String,
    control: watch::Sender<BeanControl>,
}

struct Inner<T: Queueable> {
    id: ConsumerId,
    names: QueueNameMap,
    state: Arc<BrokerState>,
    conception: DateTime<Utc>,
    processors: RwLock<Option<Arc<ProcessorRegistry<T>>>>,
    status_publisher: Arc<dyn Publisher<T>>,
    running: Mutex<Option<Running>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Mutex<Option<InFlight>>,
    paused: AtomicBool,
    disconnected: AtomicBool,
    sequence: AtomicU64,
}

/// Consumer of the in-memory broker
///
/// Pulls beans one at a time on its own tokio task. Commands and status
/// requests are picked up by listeners installed at construction, so a
/// kill still reaches a consumer that is stopped or stuck in a processor.
pub struct MemoryConsumer<T: Queueable> {
    inner: Arc<Inner<T>>,
}

impl<T: Queueable> MemoryConsumer<T> {
    pub(crate) fn new(state: Arc<BrokerState>, names: QueueNameMap) -> Self {
        let mut publisher = MemoryPublisher::<T>::new(state.clone(), &names.status_topic_name);
        publisher.set_status_set(&names.status_set_name);

        let inner = Arc::new(Inner {
            id: ConsumerId::new(),
            names,
            state,
            conception: Utc::now(),
            processors: RwLock::new(None),
            status_publisher: Arc::new(publisher),
            running: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            in_flight: Mutex::new(None),
            paused: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });
        Inner::install_listeners(&inner);
        Self { inner }
    }
}

impl<T: Queueable> Inner<T> {
    fn install_listeners(this: &Arc<Self>) {
        let weak = Arc::downgrade(this);
        let commands = spawn_listener::<ConsumerCommand>(
            &this.state,
            &this.names.command_topic_name,
            Arc::new(move |command| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_command(command);
                }
            }),
        );

        let weak = Arc::downgrade(this);
        let statuses = spawn_listener::<T>(
            &this.state,
            &this.names.status_topic_name,
            Arc::new(move |bean| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_status(bean);
                }
            }),
        );

        this.listeners.lock().extend([commands, statuses]);
    }

    fn launch(this: &Arc<Self>) {
        let mut running = this.running.lock();
        if running.is_some() {
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Self::run(this.clone(), shutdown_rx));
        let heartbeat = tokio::spawn(Self::beat(Arc::downgrade(this)));
        *running = Some(Running {
            shutdown,
            worker,
            heartbeat,
        });
        info!("Consumer {} started on {}", this.id, this.names.submission_queue_name);
    }

    async fn run(this: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let poll = this.state.config.poll_interval;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = if this.paused.load(Ordering::Acquire) {
                None
            } else {
                this.state.pop_front(&this.names.submission_queue_name)
            };

            match next {
                Some(value) => match serde_json::from_value::<T>(value) {
                    Ok(bean) => this.process(bean).await,
                    Err(e) => warn!(
                        "Discarding unreadable message on {}: {}",
                        this.names.submission_queue_name, e
                    ),
                },
                None => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(poll) => {}
                    }
                }
            }
        }
        debug!("Consumer {} worker stopped", this.id);
    }

    async fn process(&self, mut bean: T) {
        let bean_id = bean.unique_id().to_string();
        bean.set_status(Status::Running);
        bean.set_percent_complete(0.0);
        self.record(&bean);

        let registry = self.processors.read().clone();
        let created = match registry {
            Some(registry) => registry.create(bean.bean_type()),
            None => Err(QueueError::NoProcessor(bean.bean_type().to_string())),
        };
        let mut processor = match created {
            Ok(processor) => processor,
            Err(e) => {
                error!("Cannot process bean {}: {}", bean_id, e);
                bean.set_status(Status::Failed);
                bean.set_message(e.to_string());
                self.record(&bean);
                return;
            }
        };

        let (control, control_rx) = watch::channel(BeanControl::Run);
        *self.in_flight.lock() = Some(InFlight {
            bean_id: bean_id.clone(),
            control,
        });
        let ctx = ProcessContext::new(self.status_publisher.clone(), control_rx, self.id);

        debug!("Consumer {} running bean {} ({})", self.id, bean_id, bean.bean_type());
        let outcome = AssertUnwindSafe(processor.execute(&mut bean, &ctx))
            .catch_unwind()
            .await;
        self.in_flight.lock().take();

        match outcome {
            Ok(Ok(())) => {
                if !bean.status().is_final() {
                    bean.set_status(Status::Complete);
                    bean.set_percent_complete(100.0);
                }
            }
            Ok(Err(ProcessorError::Terminated)) => {
                bean.set_status(Status::Terminated);
            }
            Ok(Err(ProcessorError::Failed(reason))) => {
                warn!("Bean {} failed: {}", bean_id, reason);
                bean.set_status(Status::Failed);
                bean.set_message(reason);
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(panic_msg = %reason, "Processor for bean {} panicked", bean_id);
                bean.set_status(Status::Failed);
                bean.set_message(format!("Processor panicked: {reason}"));
            }
        }
        self.record(&bean);
    }

    async fn beat(this: std::sync::Weak<Self>) {
        let period = match this.upgrade() {
            Some(inner) => inner.state.config.heartbeat_interval,
            None => return,
        };
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let Some(inner) = this.upgrade() else {
                break;
            };
            let status = if inner.paused.load(Ordering::Acquire) {
                ConsumerStatus::Paused
            } else {
                ConsumerStatus::Running
            };
            inner.publish_heartbeat(status);
        }
    }

    fn publish_heartbeat(&self, status: ConsumerStatus) {
        let mut beat = HeartbeatBean::new(self.id, status);
        beat.consumer_name = Some(self.names.submission_queue_name.clone());
        beat.conception_time = self.conception;
        beat.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        match serde_json::to_value(&beat) {
            Ok(value) => self.state.publish(&self.names.heartbeat_topic_name, value),
            Err(e) => warn!("Could not encode heartbeat: {}", e),
        }
    }

    /// Write the bean to the status set and the status topic
    fn record(&self, bean: &T) {
        match serde_json::to_value(bean) {
            Ok(value) => {
                self.state.upsert(&self.names.status_set_name, value.clone());
                self.state.publish(&self.names.status_topic_name, value);
            }
            Err(e) => warn!("Could not encode status of bean {}: {}", bean.unique_id(), e),
        }
    }

    fn on_command(self: &Arc<Self>, command: ConsumerCommand) {
        if command.consumer_id() != self.id {
            return;
        }
        debug!("Consumer {} received {} command", self.id, command.name());
        match command {
            ConsumerCommand::Kill(kill) => self.on_kill(kill),
            ConsumerCommand::Pause(pause) => {
                self.paused.store(pause.pause, Ordering::Release);
                let status = if pause.pause {
                    ConsumerStatus::Paused
                } else {
                    ConsumerStatus::Running
                };
                info!("Consumer {} is now {:?}", self.id, status);
            }
        }
    }

    fn on_kill(self: &Arc<Self>, kill: KillBean) {
        warn!("Consumer {} killed: {:?}", self.id, kill.message);
        if let Some(in_flight) = self.in_flight.lock().take() {
            let _ = in_flight.control.send(BeanControl::Terminate);
        }
        if let Some(running) = self.running.lock().take() {
            running.worker.abort();
            running.heartbeat.abort();
        }
        self.publish_heartbeat(ConsumerStatus::Stopped);

        if kill.exit_process {
            warn!("Consumer {} asked to exit its process; the in-memory broker does not", self.id);
        }
        if kill.disconnect {
            self.disconnected.store(true, Ordering::Release);
            for handle in self.listeners.lock().drain(..) {
                handle.abort();
            }
        } else if kill.restart {
            Self::launch(self);
        }
    }

    fn on_status(&self, bean: T) {
        let requested = match bean.status() {
            Status::RequestTerminate => BeanControl::Terminate,
            Status::RequestPause => BeanControl::Pause,
            Status::RequestResume => BeanControl::Run,
            _ => return,
        };

        if let Some(in_flight) = self.in_flight.lock().as_ref() {
            if in_flight.bean_id == bean.unique_id() {
                debug!("Bean {} in flight: {:?} requested", in_flight.bean_id, requested);
                let _ = in_flight.control.send(requested);
                return;
            }
        }

        if requested == BeanControl::Terminate {
            let removed = self
                .state
                .remove(&self.names.submission_queue_name, bean.unique_id());
            if let Some(value) = removed {
                if let Ok(mut waiting) = serde_json::from_value::<T>(value) {
                    info!("Terminated bean {} before it started", bean.unique_id());
                    waiting.set_status(Status::Terminated);
                    self.record(&waiting);
                }
            }
        }
    }

    fn halt_tasks(&self) {
        if let Some(running) = self.running.lock().take() {
            running.worker.abort();
            running.heartbeat.abort();
        }
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T: Queueable> Consumer<T> for MemoryConsumer<T> {
    fn consumer_id(&self) -> ConsumerId {
        self.inner.id
    }

    fn names(&self) -> &QueueNameMap {
        &self.inner.names
    }

    fn set_runner(&self, processors: Arc<ProcessorRegistry<T>>) {
        *self.inner.processors.write() = Some(processors);
    }

    async fn start(&self) -> QueueResult<()> {
        if self.inner.disconnected.load(Ordering::Acquire) {
            return Err(QueueError::Broker(format!(
                "Consumer {} is disconnected",
                self.inner.id
            )));
        }
        self.inner.paused.store(false, Ordering::Release);
        Inner::launch(&self.inner);
        Ok(())
    }

    async fn stop(&self) -> QueueResult<()> {
        let running = self.inner.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };
        let _ = running.shutdown.send(true);
        running.heartbeat.abort();
        if let Err(e) = running.worker.await {
            if !e.is_cancelled() {
                return Err(QueueError::Broker(format!(
                    "Consumer {} worker failed: {}",
                    self.inner.id, e
                )));
            }
        }
        self.inner.publish_heartbeat(ConsumerStatus::Stopped);
        info!("Consumer {} stopped", self.inner.id);
        Ok(())
    }

    async fn disconnect(&self) -> QueueResult<()> {
        if !self.inner.disconnected.swap(true, Ordering::AcqRel) {
            self.inner.halt_tasks();
            debug!("Consumer {} disconnected", self.inner.id);
        }
        Ok(())
    }

    // Clearing and inspection use a short-lived session, so they still
    // work once the consumer is disconnected.
    async fn clear_queue(&self, name: &str) -> QueueResult<()> {
        self.inner.state.clear(name);
        Ok(())
    }

    async fn submission_queue(&self) -> QueueResult<Vec<T>> {
        decode_all(self.inner.state.snapshot(&self.inner.names.submission_queue_name))
    }

    async fn status_set(&self) -> QueueResult<Vec<T>> {
        decode_all(self.inner.state.snapshot(&self.inner.names.status_set_name))
    }
}

impl<T: Queueable> Drop for MemoryConsumer<T> {
    fn drop(&mut self) {
        self.inner.halt_tasks();
    }
}

fn decode_all<T: Queueable>(values: Vec<serde_json::Value>) -> QueueResult<Vec<T>> {
    values
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(QueueError::from))
        .collect()
}
