//! The queue service: one job queue plus a registry of active queues.
//!
//! ```rust,no_run
//! use scan_queue::prelude::*;
//!
//! # async fn run() -> QueueResult<()> {
//! let service = QueueService::new(
//!     MemoryBroker::new(),
//!     QueueServiceConfig::new()
//!         .with_queue_root("i15-1")
//!         .with_uri("vm://localhost"),
//! );
//! service.init().await?;
//! service.start().await?;
//!
//! let active = service.register_new_active_queue().await?;
//! service.submit(QueueAtom::new("move", "x to 10"), &active).await?;
//! service.start_active_queue(&active).await?;
//! // ...
//! service.deregister_active_queue(&active, false).await?;
//! service.stop(false).await?;
//! service.dispose_service().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    broker::{BoxStream, BrokerGateway},
    config::QueueServiceConfig,
    names::{self, QueueNameMap, ServiceDestinations},
    observability::{LiveMetrics, ObservabilityLayer},
    processor::{ProcessorRegistry, TaskProcessor},
    queue::{ActiveQueue, HeartbeatMonitor, JobQueue, Queue},
    types::{
        CommandSent, QueueAtom, QueueBean, QueueEvent, QueueStatus, Queueable, Status,
        TASK_BEAN_TYPE,
    },
    QueueError, QueueResult,
};

/// Bean kinds the service knows where to send
///
/// `QueueBean`s only ever reach the job queue and `QueueAtom`s only ever
/// reach active queues.
pub trait Routable: Queueable {
    fn resolve<G: BrokerGateway>(
        service: &QueueService<G>,
        queue_id: &str,
    ) -> QueueResult<Arc<Queue<Self, G>>>;
}

impl Routable for QueueBean {
    fn resolve<G: BrokerGateway>(
        service: &QueueService<G>,
        queue_id: &str,
    ) -> QueueResult<Arc<JobQueue<G>>> {
        let job_queue = service.job_queue()?;
        if job_queue.queue_id() == queue_id {
            Ok(job_queue)
        } else if service.is_active_queue_registered(queue_id) {
            Err(QueueError::WrongQueueKind {
                queue_id: queue_id.to_string(),
                expected: QueueAtom::KIND,
            })
        } else {
            Err(QueueError::QueueNotFound(queue_id.to_string()))
        }
    }
}

impl Routable for QueueAtom {
    fn resolve<G: BrokerGateway>(
        service: &QueueService<G>,
        queue_id: &str,
    ) -> QueueResult<Arc<ActiveQueue<G>>> {
        if service.job_queue()?.queue_id() == queue_id {
            return Err(QueueError::WrongQueueKind {
                queue_id: queue_id.to_string(),
                expected: QueueBean::KIND,
            });
        }
        service.active_queue(queue_id)
    }
}

/// A queue of either kind, for operations that do not touch beans
enum QueueHandle<G: BrokerGateway> {
    Job(Arc<JobQueue<G>>),
    Active(Arc<ActiveQueue<G>>),
}

impl<G: BrokerGateway> QueueHandle<G> {
    fn status(&self) -> QueueStatus {
        match self {
            Self::Job(queue) => queue.status(),
            Self::Active(queue) => queue.status(),
        }
    }

    async fn kill_with(
        &self,
        disconnect: bool,
        restart: bool,
        exit_process: bool,
    ) -> QueueResult<CommandSent> {
        match self {
            Self::Job(queue) => queue.kill_with(disconnect, restart, exit_process).await,
            Self::Active(queue) => queue.kill_with(disconnect, restart, exit_process).await,
        }
    }

    async fn send_pause(&self, pause: bool) -> QueueResult<CommandSent> {
        match self {
            Self::Job(queue) => queue.send_pause(pause).await,
            Self::Active(queue) => queue.send_pause(pause).await,
        }
    }

    async fn monitor(&self, capacity: usize) -> QueueResult<HeartbeatMonitor> {
        match self {
            Self::Job(queue) => HeartbeatMonitor::for_queue(queue.as_ref(), capacity).await,
            Self::Active(queue) => HeartbeatMonitor::for_queue(queue.as_ref(), capacity).await,
        }
    }
}

struct ServiceState<G: BrokerGateway> {
    initialised: bool,
    alive: bool,
    /// Set while `stop` drains the job queue; no new active queues
    stopping: bool,
    destinations: Option<ServiceDestinations>,
    job_queue: Option<Arc<JobQueue<G>>>,
    /// `None` marks a queue disposed but not yet forgotten
    active_queues: HashMap<String, Option<Arc<ActiveQueue<G>>>>,
}

impl<G: BrokerGateway> ServiceState<G> {
    fn new() -> Self {
        Self {
            initialised: false,
            alive: false,
            stopping: false,
            destinations: None,
            job_queue: None,
            active_queues: HashMap::new(),
        }
    }
}

pub struct QueueService<G: BrokerGateway> {
    gateway: Arc<G>,
    config: RwLock<QueueServiceConfig>,
    /// Serializes service-level lifecycle operations
    control: Mutex<()>,
    state: RwLock<ServiceState<G>>,
    job_processors: Arc<ProcessorRegistry<QueueBean>>,
    atom_processors: Arc<ProcessorRegistry<QueueAtom>>,
    observability: ObservabilityLayer,
    host_name: String,
}

impl<G: BrokerGateway> QueueService<G> {
    pub fn new(gateway: G, config: QueueServiceConfig) -> Arc<Self> {
        Self::with_gateway(Arc::new(gateway), config)
    }

    /// Build a service over a shared gateway
    ///
    /// The job processor registry starts out with the built-in `task`
    /// processor, which runs a job's atoms in an active queue of this
    /// service.
    pub fn with_gateway(gateway: Arc<G>, config: QueueServiceConfig) -> Arc<Self> {
        Arc::new_cyclic(|service: &Weak<Self>| {
            let job_processors = Arc::new(ProcessorRegistry::new());
            let weak = service.clone();
            job_processors.register_builtin(TASK_BEAN_TYPE, move || {
                Box::new(TaskProcessor::new(weak.clone()))
            });

            Self {
                gateway,
                config: RwLock::new(config),
                control: Mutex::new(()),
                state: RwLock::new(ServiceState::new()),
                job_processors,
                atom_processors: Arc::new(ProcessorRegistry::new()),
                observability: ObservabilityLayer::new(),
                host_name: local_host_name(),
            }
        })
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> QueueServiceConfig {
        self.config.read().clone()
    }

    pub fn queue_root(&self) -> Option<String> {
        self.config.read().queue_root.clone()
    }

    pub fn uri(&self) -> Option<String> {
        self.config.read().uri.clone()
    }

    /// Only allowed before `init()`
    pub fn set_queue_root(&self, queue_root: impl Into<String>) -> QueueResult<()> {
        self.ensure_configurable("queue root")?;
        self.config.write().queue_root = Some(queue_root.into());
        Ok(())
    }

    /// Only allowed before `init()`
    pub fn set_uri(&self, uri: impl Into<String>) -> QueueResult<()> {
        self.ensure_configurable("URI")?;
        self.config.write().uri = Some(uri.into());
        Ok(())
    }

    /// Applies to heartbeat monitors created from now on
    pub fn set_heartbeat_capacity(&self, capacity: usize) {
        self.config.write().heartbeat_capacity = capacity;
    }

    fn ensure_configurable(&self, what: &str) -> QueueResult<()> {
        if self.state.read().initialised {
            return Err(QueueError::UnsupportedOperation(format!(
                "Cannot change the {} of an initialised queue service",
                what
            )));
        }
        Ok(())
    }

    /// Processors used by the job queue
    pub fn job_processors(&self) -> &Arc<ProcessorRegistry<QueueBean>> {
        &self.job_processors
    }

    /// Processors shared by every active queue
    pub fn atom_processors(&self) -> &Arc<ProcessorRegistry<QueueAtom>> {
        &self.atom_processors
    }

    /// Host name stamped on submitted beans that carry none
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    pub fn metrics(&self) -> &LiveMetrics {
        self.observability.metrics()
    }

    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        self.observability.event_stream()
    }

    pub fn is_initialised(&self) -> bool {
        self.state.read().initialised
    }

    pub fn is_alive(&self) -> bool {
        self.state.read().alive
    }

    fn ensure_alive(&self) -> QueueResult<()> {
        let state = self.state.read();
        if !state.initialised {
            Err(QueueError::ServiceNotInitialised)
        } else if !state.alive {
            Err(QueueError::ServiceNotStarted)
        } else {
            Ok(())
        }
    }

    fn ensure_accepting_queues(&self) -> QueueResult<()> {
        self.ensure_alive()?;
        if self.state.read().stopping {
            return Err(QueueError::ServiceNotStarted);
        }
        Ok(())
    }

    fn destinations(&self) -> QueueResult<ServiceDestinations> {
        self.state
            .read()
            .destinations
            .clone()
            .ok_or(QueueError::ServiceNotInitialised)
    }

    fn root_and_uri(&self) -> QueueResult<(String, String)> {
        let config = self.config.read();
        let root = config
            .queue_root
            .clone()
            .ok_or(QueueError::MissingConfig("Queue root"))?;
        let uri = config.uri.clone().ok_or(QueueError::MissingConfig("URI"))?;
        Ok((root, uri))
    }

    /// Create the job queue and derive the shared destinations
    #[instrument(skip(self))]
    pub async fn init(&self) -> QueueResult<()> {
        let _control = self.control.lock().await;
        if self.state.read().initialised {
            return Err(QueueError::AlreadyInitialised);
        }

        let (root, uri) = self.root_and_uri()?;
        let capacity = self.config.read().heartbeat_capacity;
        let destinations = ServiceDestinations::for_root(&root);
        let job_queue_id = names::job_queue_id(&root);
        let job_names = QueueNameMap::for_service_queue(&job_queue_id, &destinations);

        let job_queue = Queue::new(
            job_queue_id.clone(),
            uri,
            job_names,
            self.gateway.clone(),
            self.job_processors.clone(),
            capacity,
        )
        .await?;

        {
            let mut state = self.state.write();
            state.initialised = true;
            state.alive = false;
            state.destinations = Some(destinations);
            state.job_queue = Some(Arc::new(job_queue));
            state.active_queues.clear();
        }

        info!("Queue service initialised with job queue {}", job_queue_id);
        self.observability.record_initialised(&job_queue_id);
        Ok(())
    }

    /// Start the job queue
    #[instrument(skip(self))]
    pub async fn start(&self) -> QueueResult<()> {
        let _control = self.control.lock().await;
        let job_queue = self.job_queue()?;
        if self.is_alive() {
            warn!("Queue service is already running");
            return Ok(());
        }

        let status = job_queue.status();
        if !status.is_startable() {
            return Err(QueueError::invalid_state(job_queue.queue_id(), status, "start"));
        }
        job_queue.start().await?;
        self.state.write().alive = true;

        info!("Queue service started");
        self.observability.record_started(job_queue.queue_id());
        Ok(())
    }

    /// Tear down every active queue, then stop (or kill) the job queue
    #[instrument(skip(self))]
    pub async fn stop(&self, force: bool) -> QueueResult<()> {
        let job_queue = {
            let _control = self.control.lock().await;
            if !self.is_alive() {
                warn!("Queue service is not running, nothing to stop");
                return Ok(());
            }
            {
                let mut state = self.state.write();
                if state.stopping {
                    warn!("Queue service is already stopping");
                    return Ok(());
                }
                state.stopping = true;
            }

            let swept = self.sweep_active_queues(force).await;
            match swept.and_then(|()| self.job_queue()) {
                Ok(job_queue) => job_queue,
                Err(e) => {
                    self.state.write().stopping = false;
                    return Err(e);
                }
            }
        };

        // A job processor may still call back into the service while the
        // job queue finishes its bean, so the control lock is released first.
        // Registration is refused meanwhile.
        let stopped = self.stop_queue(&job_queue, force).await;
        {
            let mut state = self.state.write();
            state.stopping = false;
            if stopped.is_ok() {
                state.alive = false;
            }
        }
        stopped?;
        info!("Queue service stopped");
        Ok(())
    }

    async fn sweep_active_queues(&self, force: bool) -> QueueResult<()> {
        for queue_id in self.all_active_queue_ids() {
            self.deregister_locked(&queue_id, force).await?;
        }
        Ok(())
    }

    async fn stop_queue<T: Queueable>(&self, queue: &Queue<T, G>, force: bool) -> QueueResult<()> {
        let was_active = queue.status().is_active();
        queue.stop(force).await?;
        if !was_active {
            return Ok(());
        }
        match queue.status() {
            QueueStatus::Killed => self
                .observability
                .record_killed(queue.queue_id(), queue.consumer_id()),
            QueueStatus::Stopped => self.observability.record_stopped(queue.queue_id()),
            _ => {}
        }
        Ok(())
    }

    /// Create, clear and register a new active queue; returns its ID
    #[instrument(skip(self))]
    pub async fn register_new_active_queue(&self) -> QueueResult<String> {
        let _control = self.control.lock().await;
        self.ensure_accepting_queues()?;

        let (root, uri) = self.root_and_uri()?;
        let capacity = self.config.read().heartbeat_capacity;
        let destinations = self.destinations()?;
        let queue_id = self.generate_active_queue_id(&root);
        let queue_names = QueueNameMap::for_service_queue(&queue_id, &destinations);

        let queue = Queue::new(
            queue_id.clone(),
            uri,
            queue_names,
            self.gateway.clone(),
            self.atom_processors.clone(),
            capacity,
        )
        .await?;
        // A reused destination name may still carry old messages
        if !queue.clear_queues().await? {
            error!("Active queue {} still holds stale messages", queue_id);
            queue.disconnect().await?;
            return Err(QueueError::ClearFailed(queue_id));
        }

        self.state
            .write()
            .active_queues
            .insert(queue_id.clone(), Some(Arc::new(queue)));
        info!("Registered active queue {}", queue_id);
        self.observability.record_registered(&queue_id);
        Ok(queue_id)
    }

    fn generate_active_queue_id(&self, root: &str) -> String {
        let state = self.state.read();
        let index = state.active_queues.len();
        let mut rng = rand::thread_rng();
        loop {
            let candidate = names::active_queue_id(root, index, rng.gen_range(0..999));
            if !state.active_queues.contains_key(&candidate) {
                return candidate;
            }
            debug!("Active queue ID {} is taken, rolling again", candidate);
        }
    }

    /// Stop the queue if it is running, dispose it and forget it
    #[instrument(skip(self))]
    pub async fn deregister_active_queue(&self, queue_id: &str, force: bool) -> QueueResult<()> {
        let _control = self.control.lock().await;
        self.ensure_alive()?;
        self.deregister_locked(queue_id, force).await
    }

    async fn deregister_locked(&self, queue_id: &str, force: bool) -> QueueResult<()> {
        let entry = self.state.read().active_queues.get(queue_id).cloned();
        let queue = match entry {
            None => return Err(QueueError::QueueNotFound(queue_id.to_string())),
            Some(None) => {
                self.state.write().active_queues.remove(queue_id);
                debug!("Forgot disposed active queue {}", queue_id);
                self.observability.record_deregistered(queue_id);
                return Ok(());
            }
            Some(Some(queue)) => queue,
        };

        if queue.status().is_active() {
            warn!("Active queue {} is still running, stopping it first", queue_id);
            self.stop_queue(&queue, force).await?;
        }
        queue.dispose().await?;
        self.state.write().active_queues.remove(queue_id);

        info!("Deregistered active queue {}", queue_id);
        self.observability.record_disposed(queue_id);
        self.observability.record_deregistered(queue_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn start_active_queue(&self, queue_id: &str) -> QueueResult<()> {
        let queue = self.active_queue(queue_id)?;
        let was_active = queue.status().is_active();
        queue.start().await?;
        if !was_active {
            self.observability.record_started(queue_id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop_active_queue(&self, queue_id: &str, force: bool) -> QueueResult<()> {
        let queue = self.active_queue(queue_id)?;
        self.stop_queue(&queue, force).await
    }

    /// Dispose an active queue
    ///
    /// With `nullify` the ID stays registered with no queue behind it, so
    /// a second dispose fails with `QueueDisposed`; otherwise it is
    /// forgotten.
    #[instrument(skip(self))]
    pub async fn dispose_queue(&self, queue_id: &str, nullify: bool) -> QueueResult<()> {
        let _control = self.control.lock().await;
        if self.job_queue()?.queue_id() == queue_id {
            return Err(QueueError::UnsupportedOperation(
                "The job queue is disposed with the service".to_string(),
            ));
        }

        let queue = self.active_queue(queue_id)?;
        queue.dispose().await?;
        {
            let mut state = self.state.write();
            if nullify {
                state.active_queues.insert(queue_id.to_string(), None);
            } else {
                state.active_queues.remove(queue_id);
            }
        }
        self.observability.record_disposed(queue_id);
        Ok(())
    }

    /// Stamp the bean SUBMITTED and place it on the queue's submission queue
    ///
    /// Each call opens its own submitter and closes it again.
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn submit<T: Routable>(&self, mut bean: T, queue_id: &str) -> QueueResult<T> {
        let queue = T::resolve(self, queue_id)?;

        bean.set_status(Status::Submitted);
        if bean.host_name().is_none() {
            bean.set_host_name(self.host_name.clone());
        }
        bean.info_mut().submission_time = Some(Utc::now());

        let submitter = self
            .gateway
            .create_submitter::<T>(queue.uri(), &queue.names().submission_queue_name)
            .await?;
        let submitted = submitter.submit(&bean).await;
        let closed = submitter.disconnect().await;
        if let Err(e) = &submitted {
            error!("Failed to submit {} to {}: {}", bean.unique_id(), queue_id, e);
        }
        submitted?;
        closed?;

        debug!("Submitted {} '{}' to {}", T::KIND, bean.name(), queue_id);
        self.observability
            .record_submitted(queue_id, bean.unique_id(), bean.bean_type());
        Ok(bean)
    }

    /// Ask for the bean to be terminated, on the queue's status topic
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn terminate<T: Routable>(&self, mut bean: T, queue_id: &str) -> QueueResult<T> {
        let queue = T::resolve(self, queue_id)?;
        bean.set_status(Status::RequestTerminate);

        let publisher = self
            .gateway
            .create_publisher::<T>(queue.uri(), &queue.names().status_topic_name)
            .await?;
        let sent = publisher.broadcast(&bean).await;
        let closed = publisher.disconnect().await;
        sent?;
        closed?;

        info!("Requested termination of {} on {}", bean.unique_id(), queue_id);
        self.observability
            .record_terminate_requested(queue_id, bean.unique_id());
        Ok(bean)
    }

    /// Broadcast a kill for the queue's consumer and mark the queue KILLED
    ///
    /// The receipt only confirms the kill was sent.
    pub async fn kill_queue(
        &self,
        queue_id: &str,
        disconnect: bool,
        exit_process: bool,
    ) -> QueueResult<CommandSent> {
        self.kill_queue_with(queue_id, disconnect, false, exit_process)
            .await
    }

    #[instrument(skip(self))]
    pub async fn kill_queue_with(
        &self,
        queue_id: &str,
        disconnect: bool,
        restart: bool,
        exit_process: bool,
    ) -> QueueResult<CommandSent> {
        let queue = self.queue_handle(queue_id)?;
        let sent = queue.kill_with(disconnect, restart, exit_process).await?;
        self.observability.record_killed(queue_id, sent.consumer_id);
        Ok(sent)
    }

    /// Stop the queue's consumer from pulling new beans
    pub async fn pause_queue(&self, queue_id: &str) -> QueueResult<CommandSent> {
        self.send_pause(queue_id, true).await
    }

    pub async fn resume_queue(&self, queue_id: &str) -> QueueResult<CommandSent> {
        self.send_pause(queue_id, false).await
    }

    async fn send_pause(&self, queue_id: &str, pause: bool) -> QueueResult<CommandSent> {
        let sent = self.queue_handle(queue_id)?.send_pause(pause).await?;
        info!("Sent {} to {}", sent.command, queue_id);
        self.observability.record_command(queue_id, sent.command);
        Ok(sent)
    }

    /// Stop if running, dispose every queue and return to uninitialised
    #[instrument(skip(self))]
    pub async fn dispose_service(&self) -> QueueResult<()> {
        if self.is_alive() {
            self.stop(false).await?;
        }

        let _control = self.control.lock().await;
        if !self.is_initialised() {
            warn!("Queue service is not initialised, nothing to dispose");
            return Ok(());
        }

        for queue_id in self.all_active_queue_ids() {
            let entry = self.state.read().active_queues.get(&queue_id).cloned().flatten();
            if let Some(queue) = entry {
                if queue.status().is_active() {
                    self.stop_queue(&queue, false).await?;
                }
                queue.dispose().await?;
                self.observability.record_disposed(&queue_id);
            }
            self.state.write().active_queues.remove(&queue_id);
            self.observability.record_deregistered(&queue_id);
        }

        let job_queue = self.job_queue()?;
        job_queue.dispose().await?;
        self.observability.record_disposed(job_queue.queue_id());

        {
            let mut state = self.state.write();
            state.initialised = false;
            state.alive = false;
            state.destinations = None;
            state.job_queue = None;
        }
        info!("Queue service disposed");
        Ok(())
    }

    pub fn job_queue(&self) -> QueueResult<Arc<JobQueue<G>>> {
        self.state
            .read()
            .job_queue
            .clone()
            .ok_or(QueueError::ServiceNotInitialised)
    }

    pub fn job_queue_id(&self) -> QueueResult<String> {
        Ok(self.job_queue()?.queue_id().to_string())
    }

    pub fn active_queue(&self, queue_id: &str) -> QueueResult<Arc<ActiveQueue<G>>> {
        let state = self.state.read();
        if !state.initialised {
            return Err(QueueError::ServiceNotInitialised);
        }
        match state.active_queues.get(queue_id) {
            Some(Some(queue)) => Ok(queue.clone()),
            Some(None) => Err(QueueError::QueueDisposed(queue_id.to_string())),
            None => Err(QueueError::QueueNotFound(queue_id.to_string())),
        }
    }

    fn queue_handle(&self, queue_id: &str) -> QueueResult<QueueHandle<G>> {
        let job_queue = self.job_queue()?;
        if job_queue.queue_id() == queue_id {
            Ok(QueueHandle::Job(job_queue))
        } else {
            self.active_queue(queue_id).map(QueueHandle::Active)
        }
    }

    /// Registered active queue IDs, sorted
    pub fn all_active_queue_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().active_queues.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_active_queue_registered(&self, queue_id: &str) -> bool {
        self.state.read().active_queues.contains_key(queue_id)
    }

    /// Status of the job queue or of an active queue
    pub fn queue_status(&self, queue_id: &str) -> QueueResult<QueueStatus> {
        match self.queue_handle(queue_id) {
            Ok(queue) => Ok(queue.status()),
            Err(QueueError::QueueDisposed(_)) => Ok(QueueStatus::Disposed),
            Err(e) => Err(e),
        }
    }

    pub async fn status_set<T: Routable>(&self, queue_id: &str) -> QueueResult<Vec<T>> {
        T::resolve(self, queue_id)?.status_set().await
    }

    pub async fn submission_queue<T: Routable>(&self, queue_id: &str) -> QueueResult<Vec<T>> {
        T::resolve(self, queue_id)?.submission_queue().await
    }

    pub async fn job_queue_status_set(&self) -> QueueResult<Vec<QueueBean>> {
        self.job_queue()?.status_set().await
    }

    pub async fn active_queue_status_set(&self, queue_id: &str) -> QueueResult<Vec<QueueAtom>> {
        self.active_queue(queue_id)?.status_set().await
    }

    pub fn heartbeat_topic_name(&self) -> QueueResult<String> {
        Ok(self.destinations()?.heartbeat_topic_name)
    }

    pub fn command_set_name(&self) -> QueueResult<String> {
        Ok(self.destinations()?.command_set_name)
    }

    pub fn command_topic_name(&self) -> QueueResult<String> {
        Ok(self.destinations()?.command_topic_name)
    }

    /// A new heartbeat monitor locked to the consumer of `queue_id`
    pub async fn heartbeat_monitor(&self, queue_id: &str) -> QueueResult<HeartbeatMonitor> {
        let capacity = self.config.read().heartbeat_capacity;
        self.queue_handle(queue_id)?.monitor(capacity).await
    }
}

/// Name of the machine beans are submitted from
fn local_host_name() -> String {
    System::host_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{memory::MemoryBroker, Consumer, Message, Publisher, Submitter, Subscriber};
    use crate::types::ConsumerId;
    use async_trait::async_trait;

    fn service() -> Arc<QueueService<MemoryBroker>> {
        QueueService::new(
            MemoryBroker::new(),
            QueueServiceConfig::new()
                .with_queue_root("unit")
                .with_uri("vm://localhost"),
        )
    }

    #[tokio::test]
    async fn init_needs_root_and_uri() {
        let service = QueueService::new(MemoryBroker::new(), QueueServiceConfig::new());
        assert!(matches!(
            service.init().await,
            Err(QueueError::MissingConfig("Queue root"))
        ));

        service.set_queue_root("unit").unwrap();
        assert!(matches!(service.init().await, Err(QueueError::MissingConfig("URI"))));
    }

    #[tokio::test]
    async fn config_is_frozen_after_init() {
        let service = service();
        service.init().await.unwrap();
        assert!(matches!(
            service.set_uri("vm://elsewhere"),
            Err(QueueError::UnsupportedOperation(_))
        ));
        assert!(matches!(service.init().await, Err(QueueError::AlreadyInitialised)));
    }

    #[tokio::test]
    async fn task_processor_is_built_in() {
        let service = service();
        assert!(service.job_processors().is_registered(TASK_BEAN_TYPE));
        service.job_processors().initialize();
        assert!(service.job_processors().is_registered(TASK_BEAN_TYPE));
    }

    #[tokio::test]
    async fn beans_only_route_to_their_own_kind() {
        let service = service();
        service.init().await.unwrap();
        service.start().await.unwrap();
        let job_queue_id = service.job_queue_id().unwrap();
        let active = service.register_new_active_queue().await.unwrap();

        let err = service
            .submit(QueueAtom::new("move", "m"), &job_queue_id)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::WrongQueueKind { expected: "QueueBean", .. }));

        let err = service
            .submit(QueueBean::new("scan", "s"), &active)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::WrongQueueKind { expected: "QueueAtom", .. }));

        service.stop(false).await.unwrap();
    }

    /// Memory broker whose active queues come with a stale bean that
    /// clearing cannot remove
    struct StaleBroker(MemoryBroker);

    struct UnclearableConsumer<T: Queueable>(Arc<dyn Consumer<T>>);

    #[async_trait]
    impl<T: Queueable> Consumer<T> for UnclearableConsumer<T> {
        fn consumer_id(&self) -> ConsumerId {
            self.0.consumer_id()
        }

        fn names(&self) -> &QueueNameMap {
            self.0.names()
        }

        fn set_runner(&self, processors: Arc<ProcessorRegistry<T>>) {
            self.0.set_runner(processors)
        }

        async fn start(&self) -> QueueResult<()> {
            self.0.start().await
        }

        async fn stop(&self) -> QueueResult<()> {
            self.0.stop().await
        }

        async fn disconnect(&self) -> QueueResult<()> {
            self.0.disconnect().await
        }

        async fn clear_queue(&self, _name: &str) -> QueueResult<()> {
            Ok(())
        }

        async fn submission_queue(&self) -> QueueResult<Vec<T>> {
            self.0.submission_queue().await
        }

        async fn status_set(&self) -> QueueResult<Vec<T>> {
            self.0.status_set().await
        }
    }

    #[async_trait]
    impl BrokerGateway for StaleBroker {
        async fn create_consumer<T: Queueable>(
            &self,
            uri: &str,
            names: &QueueNameMap,
        ) -> QueueResult<Arc<dyn Consumer<T>>> {
            let consumer = self.0.create_consumer::<T>(uri, names).await?;
            if !names.submission_queue_name.contains(".active-queue-") {
                return Ok(consumer);
            }
            let submitter = self
                .0
                .create_submitter::<QueueAtom>(uri, &names.submission_queue_name)
                .await?;
            submitter.submit(&QueueAtom::new("move", "stale")).await?;
            Ok(Arc::new(UnclearableConsumer(consumer)))
        }

        async fn create_publisher<M: Message>(
            &self,
            uri: &str,
            topic: &str,
        ) -> QueueResult<Box<dyn Publisher<M>>> {
            self.0.create_publisher::<M>(uri, topic).await
        }

        async fn create_submitter<T: Queueable>(
            &self,
            uri: &str,
            queue: &str,
        ) -> QueueResult<Box<dyn Submitter<T>>> {
            self.0.create_submitter::<T>(uri, queue).await
        }

        async fn create_subscriber<M: Message>(
            &self,
            uri: &str,
            topic: &str,
        ) -> QueueResult<Box<dyn Subscriber<M>>> {
            self.0.create_subscriber::<M>(uri, topic).await
        }
    }

    #[tokio::test]
    async fn dirty_active_queue_is_not_registered() {
        let service = QueueService::new(
            StaleBroker(MemoryBroker::new()),
            QueueServiceConfig::new()
                .with_queue_root("unit.stale")
                .with_uri("vm://localhost"),
        );
        service.init().await.unwrap();
        service.start().await.unwrap();

        let err = service.register_new_active_queue().await.unwrap_err();
        assert!(matches!(err, QueueError::ClearFailed(ref id) if id.contains(".active-queue-")));
        assert!(service.all_active_queue_ids().is_empty());
        assert_eq!(service.metrics().snapshot().queues_registered, 0);

        service.stop(false).await.unwrap();
    }

    #[test]
    fn host_name_is_never_empty() {
        assert!(!local_host_name().is_empty());
    }
}
