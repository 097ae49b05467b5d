//! # scan-queue: queue orchestration for beamline scans
//!
//! A [`QueueService`] owns one long-lived **job queue** of [`QueueBean`]s
//! and any number of short-lived **active queues** of [`QueueAtom`]s that
//! a job's processor creates to run its sub-tasks in isolation. Every
//! queue owns exactly one consumer, obtained from a [`BrokerGateway`],
//! that pulls beans and runs the [`Processor`] registered for their type.
//!
//! ## Features
//!
//! - **Lifecycle**: `INITIALISED -> STARTED <-> STOPPED -> DISPOSED`, with
//!   `KILLED` as the forced way out; transitions of one queue are
//!   serialized
//! - **Out-of-band control**: pause, resume and kill travel on command
//!   topics addressed by consumer ID, bean terminate requests on status
//!   topics
//! - **Heartbeats**: bounded per-consumer history through
//!   [`HeartbeatMonitor`]
//! - **Type-level routing**: beans can only be submitted to queues of their
//!   own kind
//! - **In-memory broker**: [`MemoryBroker`] for tests and single-process
//!   use
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use scan_queue::prelude::*;
//!
//! struct MoveMotor;
//!
//! #[async_trait]
//! impl Processor<QueueAtom> for MoveMotor {
//!     async fn execute(
//!         &mut self,
//!         atom: &mut QueueAtom,
//!         ctx: &ProcessContext<QueueAtom>,
//!     ) -> Result<(), ProcessorError> {
//!         ctx.report(atom, 50.0, "moving").await?;
//!         ctx.checkpoint(atom).await
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let service = QueueService::new(
//!     MemoryBroker::new(),
//!     QueueServiceConfig::from_env("SCANQ_"),
//! );
//! service.atom_processors().register("move", || Box::new(MoveMotor));
//! service.init().await?;
//! service.start().await?;
//!
//! // The built-in "task" processor runs the atoms in an active queue
//! let job = QueueBean::task("grid scan", vec![QueueAtom::new("move", "x to 10")]);
//! service.submit(job, &service.job_queue_id()?).await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod controller;
pub mod error;
pub mod names;
pub mod observability;
pub mod processor;
pub mod queue;
pub mod service;
pub mod types;

pub use broker::{BoxStream, BrokerGateway, Consumer, Publisher, Submitter, Subscriber};
pub use config::{MemoryBrokerConfig, QueueServiceConfig};
pub use controller::QueueController;
pub use error::{ProcessorError, QueueError, QueueResult};
pub use names::{QueueNameMap, ServiceDestinations};
pub use processor::{BeanControl, ProcessContext, Processor, ProcessorRegistry, TaskProcessor};
pub use queue::{ActiveQueue, HeartbeatMonitor, HeartbeatRecorder, JobQueue, Queue};
pub use service::{QueueService, Routable};
pub use types::{
    CommandSent, ConsumerCommand, ConsumerId, ConsumerStatus, HeartbeatBean, KillBean, PauseBean,
    QueueAtom, QueueBean, QueueEvent, QueueStatus, Queueable, Status, TASK_BEAN_TYPE,
};

// Observability exports
pub use observability::{LiveMetrics, ObservabilityLayer};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

// Broker implementations
#[cfg(feature = "memory")]
pub use broker::memory::MemoryBroker;

/// Everything needed to run a queue service and write processors
pub mod prelude {
    pub use crate::{
        BrokerGateway, QueueController, QueueService, QueueServiceConfig, Routable,
    };

    pub use crate::{
        ProcessContext, Processor, ProcessorError, ProcessorRegistry, QueueError, QueueResult,
    };

    pub use crate::{QueueAtom, QueueBean, QueueStatus, Queueable, Status};

    pub use crate::{HeartbeatMonitor, ObservabilityLayer, QueueEvent};

    #[cfg(feature = "memory")]
    pub use crate::MemoryBroker;

    pub use async_trait::async_trait;
}
