use std::collections::HashSet;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ProcessContext, Processor};
use crate::{
    broker::BrokerGateway,
    error::ProcessorError,
    service::QueueService,
    types::{QueueAtom, QueueBean, QueueStatus, Queueable, Status},
    QueueError,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs a job's atoms, in order, in an active queue of its own
///
/// The active queue is registered for the job and deregistered when the
/// job ends, whatever the outcome. A failed atom fails the job and pauses
/// the job queue so nothing else runs until an operator resumes it.
pub struct TaskProcessor<G: BrokerGateway> {
    service: Weak<QueueService<G>>,
    poll_interval: Duration,
}

enum Progress {
    Done,
    Running { finished: usize },
    Failed(String),
}

/// Why a job's atoms did not all complete
enum TaskFailure {
    /// An atom ended FAILED or TERMINATED
    Atom(String),
    Processor(ProcessorError),
}

impl From<ProcessorError> for TaskFailure {
    fn from(err: ProcessorError) -> Self {
        Self::Processor(err)
    }
}

impl From<QueueError> for TaskFailure {
    fn from(err: QueueError) -> Self {
        Self::Processor(err.into())
    }
}

impl<G: BrokerGateway> TaskProcessor<G> {
    pub fn new(service: Weak<QueueService<G>>) -> Self {
        Self {
            service,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn run_atoms(
        &self,
        service: &QueueService<G>,
        queue_id: &str,
        bean: &mut QueueBean,
        ctx: &ProcessContext<QueueBean>,
    ) -> Result<(), TaskFailure> {
        let mut atom_ids = HashSet::new();
        let atoms = bean.atoms.clone();
        for mut atom in atoms {
            atom.inherit_from(bean.info());
            let submitted = service.submit(atom, queue_id).await?;
            atom_ids.insert(submitted.unique_id().to_string());
        }
        service.start_active_queue(queue_id).await?;

        let total = atom_ids.len();
        let mut reported = 0;
        loop {
            ctx.checkpoint(bean).await?;

            match self.progress(service, queue_id, &atom_ids).await? {
                Progress::Done => return Ok(()),
                Progress::Failed(reason) => return Err(TaskFailure::Atom(reason)),
                Progress::Running { finished } => {
                    if finished != reported {
                        reported = finished;
                        let percent = finished as f64 * 100.0 / total as f64;
                        ctx.report(bean, percent, format!("{finished} of {total} atoms done"))
                            .await?;
                    }
                }
            }

            match service.queue_status(queue_id) {
                Ok(QueueStatus::Started) => {}
                Ok(status) => {
                    return Err(ProcessorError::failed(format!(
                        "Active queue {queue_id} is {status} before its atoms finished"
                    ))
                    .into())
                }
                Err(e) => return Err(e.into()),
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn progress(
        &self,
        service: &QueueService<G>,
        queue_id: &str,
        atom_ids: &HashSet<String>,
    ) -> Result<Progress, QueueError> {
        let statuses: Vec<QueueAtom> = service.active_queue_status_set(queue_id).await?;
        let mut finished = 0;
        for atom in statuses.iter().filter(|a| atom_ids.contains(a.unique_id())) {
            match atom.status() {
                Status::Failed | Status::Terminated => {
                    return Ok(Progress::Failed(format!(
                        "Atom '{}' ended {}: {}",
                        atom.name(),
                        atom.status(),
                        atom.message().unwrap_or("no message")
                    )));
                }
                status if status.is_final() => finished += 1,
                _ => {}
            }
        }
        if finished == atom_ids.len() {
            Ok(Progress::Done)
        } else {
            Ok(Progress::Running { finished })
        }
    }
}

#[async_trait]
impl<G: BrokerGateway> Processor<QueueBean> for TaskProcessor<G> {
    async fn execute(
        &mut self,
        bean: &mut QueueBean,
        ctx: &ProcessContext<QueueBean>,
    ) -> Result<(), ProcessorError> {
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| ProcessorError::failed("Queue service is no longer running"))?;

        if bean.atoms.is_empty() {
            debug!("Job {} has no atoms", bean.unique_id());
            bean.set_message("No atoms to run");
            return Ok(());
        }

        let queue_id = service.register_new_active_queue().await?;
        info!("Running {} atoms of job {} in {}", bean.atoms.len(), bean.name(), queue_id);
        let outcome = self.run_atoms(&service, &queue_id, bean, ctx).await;

        let force = matches!(
            outcome,
            Err(TaskFailure::Processor(ProcessorError::Terminated))
        );
        match service.deregister_active_queue(&queue_id, force).await {
            Ok(()) => {}
            // Service shutdown got there first
            Err(QueueError::QueueNotFound(_)) | Err(QueueError::ServiceNotStarted) => {
                debug!("Active queue {} was already torn down", queue_id);
            }
            Err(e) => warn!("Could not deregister active queue {}: {}", queue_id, e),
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(TaskFailure::Processor(err)) => Err(err),
            Err(TaskFailure::Atom(reason)) => {
                warn!("Job {} failed: {}", bean.name(), reason);
                let paused = match service.job_queue_id() {
                    Ok(job_queue_id) => service.pause_queue(&job_queue_id).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                if let Err(e) = paused {
                    warn!("Could not pause the job queue: {}", e);
                }
                Err(ProcessorError::Failed(reason))
            }
        }
    }
}
