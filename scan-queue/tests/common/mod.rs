#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use scan_queue::prelude::*;
use scan_queue::MemoryBrokerConfig;

pub const URI: &str = "vm://localhost";

/// Broker with short poll and heartbeat intervals
pub fn fast_broker() -> MemoryBroker {
    MemoryBroker::with_config(MemoryBrokerConfig {
        poll_interval: Duration::from_millis(5),
        heartbeat_interval: Duration::from_millis(20),
        topic_capacity: 256,
        ..MemoryBrokerConfig::default()
    })
}

pub fn service_on(broker: &MemoryBroker, root: &str) -> Arc<QueueService<MemoryBroker>> {
    QueueService::new(
        broker.clone(),
        QueueServiceConfig::new().with_queue_root(root).with_uri(URI),
    )
}

pub async fn started_service(root: &str) -> (MemoryBroker, Arc<QueueService<MemoryBroker>>) {
    let broker = fast_broker();
    let service = service_on(&broker, root);
    service.init().await.expect("init");
    service.start().await.expect("start");
    (broker, service)
}

/// Poll `check` until it holds, failing the test after five seconds
pub async fn wait_until<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Completes immediately
pub struct Instant;

#[async_trait]
impl Processor<QueueAtom> for Instant {
    async fn execute(
        &mut self,
        _atom: &mut QueueAtom,
        _ctx: &ProcessContext<QueueAtom>,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// Always fails
pub struct Broken;

#[async_trait]
impl Processor<QueueAtom> for Broken {
    async fn execute(
        &mut self,
        _atom: &mut QueueAtom,
        _ctx: &ProcessContext<QueueAtom>,
    ) -> Result<(), ProcessorError> {
        Err(ProcessorError::failed("detector not responding"))
    }
}

/// Runs for `steps` checkpoints, `step` apart, reporting progress
pub struct Stepper {
    pub steps: u32,
    pub step: Duration,
}

#[async_trait]
impl Processor<QueueAtom> for Stepper {
    async fn execute(
        &mut self,
        atom: &mut QueueAtom,
        ctx: &ProcessContext<QueueAtom>,
    ) -> Result<(), ProcessorError> {
        for done in 0..self.steps {
            ctx.checkpoint(atom).await?;
            tokio::time::sleep(self.step).await;
            let percent = f64::from(done + 1) * 100.0 / f64::from(self.steps);
            ctx.report(atom, percent, format!("step {}", done + 1)).await?;
        }
        Ok(())
    }
}

/// Job that holds the job queue for `duration`
pub struct SlowJob {
    pub duration: Duration,
}

#[async_trait]
impl Processor<QueueBean> for SlowJob {
    async fn execute(
        &mut self,
        _job: &mut QueueBean,
        _ctx: &ProcessContext<QueueBean>,
    ) -> Result<(), ProcessorError> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Status of `bean_id` in the status set of an active queue
pub async fn atom_status(
    service: &QueueService<MemoryBroker>,
    queue_id: &str,
    bean_id: &str,
) -> Option<Status> {
    service
        .active_queue_status_set(queue_id)
        .await
        .ok()?
        .into_iter()
        .find(|atom| atom.unique_id() == bean_id)
        .map(|atom| atom.status())
}

/// Status of `bean_id` in the job queue's status set
pub async fn job_status(service: &QueueService<MemoryBroker>, bean_id: &str) -> Option<Status> {
    service
        .job_queue_status_set()
        .await
        .ok()?
        .into_iter()
        .find(|bean| bean.unique_id() == bean_id)
        .map(|bean| bean.status())
}

pub async fn wait_for_atom(
    service: &QueueService<MemoryBroker>,
    queue_id: &str,
    bean_id: &str,
    status: Status,
) {
    for _ in 0..500 {
        if atom_status(service, queue_id, bean_id).await == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("atom {bean_id} never reached {status}");
}

pub async fn wait_for_job(
    service: &QueueService<MemoryBroker>,
    bean_id: &str,
    status: Status,
) -> QueueBean {
    for _ in 0..500 {
        let found = service
            .job_queue_status_set()
            .await
            .unwrap_or_default()
            .into_iter()
            .find(|bean| bean.unique_id() == bean_id && bean.status() == status);
        if let Some(bean) = found {
            return bean;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {bean_id} never reached {status}");
}
