//! Operator-facing façade over a queue service.
//!
//! The controller only resolves queue names through the service. Bean
//! requests (remove, reorder, pause, resume, terminate) are carried out
//! directly against the broker.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    broker::BrokerGateway,
    service::{QueueService, Routable},
    types::{CommandSent, Queueable, Status},
    QueueError, QueueResult,
};

pub struct QueueController<G: BrokerGateway> {
    service: Arc<QueueService<G>>,
}

impl<G: BrokerGateway> QueueController<G> {
    pub fn new(service: Arc<QueueService<G>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<QueueService<G>> {
        &self.service
    }

    pub async fn start_queue_service(&self) -> QueueResult<()> {
        self.service.start().await
    }

    pub async fn stop_queue_service(&self, force: bool) -> QueueResult<()> {
        self.service.stop(force).await
    }

    pub async fn submit<T: Routable>(&self, bean: T, queue_id: &str) -> QueueResult<T> {
        self.service.submit(bean, queue_id).await
    }

    /// Take a bean that has not started yet off its queue
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn remove<T: Routable>(&self, bean: &T, queue_id: &str) -> QueueResult<bool> {
        let current = self.find_bean::<T>(bean.unique_id(), queue_id).await?;
        if current.status() != Status::Submitted {
            return Err(illegal(&current, "remove"));
        }
        self.remove_submitted(&current, queue_id).await
    }

    /// Move a waiting bean; positive `amount` moves it towards the head
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn reorder<T: Routable>(
        &self,
        bean: &T,
        queue_id: &str,
        amount: i32,
    ) -> QueueResult<bool> {
        let current = self.find_bean::<T>(bean.unique_id(), queue_id).await?;
        if current.status() != Status::Submitted {
            return Err(illegal(&current, "reorder"));
        }

        let queue = T::resolve(&self.service, queue_id)?;
        let submitter = self
            .service
            .gateway()
            .create_submitter::<T>(queue.uri(), &queue.names().submission_queue_name)
            .await?;
        let moved = submitter.reorder(&current, amount).await;
        submitter.disconnect().await?;
        moved
    }

    /// Ask a running bean to pause
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn pause<T: Routable>(&self, bean: &T, queue_id: &str) -> QueueResult<T> {
        let current = self.find_bean::<T>(bean.unique_id(), queue_id).await?;
        if !current.status().is_running() {
            return Err(illegal(&current, "pause"));
        }
        self.request(current, queue_id, Status::RequestPause).await
    }

    /// Ask a paused bean to carry on
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn resume<T: Routable>(&self, bean: &T, queue_id: &str) -> QueueResult<T> {
        let current = self.find_bean::<T>(bean.unique_id(), queue_id).await?;
        if !current.status().is_paused() {
            return Err(illegal(&current, "resume"));
        }
        self.request(current, queue_id, Status::RequestResume).await
    }

    /// Terminate a bean
    ///
    /// A bean still waiting to run is simply removed from its queue.
    #[instrument(skip(self, bean), fields(bean_id = %bean.unique_id()))]
    pub async fn terminate<T: Routable>(&self, bean: &T, queue_id: &str) -> QueueResult<T> {
        let mut current = self.find_bean::<T>(bean.unique_id(), queue_id).await?;
        if current.status().is_final() {
            return Err(illegal(&current, "terminate"));
        }

        if current.status() == Status::Submitted {
            if self.remove_submitted(&current, queue_id).await? {
                info!("Removed waiting bean {} instead of terminating it", current.unique_id());
                current.set_status(Status::Terminated);
                return Ok(current);
            }
            // Picked up meanwhile; fall through to a terminate request
            warn!("Bean {} left the submission queue before removal", current.unique_id());
        }
        self.service.terminate(current, queue_id).await
    }

    pub async fn pause_queue(&self, queue_id: &str) -> QueueResult<CommandSent> {
        self.service.pause_queue(queue_id).await
    }

    pub async fn resume_queue(&self, queue_id: &str) -> QueueResult<CommandSent> {
        self.service.resume_queue(queue_id).await
    }

    pub async fn kill_queue(
        &self,
        queue_id: &str,
        disconnect: bool,
        restart: bool,
        exit_process: bool,
    ) -> QueueResult<CommandSent> {
        self.service
            .kill_queue_with(queue_id, disconnect, restart, exit_process)
            .await
    }

    /// Current status of a bean, looked up by ID
    pub async fn bean_status<T: Routable>(&self, bean_id: &str, queue_id: &str) -> QueueResult<Status> {
        Ok(self.find_bean::<T>(bean_id, queue_id).await?.status())
    }

    /// Latest state of a bean: the submission queue first, then the
    /// status set
    async fn find_bean<T: Routable>(&self, bean_id: &str, queue_id: &str) -> QueueResult<T> {
        let queue = T::resolve(&self.service, queue_id)?;
        if let Some(bean) = queue
            .submission_queue()
            .await?
            .into_iter()
            .find(|b| b.unique_id() == bean_id)
        {
            return Ok(bean);
        }
        queue
            .status_set()
            .await?
            .into_iter()
            .find(|b| b.unique_id() == bean_id)
            .ok_or_else(|| QueueError::BeanNotFound(bean_id.to_string()))
    }

    async fn remove_submitted<T: Routable>(&self, bean: &T, queue_id: &str) -> QueueResult<bool> {
        let queue = T::resolve(&self.service, queue_id)?;
        let submitter = self
            .service
            .gateway()
            .create_submitter::<T>(queue.uri(), &queue.names().submission_queue_name)
            .await?;
        let removed = submitter.remove(bean).await;
        submitter.disconnect().await?;
        removed
    }

    async fn request<T: Routable>(&self, mut bean: T, queue_id: &str, status: Status) -> QueueResult<T> {
        let queue = T::resolve(&self.service, queue_id)?;
        bean.set_status(status);

        let publisher = self
            .service
            .gateway()
            .create_publisher::<T>(queue.uri(), &queue.names().status_topic_name)
            .await?;
        let sent = publisher.broadcast(&bean).await;
        publisher.disconnect().await?;
        sent?;

        info!("Requested {} for {} on {}", status, bean.unique_id(), queue_id);
        Ok(bean)
    }
}

fn illegal<T: Queueable>(bean: &T, operation: &'static str) -> QueueError {
    QueueError::IllegalBeanState {
        bean: bean.name().to_string(),
        status: bean.status(),
        operation,
    }
}
