//! Per-bean-type execution units.
//!
//! A consumer asks its [`ProcessorRegistry`] for a fresh [`Processor`] for
//! every bean it pulls, then runs it with a [`ProcessContext`] through
//! which the processor publishes progress and observes pause/terminate
//! requests for its bean.

pub mod registry;
pub mod task;

pub use registry::{ProcessorFactory, ProcessorRegistry};
pub use task::TaskProcessor;

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    broker::Publisher,
    error::ProcessorError,
    types::{ConsumerId, Queueable, Status},
};

/// Executes one bean
///
/// Returning `Ok` marks the bean COMPLETE unless the processor already
/// left it in a final status. `ProcessorError::Failed` marks it FAILED and
/// `ProcessorError::Terminated` marks it TERMINATED.
#[async_trait]
pub trait Processor<T: Queueable>: Send {
    async fn execute(&mut self, bean: &mut T, ctx: &ProcessContext<T>)
        -> Result<(), ProcessorError>;
}

/// What the consumer wants the bean in flight to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeanControl {
    Run,
    Pause,
    Terminate,
}

/// Handle a processor uses to talk back to its queue
pub struct ProcessContext<T: Queueable> {
    publisher: Arc<dyn Publisher<T>>,
    control: watch::Receiver<BeanControl>,
    consumer_id: ConsumerId,
}

impl<T: Queueable> ProcessContext<T> {
    pub fn new(
        publisher: Arc<dyn Publisher<T>>,
        control: watch::Receiver<BeanControl>,
        consumer_id: ConsumerId,
    ) -> Self {
        Self {
            publisher,
            control,
            consumer_id,
        }
    }

    /// Consumer running this processor
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Status topic the bean's progress is published on
    pub fn status_topic(&self) -> &str {
        self.publisher.topic()
    }

    /// Publish the bean's current state on the status topic
    pub async fn publish(&self, bean: &T) -> Result<(), ProcessorError> {
        self.publisher.broadcast(bean).await?;
        Ok(())
    }

    /// Update progress and publish it
    pub async fn report(
        &self,
        bean: &mut T,
        percent_complete: f64,
        message: impl Into<String> + Send,
    ) -> Result<(), ProcessorError> {
        bean.set_percent_complete(percent_complete);
        bean.set_message(message);
        self.publish(bean).await
    }

    pub fn is_terminate_requested(&self) -> bool {
        *self.control.borrow() == BeanControl::Terminate
    }

    pub fn is_pause_requested(&self) -> bool {
        *self.control.borrow() == BeanControl::Pause
    }

    /// Honour pause and terminate requests
    ///
    /// Returns immediately while the bean may run. While a pause is
    /// requested the bean is published as PAUSED and this waits for a
    /// resume (published as RESUMED) or a terminate, which yields
    /// `ProcessorError::Terminated`.
    pub async fn checkpoint(&self, bean: &mut T) -> Result<(), ProcessorError> {
        let mut control = self.control.clone();
        loop {
            let requested = *control.borrow_and_update();
            match requested {
                BeanControl::Run => {
                    if bean.status() == Status::Paused {
                        bean.set_status(Status::Resumed);
                        self.publish(bean).await?;
                    }
                    return Ok(());
                }
                BeanControl::Terminate => return Err(ProcessorError::Terminated),
                BeanControl::Pause => {
                    if bean.status() != Status::Paused {
                        bean.set_status(Status::Paused);
                        self.publish(bean).await?;
                    }
                    // Sender gone means the consumer dropped this bean
                    if control.changed().await.is_err() {
                        return Err(ProcessorError::Terminated);
                    }
                }
            }
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueueAtom;
    use crate::QueueResult;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<Status>>,
    }

    #[async_trait]
    impl Publisher<QueueAtom> for RecordingPublisher {
        fn topic(&self) -> &str {
            "test.status.topic"
        }

        fn set_status_set(&mut self, _set_name: &str) {}

        async fn broadcast(&self, message: &QueueAtom) -> QueueResult<()> {
            self.sent.lock().push(message.status());
            Ok(())
        }

        async fn disconnect(&self) -> QueueResult<()> {
            Ok(())
        }
    }

    fn context(
        publisher: Arc<RecordingPublisher>,
    ) -> (watch::Sender<BeanControl>, ProcessContext<QueueAtom>) {
        let (tx, rx) = watch::channel(BeanControl::Run);
        (tx, ProcessContext::new(publisher, rx, ConsumerId::new()))
    }

    #[tokio::test]
    async fn checkpoint_passes_while_running() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (_tx, ctx) = context(publisher.clone());
        let mut atom = QueueAtom::new("move", "m1");
        atom.set_status(Status::Running);

        ctx.checkpoint(&mut atom).await.unwrap();
        assert!(publisher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_waits_out_a_pause() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (tx, ctx) = context(publisher.clone());
        let mut atom = QueueAtom::new("move", "m1");
        atom.set_status(Status::Running);
        tx.send(BeanControl::Pause).unwrap();

        let resume = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.send(BeanControl::Run).unwrap();
            tx
        });

        ctx.checkpoint(&mut atom).await.unwrap();
        let _tx = resume.await.unwrap();
        assert_eq!(atom.status(), Status::Resumed);
        assert_eq!(*publisher.sent.lock(), vec![Status::Paused, Status::Resumed]);
    }

    #[tokio::test]
    async fn checkpoint_reports_termination() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (tx, ctx) = context(publisher);
        let mut atom = QueueAtom::new("move", "m1");
        tx.send(BeanControl::Terminate).unwrap();

        assert!(ctx.is_terminate_requested());
        let err = ctx.checkpoint(&mut atom).await.unwrap_err();
        assert!(err.is_terminated());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }
}
