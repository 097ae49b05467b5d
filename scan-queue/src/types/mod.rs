pub mod ids;
pub mod status;
pub mod bean;
pub mod commands;
pub mod events;

pub use ids::ConsumerId;
pub use status::{QueueStatus, Status};
pub use bean::{BeanInfo, Queueable, QueueAtom, QueueBean, TASK_BEAN_TYPE};
pub use commands::{CommandSent, ConsumerCommand, ConsumerStatus, HeartbeatBean, KillBean, PauseBean};
pub use events::QueueEvent;
