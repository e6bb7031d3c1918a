//! 通知投递 worker
//!
//! 从队列消费通知任务，按类型分发到邮件、短信、站内信发送器，
//! 失败时以固定退避重投，超过重试上限后丢弃。

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod sender;

pub use dispatcher::{DispatchOptions, DispatchOutcome, Dispatcher};
pub use envelope::JobEnvelope;
pub use error::WorkerError;
pub use sender::{
    ChannelSender, Delivered, DeliveryContext, DeliveryFailure, FailureKind, SenderRegistry,
};
