//! 投递 worker 错误类型
//!
//! 单条任务的投递失败不属于这里：它们以 `DeliveryFailure` 值的形式留在调度循环内部。
//! 这里只描述会让调度器停止的错误（队列传输故障）和启动阶段的装配错误。

use notify_shared::error::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// 确认或重新投递失败，未确认的消息会在重启后重新投递
    #[error("队列传输失败: {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: NotifyError,
    },

    #[error("发送器初始化失败: 渠道={channel}, 原因={reason}")]
    SenderSetup { channel: String, reason: String },

    #[error(transparent)]
    Shared(#[from] NotifyError),
}

impl WorkerError {
    pub fn transport(operation: &'static str, source: NotifyError) -> Self {
        Self::Transport { operation, source }
    }
}
