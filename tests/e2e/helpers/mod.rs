//! 测试辅助：可计数的发送器与轮询等待

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use notification_worker::{ChannelSender, Delivered, DeliveryContext, DeliveryFailure};
use notify_shared::events::NotificationType;

/// 始终返回临时性失败的发送器，记录调用次数与每次看到的重试计数
pub struct FailingSender {
    channel: NotificationType,
    attempts: AtomicUsize,
    seen_retries: parking_lot::Mutex<Vec<u32>>,
}

impl FailingSender {
    pub fn new(channel: NotificationType) -> Arc<Self> {
        Arc::new(Self {
            channel,
            attempts: AtomicUsize::new(0),
            seen_retries: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn seen_retries(&self) -> Vec<u32> {
        self.seen_retries.lock().clone()
    }
}

#[async_trait]
impl ChannelSender for FailingSender {
    fn channel(&self) -> NotificationType {
        self.channel
    }

    async fn deliver(
        &self,
        _to: &str,
        _message: &str,
        context: &DeliveryContext,
    ) -> Result<Delivered, DeliveryFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen_retries.lock().push(context.retries);
        Err(DeliveryFailure::transient("短信服务商不可用"))
    }
}

/// 轮询直到条件成立，超时返回错误
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("等待超时 ({timeout:?})");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
