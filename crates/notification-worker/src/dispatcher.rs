//! 通知调度器
//!
//! 单个消费循环：拉取一条消息、按类型交给渠道发送器投递，根据结果确认、
//! 带退避重投或丢弃。每条被消费的消息恰好确认一次，且确认发生在结果
//! 处理完之后；进程在确认前退出时，broker 会重新投递该消息。
//!
//! ## 退避模式
//!
//! - `Inline`（默认）：在循环内等待退避时长，重投新消息后再确认原消息，
//!   期间不拉取新消息。重投与确认之间崩溃会产生一份重复消息，但不会丢失。
//! - `Scheduled`（需显式开启）：先确认原消息，由后台任务在退避结束后重投，
//!   消费循环不阻塞。退避窗口内进程崩溃或重投失败都会丢失这条通知；
//!   正常关闭时会等待所有待重投任务完成。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use notify_shared::config::{BackoffMode, DispatcherConfig};
use notify_shared::events::NotificationJob;
use notify_shared::kafka::ConsumerMessage;
use notify_shared::observability::metrics;
use notify_shared::queue::{JobPublisher, JobQueue};
use notify_shared::retry::{RetryDecision, RetryPolicy};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::envelope::JobEnvelope;
use crate::error::WorkerError;
use crate::sender::{Delivered, DeliveryContext, DeliveryFailure, SenderRegistry};

/// 接收出错后的等待时长，避免 broker 持续报错时空转
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// 调度参数
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub policy: RetryPolicy,
    pub backoff_mode: BackoffMode,
    pub drop_permanent_failures: bool,
    pub delivery_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatchOptions {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config.max_retries, Duration::from_millis(config.backoff_ms)),
            backoff_mode: config.backoff_mode,
            drop_permanent_failures: config.drop_permanent_failures,
            delivery_timeout: Duration::from_secs(config.delivery_timeout_seconds),
        }
    }
}

/// 单条消息的最终处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// 已安排携带 `retries` 计数的重投
    RetryScheduled { retries: u32, delay: Duration },
    Dropped { reason: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Dropped { .. } => "dropped",
        }
    }
}

pub struct Dispatcher<Q> {
    queue: Q,
    publisher: Arc<dyn JobPublisher>,
    senders: SenderRegistry,
    options: DispatchOptions,
    scheduled: JoinSet<()>,
}

impl<Q: JobQueue> Dispatcher<Q> {
    pub fn new(
        queue: Q,
        publisher: Arc<dyn JobPublisher>,
        senders: SenderRegistry,
        options: DispatchOptions,
    ) -> Self {
        Self {
            queue,
            publisher,
            senders,
            options,
            scheduled: JoinSet::new(),
        }
    }

    /// 消费循环，直到收到关闭信号或消息流结束
    ///
    /// 只有确认或重投失败会让循环以错误退出；单条任务的投递失败都在循环内消化。
    /// 返回前等待所有后台重投完成，队列随调度器一起释放。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            channels = ?self.senders.channels(),
            max_retries = self.options.policy.max_retries,
            backoff_ms = self.options.policy.backoff.as_millis() as u64,
            backoff_mode = ?self.options.backoff_mode,
            "通知调度器已启动"
        );

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let received = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，调度器退出");
                        break Ok(());
                    }
                    continue;
                }

                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(message)) => {
                    if let Err(e) = self.process(message).await {
                        error!(error = %e, "队列传输失败，调度器停止");
                        break Err(e);
                    }
                }
                Ok(None) => {
                    warn!("消息流已结束");
                    break Ok(());
                }
                Err(e) => {
                    error!(error = %e, "接收消息出错");
                    tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                }
            }
        };

        self.wait_scheduled().await;
        info!("通知调度器已停止");
        result
    }

    /// 处理一条消息，返回其最终结果
    ///
    /// 返回 `Ok` 时该消息已被确认。
    #[instrument(skip_all, fields(partition = message.partition, offset = message.offset))]
    pub async fn process(
        &mut self,
        message: ConsumerMessage,
    ) -> Result<DispatchOutcome, WorkerError> {
        self.reap_scheduled();

        let envelope = JobEnvelope::decode(&message);
        let result = match envelope.job() {
            Ok(job) => deliver(&self.senders, self.options.delivery_timeout, &job).await,
            Err(failure) => Err(failure),
        };

        let outcome = match result {
            Ok(delivered) => {
                self.ack(&message).await?;
                info!(
                    user_id = ?envelope.user_id(),
                    channel = envelope.channel_label(),
                    retries = envelope.retries(),
                    provider_id = ?delivered.provider_id,
                    "通知已投递"
                );
                DispatchOutcome::Delivered
            }
            Err(failure) => self.handle_failure(&message, &envelope, failure).await?,
        };

        metrics::record_job_outcome(envelope.channel_label(), outcome.label());
        Ok(outcome)
    }

    /// 等待所有后台重投任务结束
    pub async fn wait_scheduled(&mut self) {
        while let Some(joined) = self.scheduled.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "后台重投任务异常退出");
            }
        }
    }

    /// 尚未完成的后台重投数量
    pub fn pending_retries(&self) -> usize {
        self.scheduled.len()
    }

    fn reap_scheduled(&mut self) {
        while let Some(joined) = self.scheduled.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "后台重投任务异常退出");
            }
        }
    }

    async fn handle_failure(
        &mut self,
        message: &ConsumerMessage,
        envelope: &JobEnvelope,
        failure: DeliveryFailure,
    ) -> Result<DispatchOutcome, WorkerError> {
        let retries = envelope.retries();

        if failure.is_permanent() && self.options.drop_permanent_failures {
            self.ack(message).await?;
            error!(
                user_id = ?envelope.user_id(),
                channel = envelope.channel_label(),
                retries,
                error = %failure,
                payload = %message.payload_lossy(),
                "永久性失败，丢弃通知"
            );
            return Ok(DispatchOutcome::Dropped {
                reason: failure.to_string(),
            });
        }

        let delay = match self.options.policy.decide(retries) {
            RetryDecision::Retry { delay } => delay,
            RetryDecision::GiveUp => {
                self.ack(message).await?;
                error!(
                    user_id = ?envelope.user_id(),
                    channel = envelope.channel_label(),
                    retries,
                    max_retries = self.options.policy.max_retries,
                    error = %failure,
                    payload = %message.payload_lossy(),
                    "已达最大重试次数，丢弃通知"
                );
                return Ok(DispatchOutcome::Dropped {
                    reason: failure.to_string(),
                });
            }
        };

        let next_retries = retries + 1;
        let next = envelope.next_attempt(next_retries);
        warn!(
            user_id = ?envelope.user_id(),
            channel = envelope.channel_label(),
            retries = next_retries,
            max_retries = self.options.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "投递失败，安排重试"
        );

        match self.options.backoff_mode {
            BackoffMode::Inline => {
                tokio::time::sleep(delay).await;
                self.publisher
                    .publish(next)
                    .await
                    .map_err(|e| WorkerError::transport("republish", e))?;
                self.ack(message).await?;
            }
            BackoffMode::Scheduled => {
                self.ack(message).await?;
                let publisher = Arc::clone(&self.publisher);
                self.scheduled.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = publisher.publish(next).await {
                        error!(error = %e, retries = next_retries, "延迟重投失败，通知丢失");
                    }
                });
            }
        }

        Ok(DispatchOutcome::RetryScheduled {
            retries: next_retries,
            delay,
        })
    }

    async fn ack(&mut self, message: &ConsumerMessage) -> Result<(), WorkerError> {
        self.queue
            .ack(message)
            .await
            .map_err(|e| WorkerError::transport("ack", e))
    }
}

/// 调用渠道发送器，超时与 panic 都折算为临时性失败
async fn deliver(
    senders: &SenderRegistry,
    timeout: Duration,
    job: &NotificationJob,
) -> Result<Delivered, DeliveryFailure> {
    let Some(sender) = senders.get(job.kind) else {
        return Err(DeliveryFailure::transient(format!(
            "渠道 {} 未注册发送器",
            job.kind
        )));
    };

    let context = DeliveryContext {
        user_id: job.user_id,
        retries: job.retries,
    };
    let started = Instant::now();
    let attempt = AssertUnwindSafe(sender.deliver(&job.to, &job.message, &context)).catch_unwind();

    let result = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(DeliveryFailure::transient("发送器 panic")),
        Err(_) => Err(DeliveryFailure::transient(format!(
            "投递超时 ({}ms)",
            timeout.as_millis()
        ))),
    };

    metrics::record_delivery(
        job.kind.as_str(),
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );
    result
}
