//! 重试策略
//!
//! 通知任务投递失败后由调度器询问 `RetryPolicy::decide`：重试计数未达上限时
//! 以固定间隔重新投递，否则放弃。启动阶段连接 broker / 数据库则使用
//! `retry_forever` 无限重试，因为此时没有任务可丢弃。

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 单个任务允许的最大重试次数（不含首次投递）
pub const MAX_RETRIES: u32 = 3;

/// 两次投递之间的固定退避
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// RetryPolicy: 重试决策
// ---------------------------------------------------------------------------

/// 重试决策结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 退避 `delay` 后以 retries + 1 重新投递
    Retry { delay: Duration },
    /// 重试次数耗尽，确认并丢弃
    GiveUp,
}

/// 重试策略配置
///
/// 固定退避、无抖动、不区分渠道。`decide` 只依赖入参，没有副作用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 每次重试前的等待时间
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// 根据任务当前的重试计数做出决策
    pub fn decide(&self, retries: u32) -> RetryDecision {
        if retries < self.max_retries {
            RetryDecision::Retry {
                delay: self.backoff,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

// ---------------------------------------------------------------------------
// retry_forever: 启动阶段的无限重试
// ---------------------------------------------------------------------------

/// 以固定间隔无限重试，直到操作成功
///
/// 仅用于启动阶段等待基础设施就绪（broker、数据库）。
pub async fn retry_forever<F, Fut, T, E>(interval: Duration, operation_name: &str, mut operation: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u64 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return value;
            }
            Err(err) => {
                attempt += 1;
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = interval.as_millis() as u64,
                    error = %err,
                    "操作失败，等待后重试"
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
