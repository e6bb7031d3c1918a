//! 渠道发送器
//!
//! 通过 `ChannelSender` trait 抽象投递动作，邮件、短信、站内信各自实现。
//! 发送器把失败作为 `DeliveryFailure` 值返回而不是 panic 或向上抛错，
//! 由调度器统一决定重试或丢弃；发送器内部不做重试。
//!
//! 队列是至少一次投递，同一条通知可能多次调用 `deliver`，
//! 发送器不保证对终端用户恰好送达一次。

mod email;
mod inapp;
mod sms;

pub use email::EmailSender;
pub use inapp::InAppSender;
pub use sms::SmsSender;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::config::AppConfig;
use notify_shared::events::NotificationType;
use notify_shared::inapp::InAppStore;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::WorkerError;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 网络抖动、服务商 5xx、存储暂不可用等，重试可能成功
    Transient,
    /// 格式错误、未知类型、收件地址非法等，重试必然再次失败
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// 单次投递失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} 投递失败: {reason}")]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

/// 投递成功
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivered {
    /// 外部渠道返回的消息标识（短信 SID、站内信记录 id），用于追踪投递状态
    pub provider_id: Option<String>,
}

/// 投递上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryContext {
    pub user_id: i64,
    /// 当前消息的重试计数，首次投递为 0
    pub retries: u32,
}

/// 渠道发送器 trait，各渠道实现具体的投递逻辑
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 该发送器负责的渠道
    fn channel(&self) -> NotificationType;

    /// 向 `to` 投递 `message`
    async fn deliver(
        &self,
        to: &str,
        message: &str,
        context: &DeliveryContext,
    ) -> Result<Delivered, DeliveryFailure>;
}

/// 按渠道类型索引的发送器集合
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<NotificationType, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册发送器，同一渠道后注册的覆盖先注册的
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.register(sender);
        self
    }

    pub fn get(&self, channel: NotificationType) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn channels(&self) -> Vec<NotificationType> {
        NotificationType::ALL
            .into_iter()
            .filter(|c| self.senders.contains_key(c))
            .collect()
    }

    /// 根据配置装配三个渠道
    ///
    /// 邮件或短信缺少必要凭据时跳过注册并告警，对应任务按未注册渠道处理。
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn InAppStore>,
    ) -> Result<Self, WorkerError> {
        let mut registry = Self::new().with(Arc::new(InAppSender::new(store)));

        if config.email.sender_address().is_empty() {
            warn!("未配置发件地址，邮件渠道不可用");
        } else {
            registry.register(Arc::new(EmailSender::new(&config.email)?));
        }

        if config.sms.account_sid.is_empty() || config.sms.messaging_service_sid.is_empty() {
            warn!("未配置短信服务商凭据，短信渠道不可用");
        } else {
            registry.register(Arc::new(SmsSender::new(&config.sms)?));
        }

        info!(channels = ?registry.channels(), "渠道发送器已装配");
        Ok(registry)
    }
}
