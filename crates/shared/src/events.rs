//! 通知任务的线上格式
//!
//! 提交端把 `NotificationRequest` 原样写入队列；调度器消费时解析为
//! `NotificationJob`，重试时只修改 `retries` 字段后作为新消息重新投递。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// 承载重试计数的消息头，负载无法解析为 JSON 对象时以它为准
pub const RETRIES_HEADER: &str = "x-retries";

/// 通知渠道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Sms,
    InApp,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [Self::Email, Self::Sms, Self::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InApp => "inapp",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "inapp" => Ok(Self::InApp),
            other => Err(NotifyError::Validation(format!(
                "不支持的通知类型: {other}"
            ))),
        }
    }
}

/// 队列中流转的通知任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// 目标地址，含义随类型变化（邮箱、手机号、用户标识）
    pub to: String,
    pub message: String,
    /// 缺省视为 0，仅由调度器递增
    #[serde(default)]
    pub retries: u32,
}

/// 提交端接收的通知请求
///
/// `type` 保持为字符串原样入队，未知类型由调度器在投递时判定为失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub to: String,
    pub message: String,
}

impl NotificationRequest {
    pub fn is_inapp(&self) -> bool {
        self.kind == NotificationType::InApp.as_str()
    }
}
