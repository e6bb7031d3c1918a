//! 短信渠道
//!
//! 调用 Twilio REST API：`POST {base}/2010-04-01/Accounts/{sid}/Messages.json`，
//! Basic 认证，表单字段 To / Body / MessagingServiceSid。

use std::time::Duration;

use async_trait::async_trait;
use notify_shared::config::SmsConfig;
use notify_shared::events::NotificationType;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use super::{ChannelSender, Delivered, DeliveryContext, DeliveryFailure, FailureKind};
use crate::error::WorkerError;

pub struct SmsSender {
    client: reqwest::Client,
    endpoint: String,
    account_sid: String,
    auth_token: String,
    messaging_service_sid: String,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

impl SmsSender {
    pub fn new(config: &SmsConfig) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| WorkerError::SenderSetup {
                channel: NotificationType::Sms.to_string(),
                reason: format!("创建 HTTP 客户端失败: {e}"),
            })?;

        let endpoint = messages_endpoint(&config.api_base_url, &config.account_sid);
        info!(endpoint = %endpoint, "短信渠道已初始化");

        Ok(Self {
            client,
            endpoint,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            messaging_service_sid: config.messaging_service_sid.clone(),
        })
    }
}

fn messages_endpoint(base_url: &str, account_sid: &str) -> String {
    format!(
        "{}/2010-04-01/Accounts/{}/Messages.json",
        base_url.trim_end_matches('/'),
        account_sid
    )
}

/// 非 2xx 应答的失败分类：限流和服务端错误可重试，其余 4xx 视为请求本身有误
fn classify_status(status: StatusCode) -> FailureKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> NotificationType {
        NotificationType::Sms
    }

    async fn deliver(
        &self,
        to: &str,
        message: &str,
        context: &DeliveryContext,
    ) -> Result<Delivered, DeliveryFailure> {
        let form = [
            ("To", to),
            ("Body", message),
            ("MessagingServiceSid", self.messaging_service_sid.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryFailure::transient(format!("短信接口请求失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            // 已被服务商接受，响应体解析失败不影响投递结果
            let provider_id = response
                .json::<MessageResource>()
                .await
                .ok()
                .map(|resource| resource.sid);
            debug!(user_id = context.user_id, sid = ?provider_id, "短信已提交");
            return Ok(Delivered { provider_id });
        }

        let body = response.text().await.unwrap_or_default();
        let reason = format!("短信接口返回 {status}: {body}");
        Err(match classify_status(status) {
            FailureKind::Transient => DeliveryFailure::transient(reason),
            FailureKind::Permanent => DeliveryFailure::permanent(reason),
        })
    }
}
