//! 邮件渠道
//!
//! 通过 STARTTLS SMTP 中继发送纯文本邮件，主题固定为 "Notification"。

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use notify_shared::config::EmailConfig;
use notify_shared::events::NotificationType;
use tracing::{debug, info};

use super::{ChannelSender, Delivered, DeliveryContext, DeliveryFailure};
use crate::error::WorkerError;

const SUBJECT: &str = "Notification";

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &EmailConfig) -> Result<Self, WorkerError> {
        let from: Mailbox = config
            .sender_address()
            .parse()
            .map_err(|e| setup_error(format!("无效的发件人地址: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| setup_error(format!("SMTP 中继配置错误: {e}")))?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        info!(host = %config.host, port = config.port, from = %from, "邮件渠道已初始化");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn setup_error(reason: String) -> WorkerError {
    WorkerError::SenderSetup {
        channel: NotificationType::Email.to_string(),
        reason,
    }
}

/// 构建邮件，收件地址非法属于永久性失败
fn build_message(from: &Mailbox, to: &str, body: &str) -> Result<Message, DeliveryFailure> {
    let recipient: Mailbox = to
        .parse()
        .map_err(|e| DeliveryFailure::permanent(format!("无效的收件地址 {to}: {e}")))?;

    Message::builder()
        .from(from.clone())
        .to(recipient)
        .subject(SUBJECT)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| DeliveryFailure::permanent(format!("构建邮件失败: {e}")))
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> NotificationType {
        NotificationType::Email
    }

    async fn deliver(
        &self,
        to: &str,
        message: &str,
        context: &DeliveryContext,
    ) -> Result<Delivered, DeliveryFailure> {
        let email = build_message(&self.from, to, message)?;

        match self.transport.send(email).await {
            Ok(response) => {
                debug!(user_id = context.user_id, code = %response.code(), "邮件已被中继接受");
                Ok(Delivered::default())
            }
            // 5xx 应答（如收件人被拒）重试无意义
            Err(e) if e.is_permanent() => {
                Err(DeliveryFailure::permanent(format!("SMTP 拒绝投递: {e}")))
            }
            Err(e) => Err(DeliveryFailure::transient(format!("SMTP 投递失败: {e}"))),
        }
    }
}
