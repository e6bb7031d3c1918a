//! 站内信渠道：写入 `inapp_notifications`，用户通过查询接口读取

use std::sync::Arc;

use async_trait::async_trait;
use notify_shared::events::NotificationType;
use notify_shared::inapp::{InAppStore, NewInAppRecord};
use tracing::debug;

use super::{ChannelSender, Delivered, DeliveryContext, DeliveryFailure};

pub struct InAppSender {
    store: Arc<dyn InAppStore>,
}

impl InAppSender {
    pub fn new(store: Arc<dyn InAppStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> NotificationType {
        NotificationType::InApp
    }

    /// 记录归属于任务的 user_id，`to` 不参与存储
    async fn deliver(
        &self,
        _to: &str,
        message: &str,
        context: &DeliveryContext,
    ) -> Result<Delivered, DeliveryFailure> {
        let record = self
            .store
            .insert(&NewInAppRecord::new(context.user_id, message))
            .await
            .map_err(|e| DeliveryFailure::transient(format!("写入站内通知失败: {e}")))?;

        debug!(user_id = record.user_id, id = record.id, "站内通知已写入");
        Ok(Delivered {
            provider_id: Some(record.id.to_string()),
        })
    }
}
