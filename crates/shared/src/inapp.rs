//! 站内通知存储
//!
//! 提交端（即时可见）和调度器的 InApp 渠道都会写入 `inapp_notifications`，
//! 查询端按 user_id 读取。写入是相互独立的单行插入，不需要跨行事务。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::error::Result;
use crate::events::NotificationType;

/// 已持久化的站内通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InAppRecord {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
}

/// 待写入的站内通知，id 由存储分配
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInAppRecord {
    pub user_id: i64,
    pub message: String,
    pub kind: String,
}

impl NewInAppRecord {
    pub fn new(user_id: i64, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            kind: NotificationType::InApp.as_str().to_string(),
        }
    }
}

/// 站内通知仓储接口
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait InAppStore: Send + Sync {
    /// 插入一条记录并返回带 id 的完整记录
    async fn insert(&self, record: &NewInAppRecord) -> Result<InAppRecord>;

    /// 按 id 升序返回某用户的全部记录
    async fn list_by_user(&self, user_id: i64) -> Result<Vec<InAppRecord>>;
}

/// 基于 PostgreSQL 的站内通知仓储
#[derive(Clone)]
pub struct PgInAppStore {
    pool: PgPool,
}

impl PgInAppStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InAppStore for PgInAppStore {
    #[instrument(skip(self, record), fields(user_id = record.user_id))]
    async fn insert(&self, record: &NewInAppRecord) -> Result<InAppRecord> {
        let row = sqlx::query_as::<_, InAppRecord>(
            r#"
            INSERT INTO inapp_notifications (user_id, message, type)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, message, type
            "#,
        )
        .bind(record.user_id)
        .bind(&record.message)
        .bind(&record.kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<InAppRecord>> {
        let rows = sqlx::query_as::<_, InAppRecord>(
            r#"
            SELECT id, user_id, message, type
            FROM inapp_notifications
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
