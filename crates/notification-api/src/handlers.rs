//! 提交与查询接口处理器

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use notify_shared::events::{NotificationRequest, NotificationType};
use notify_shared::inapp::{InAppRecord, NewInAppRecord};
use notify_shared::observability::metrics;
use notify_shared::queue::QueueMessage;
use serde_json::{Value, json};
use tracing::info;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Notification Service is running!" }))
}

/// 提交通知
///
/// POST /notifications
///
/// 请求原样写入队列，`type` 不在此校验，未知类型由 worker 判定。
/// 站内通知额外同步写入一条记录，保证提交后即可查询到；
/// worker 的站内信渠道还会再写一条。
pub async fn submit_notification(
    State(state): State<AppState>,
    payload: std::result::Result<Json<NotificationRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;

    let message = QueueMessage::new(serde_json::to_vec(&request)?)
        .with_key(request.user_id.to_string());
    state
        .publisher
        .publish(message)
        .await
        .map_err(|e| {
            if e.is_retryable() {
                ApiError::QueueUnavailable(e)
            } else {
                ApiError::Internal(e.to_string())
            }
        })?;

    if request.is_inapp() {
        state
            .store
            .insert(&NewInAppRecord::new(request.user_id, request.message.clone()))
            .await
            .map_err(ApiError::Store)?;
    }

    let kind = request
        .kind
        .parse::<NotificationType>()
        .map_or("unknown", |k| k.as_str());
    metrics::record_submission(kind);
    info!(user_id = request.user_id, kind = %request.kind, "通知已入队");

    Ok(Json(json!({ "status": "queued" })))
}

/// 查询用户的站内通知
///
/// GET /users/{user_id}/notifications
pub async fn list_user_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<InAppRecord>>> {
    let records = state
        .store
        .list_by_user(user_id)
        .await
        .map_err(ApiError::Store)?;
    Ok(Json(records))
}

/// 存活探针
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "notification-api"
    }))
}

/// 就绪探针：检查数据库连接
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.database {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };

    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": "notification-api",
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
