//! 提交与查询接口错误类型

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notify_shared::error::NotifyError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 写入队列失败，请求未被受理
    #[error("队列不可用: {0}")]
    QueueUnavailable(#[source] NotifyError),

    #[error("存储错误: {0}")]
    Store(#[source] NotifyError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
            Self::Store(_) => "STORE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = match &self {
            Self::Validation(_) => self.to_string(),
            Self::QueueUnavailable(e) => {
                tracing::error!(code = e.code(), error = %e, "写入队列失败");
                "通知暂时无法受理，请稍后重试".to_string()
            }
            Self::Store(e) => {
                tracing::error!(code = e.code(), error = %e, "站内通知存储失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
