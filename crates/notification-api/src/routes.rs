//! 路由配置

use axum::{
    Router, middleware,
    routing::{get, post},
};
use notify_shared::observability::middleware as obs_middleware;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::{handlers, state::AppState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 构建完整的应用路由
///
/// 每个请求只有一个 `http_request` span，由 `http_tracing` 创建并记录指标。
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/notifications", post(handlers::submit_notification))
        .route(
            "/users/{user_id}/notifications",
            get(handlers::list_user_notifications),
        )
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
