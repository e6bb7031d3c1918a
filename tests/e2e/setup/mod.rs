//! 测试环境设置
//!
//! 所有组件共享同一个 `MemoryBroker` 与 `MemoryInAppStore`，
//! 调度器在后台任务中运行，通过 watch 通道关闭。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use notification_api::{AppState, app};
use notification_worker::sender::InAppSender;
use notification_worker::{DispatchOptions, Dispatcher, SenderRegistry, WorkerError};
use notify_shared::config::BackoffMode;
use notify_shared::queue::QueueMessage;
use notify_shared::retry::RetryPolicy;
use notify_shared::test_utils::{MemoryBroker, MemoryInAppStore};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// 测试用退避，远小于生产环境的 2 秒
pub const TEST_BACKOFF: Duration = Duration::from_millis(10);

pub struct TestEnvironment {
    pub broker: MemoryBroker,
    pub store: Arc<MemoryInAppStore>,
    api: Router,
    shutdown: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<Result<(), WorkerError>>>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryInAppStore::new());
        let api = app(AppState::new(Arc::new(broker.clone()), store.clone()));
        let (shutdown, _) = watch::channel(false);

        Self {
            broker,
            store,
            api,
            shutdown,
            dispatcher: None,
        }
    }

    /// 站内信渠道写入共享存储，其余渠道由调用方提供
    pub fn registry(&self) -> SenderRegistry {
        SenderRegistry::new().with(Arc::new(InAppSender::new(self.store.clone())))
    }

    /// 在后台启动调度器
    pub fn start_dispatcher(&mut self, senders: SenderRegistry, mode: BackoffMode) {
        let options = DispatchOptions {
            policy: RetryPolicy::new(3, TEST_BACKOFF),
            backoff_mode: mode,
            drop_permanent_failures: false,
            delivery_timeout: Duration::from_secs(5),
        };
        let dispatcher = Dispatcher::new(
            self.broker.clone(),
            Arc::new(self.broker.clone()),
            senders,
            options,
        );
        self.dispatcher = Some(tokio::spawn(dispatcher.run(self.shutdown.subscribe())));
    }

    /// 调用提交接口
    pub async fn submit(&self, body: &Value) -> Result<StatusCode> {
        let request = Request::builder()
            .method("POST")
            .uri("/notifications")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;
        let response = self.api.clone().oneshot(request).await?;
        Ok(response.status())
    }

    /// 调用查询接口
    pub async fn query(&self, user_id: i64) -> Result<Value> {
        let request = Request::builder()
            .uri(format!("/users/{user_id}/notifications"))
            .body(Body::empty())?;
        let response = self.api.clone().oneshot(request).await?;
        anyhow::ensure!(response.status() == StatusCode::OK, "查询失败: {}", response.status());
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// 调度器重投的消息（带 `x-retries` 头），不含提交接口写入的原始消息
    pub fn republished(&self) -> Vec<QueueMessage> {
        self.broker
            .published()
            .into_iter()
            .filter(|m| m.retries_header().is_some())
            .collect()
    }

    /// 发送关闭信号并等待调度器退出
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.dispatcher.take() {
            tokio::time::timeout(Duration::from_secs(5), handle).await???;
        }
        Ok(())
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
