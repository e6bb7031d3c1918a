//! 应用状态定义

use std::sync::Arc;

use notify_shared::database::Database;
use notify_shared::inapp::InAppStore;
use notify_shared::queue::JobPublisher;

/// Axum 应用共享状态
///
/// 队列与存储以 trait 对象注入，测试时可替换为内存实现
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn JobPublisher>,
    pub store: Arc<dyn InAppStore>,
    /// 就绪探针使用；未设置时视为无数据库依赖
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(publisher: Arc<dyn JobPublisher>, store: Arc<dyn InAppStore>) -> Self {
        Self {
            publisher,
            store,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
