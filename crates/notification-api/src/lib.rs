//! 通知提交与查询服务
//!
//! 提交端把请求写入队列，由 notification-worker 异步投递；
//! 查询端读取站内通知记录。

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::app;
pub use state::AppState;
