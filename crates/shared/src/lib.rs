//! 共享库
//!
//! 包含通知提交端与投递 worker 共用的配置、错误处理、数据库连接、
//! 任务线上格式、Kafka 队列、重试策略与站内通知存储等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod inapp;
pub mod kafka;
pub mod observability;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod test_utils;
