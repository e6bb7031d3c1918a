//! 通知系统端到端测试
//!
//! 提交接口、内存队列、调度器和站内通知存储组装在同一进程内，
//! 覆盖完整的提交、投递、重试与丢弃流程：
//! - 站内通知提交后可查询
//! - 渠道持续失败时的重试与丢弃
//! - 未知类型的重试与丢弃

pub mod helpers;
pub mod setup;
pub mod suites;

pub use setup::TestEnvironment;
