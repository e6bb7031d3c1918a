//! 日志初始化
//!
//! 基于 tracing-subscriber 的 fmt 层，支持 pretty 与 json 两种输出格式，
//! 过滤规则优先读取 RUST_LOG。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use super::ObservabilityConfig;

/// 是否使用 JSON 结构化日志
pub fn is_json(config: &ObservabilityConfig) -> bool {
    config.log_format.eq_ignore_ascii_case("json")
}

/// 构建环境过滤器：RUST_LOG 优先，其次使用配置中的级别
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局 subscriber
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let fmt_layer = if is_json(config) {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
