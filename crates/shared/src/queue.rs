//! 任务队列抽象
//!
//! 调度器只依赖这两个 trait：`JobQueue` 负责拉取与确认，由单个调度器独占；
//! `JobPublisher` 负责投递新消息，可在提交端与后台重投任务之间共享。
//! 生产环境由 Kafka 实现，测试使用 `test_utils::MemoryBroker`。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::RETRIES_HEADER;
use crate::kafka::ConsumerMessage;

/// 待投递的队列消息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// 消息头中记录的重试次数
    pub fn retries_header(&self) -> Option<u32> {
        self.headers
            .get(RETRIES_HEADER)
            .and_then(|v| v.parse().ok())
    }
}

/// 消息投递端
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// 持久化投递一条消息，返回时 broker 已确认写入
    async fn publish(&self, message: QueueMessage) -> Result<()>;
}

/// 消息消费端
///
/// 每次 `receive` 最多返回一条未确认消息；调用方处理完毕后必须对该消息
/// 调用一次 `ack`。
#[async_trait]
pub trait JobQueue: Send {
    /// 阻塞直到有消息可用；返回 `None` 表示消息流已结束
    async fn receive(&mut self) -> Result<Option<ConsumerMessage>>;

    /// 确认消息已处理完毕，broker 可以永久移除
    async fn ack(&mut self, message: &ConsumerMessage) -> Result<()>;
}
