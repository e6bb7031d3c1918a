//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为 `JobPublisher` / `JobQueue` 实现，
//! 统一消息头映射、错误映射和手动确认语义。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::NotifyError;
use crate::queue::{JobPublisher, JobQueue, QueueMessage};
use crate::retry::retry_forever;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称，防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    pub const NOTIFICATIONS: &str = "notifications";
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
/// topic/partition/offset 同时充当确认凭据。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            headers,
        }
    }

    /// 负载的可读形式，非 UTF-8 字节以替换字符呈现，仅用于日志
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 封装 `FutureProducer` 并绑定目标 topic，
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `acks=all` 加幂等写入，broker 重启后消息不丢失。
    pub fn new(config: &KafkaConfig) -> Result<Self, NotifyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| NotifyError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, topic = %config.topic, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// 发送原始字节消息
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(i32, i64), NotifyError> {
        let mut owned_headers = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned_headers = owned_headers.insert(Header {
                key: name,
                value: Some(value.as_bytes()),
            });
        }

        let mut record = FutureRecord::<str, [u8]>::to(topic)
            .payload(payload)
            .headers(owned_headers);
        if let Some(key) = key {
            record = record.key(key);
        }

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| NotifyError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }
}

#[async_trait]
impl JobPublisher for KafkaProducer {
    async fn publish(&self, message: QueueMessage) -> Result<(), NotifyError> {
        self.send(
            &self.topic,
            message.key.as_deref(),
            &message.payload,
            &message.headers,
        )
        .await
        .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
///
/// 关闭自动提交：只有调用 `ack` 后 offset 才会提交，
/// 进程在处理中途退出时未确认的消息会被重新投递。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// 同一消费组内的多个实例竞争消费同一 topic，由 Kafka 负责分区分配。
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, NotifyError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| NotifyError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// 订阅任务 topic
    pub fn subscribe(&self) -> Result<(), NotifyError> {
        self.consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| NotifyError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(topic = %self.topic, "已订阅 Kafka topic");
        Ok(())
    }

    /// 探测 broker 是否可达
    pub fn probe(&self, timeout: Duration) -> Result<(), NotifyError> {
        self.consumer
            .fetch_metadata(Some(&self.topic), timeout)
            .map(|_| ())
            .map_err(|e| NotifyError::Kafka(format!("获取元数据失败: {e}")))
    }

    /// 以固定间隔无限等待 broker 就绪
    pub async fn wait_for_broker(&self, interval: Duration) {
        retry_forever(interval, "kafka_connect", || async {
            self.probe(Duration::from_secs(5))
        })
        .await;

        info!(topic = %self.topic, "Kafka broker 已就绪");
    }
}

#[async_trait]
impl JobQueue for KafkaConsumer {
    async fn receive(&mut self) -> Result<Option<ConsumerMessage>, NotifyError> {
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| NotifyError::Kafka(format!("接收消息出错: {e}")))?;

        let msg = ConsumerMessage::from_borrowed(&borrowed);
        debug!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            "收到 Kafka 消息"
        );
        Ok(Some(msg))
    }

    async fn ack(&mut self, message: &ConsumerMessage) -> Result<(), NotifyError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )
        .map_err(|e| NotifyError::Kafka(format!("构造提交位点失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| NotifyError::Kafka(format!("提交 offset 失败: {e}")))?;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "消息已确认"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
