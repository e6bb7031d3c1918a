//! 队列消息的解码与重投负载构造
//!
//! 负载是 JSON 对象时，重投只改写 `retries` 字段，其余字段原样保留；
//! 负载无法解析为对象时原样重投，重试计数改由 `x-retries` 消息头携带，
//! 这样格式错误的消息同样会在重试上限后被丢弃。

use notify_shared::events::{NotificationJob, NotificationType, RETRIES_HEADER};
use notify_shared::kafka::ConsumerMessage;
use notify_shared::queue::QueueMessage;
use serde_json::{Map, Value};

use crate::sender::DeliveryFailure;

const RETRIES_FIELD: &str = "retries";
const TYPE_FIELD: &str = "type";

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Object(Map<String, Value>),
    Opaque(Vec<u8>),
}

/// 一条已消费消息的解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct JobEnvelope {
    body: Body,
    key: Option<String>,
    retries: u32,
}

impl JobEnvelope {
    /// 解码消息，不会失败
    ///
    /// 重试计数依次取 `retries` 字段、`x-retries` 消息头，都没有时为 0。
    pub fn decode(message: &ConsumerMessage) -> Self {
        let header_retries = message
            .headers
            .get(RETRIES_HEADER)
            .and_then(|v| v.parse::<u32>().ok());

        let body = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(Value::Object(map)) => Body::Object(map),
            _ => Body::Opaque(message.payload.clone()),
        };

        let field_retries = match &body {
            Body::Object(map) => map.get(RETRIES_FIELD).and_then(retry_count),
            Body::Opaque(_) => None,
        };

        Self {
            body,
            key: message.key.clone(),
            retries: field_retries.or(header_retries).unwrap_or(0),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// 声明的渠道类型，缺失或不认识时为 `None`
    pub fn channel(&self) -> Option<NotificationType> {
        match &self.body {
            Body::Object(map) => map.get(TYPE_FIELD)?.as_str()?.parse().ok(),
            Body::Opaque(_) => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match &self.body {
            Body::Object(map) => map.get("user_id")?.as_i64(),
            Body::Opaque(_) => None,
        }
    }

    /// 指标与日志使用的渠道标签
    pub fn channel_label(&self) -> &'static str {
        self.channel().map_or("unknown", |c| c.as_str())
    }

    /// 解析为可投递的任务，格式错误和未知类型都是永久性失败
    pub fn job(&self) -> Result<NotificationJob, DeliveryFailure> {
        let map = match &self.body {
            Body::Object(map) => map,
            Body::Opaque(_) => {
                return Err(DeliveryFailure::permanent("负载不是 JSON 对象"));
            }
        };

        match map.get(TYPE_FIELD) {
            Some(Value::String(kind)) => {
                kind.parse::<NotificationType>()
                    .map_err(|e| DeliveryFailure::permanent(e.to_string()))?;
            }
            Some(other) => {
                return Err(DeliveryFailure::permanent(format!("type 字段不是字符串: {other}")));
            }
            None => return Err(DeliveryFailure::permanent("缺少 type 字段")),
        }

        // 计数已在 decode 时解析，不再按 u32 严格反序列化
        let mut fields = map.clone();
        fields.remove(RETRIES_FIELD);
        let mut job: NotificationJob = serde_json::from_value(Value::Object(fields))
            .map_err(|e| DeliveryFailure::permanent(format!("任务格式错误: {e}")))?;
        job.retries = self.retries;
        Ok(job)
    }

    /// 构造携带新重试计数的重投消息，保留原分区键
    pub fn next_attempt(&self, retries: u32) -> QueueMessage {
        let payload = match &self.body {
            Body::Object(map) => {
                let mut map = map.clone();
                map.insert(RETRIES_FIELD.to_string(), Value::from(retries));
                Value::Object(map).to_string().into_bytes()
            }
            Body::Opaque(bytes) => bytes.clone(),
        };

        let mut message =
            QueueMessage::new(payload).with_header(RETRIES_HEADER, retries.to_string());
        message.key = self.key.clone();
        message
    }
}

/// 非负整数，或小数部分为零的浮点数（如 `2.0`）
fn retry_count(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return Some(u32::try_from(n).unwrap_or(u32::MAX));
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 {
        Some(if f >= f64::from(u32::MAX) { u32::MAX } else { f as u32 })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_shared::kafka::topics;
    use serde_json::json;
    use std::collections::HashMap;

    fn consumed(payload: &[u8], headers: &[(&str, &str)]) -> ConsumerMessage {
        ConsumerMessage {
            topic: topics::NOTIFICATIONS.to_string(),
            partition: 0,
            offset: 3,
            key: Some("7".to_string()),
            payload: payload.to_vec(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_decode_valid_job() {
        let payload = json!({"user_id": 7, "type": "sms", "to": "+1555", "message": "hi", "retries": 1});
        let envelope = JobEnvelope::decode(&consumed(payload.to_string().as_bytes(), &[]));

        assert_eq!(envelope.retries(), 1);
        assert_eq!(envelope.user_id(), Some(7));
        assert_eq!(envelope.channel_label(), "sms");

        let job = envelope.job().unwrap();
        assert_eq!(job.user_id, 7);
        assert_eq!(job.kind, NotificationType::Sms);
        assert_eq!(job.retries, 1);
    }

    #[test]
    fn test_missing_retries_defaults_to_zero() {
        let payload = json!({"user_id": 7, "type": "email", "to": "a@b.c", "message": "hi"});
        let envelope = JobEnvelope::decode(&consumed(payload.to_string().as_bytes(), &[]));
        assert_eq!(envelope.retries(), 0);
    }

    #[test]
    fn test_integral_float_retries_are_counted() {
        let payload = br#"{"user_id": 7, "type": "sms", "to": "+1555", "message": "hi", "retries": 2.0}"#;
        let envelope = JobEnvelope::decode(&consumed(payload, &[(RETRIES_HEADER, "0")]));

        assert_eq!(envelope.retries(), 2);
        assert_eq!(envelope.job().unwrap().retries, 2);

        let body: Value = serde_json::from_slice(&envelope.next_attempt(3).payload).unwrap();
        assert_eq!(body["retries"], json!(3));
    }

    #[test]
    fn test_fractional_retries_fall_back_to_header() {
        let payload = br#"{"user_id": 7, "type": "sms", "to": "+1555", "message": "hi", "retries": 1.5}"#;
        let envelope = JobEnvelope::decode(&consumed(payload, &[(RETRIES_HEADER, "1")]));
        assert_eq!(envelope.retries(), 1);
    }

    #[test]
    fn test_unknown_type_is_permanent() {
        let payload = json!({"user_id": 7, "type": "bogus", "to": "x", "message": "hi", "retries": 2});
        let envelope = JobEnvelope::decode(&consumed(payload.to_string().as_bytes(), &[]));

        assert_eq!(envelope.retries(), 2);
        assert_eq!(envelope.channel_label(), "unknown");
        assert!(envelope.job().unwrap_err().is_permanent());
    }

    #[test]
    fn test_missing_field_is_permanent() {
        let payload = json!({"user_id": 7, "type": "email", "message": "hi"});
        let envelope = JobEnvelope::decode(&consumed(payload.to_string().as_bytes(), &[]));
        assert!(envelope.job().unwrap_err().is_permanent());
    }

    #[test]
    fn test_next_attempt_preserves_unknown_fields() {
        let payload = json!({
            "user_id": 7,
            "type": "bogus",
            "to": "x",
            "message": "hi",
            "trace": {"origin": "batch"}
        });
        let envelope = JobEnvelope::decode(&consumed(payload.to_string().as_bytes(), &[]));

        let next = envelope.next_attempt(1);
        let body: Value = serde_json::from_slice(&next.payload).unwrap();

        assert_eq!(body["retries"], json!(1));
        assert_eq!(body["type"], json!("bogus"));
        assert_eq!(body["trace"], json!({"origin": "batch"}));
        assert_eq!(next.retries_header(), Some(1));
        assert_eq!(next.key.as_deref(), Some("7"));
    }

    #[test]
    fn test_opaque_payload_counts_retries_in_header() {
        let envelope = JobEnvelope::decode(&consumed(b"not json", &[(RETRIES_HEADER, "2")]));

        assert_eq!(envelope.retries(), 2);
        assert!(envelope.job().unwrap_err().is_permanent());

        let next = envelope.next_attempt(3);
        assert_eq!(next.payload, b"not json");
        assert_eq!(next.retries_header(), Some(3));
    }

    #[test]
    fn test_non_object_json_is_opaque() {
        let envelope = JobEnvelope::decode(&consumed(b"[1,2,3]", &[]));
        assert_eq!(envelope.retries(), 0);
        assert!(envelope.job().is_err());
        assert_eq!(envelope.next_attempt(1).payload, b"[1,2,3]");
    }
}
