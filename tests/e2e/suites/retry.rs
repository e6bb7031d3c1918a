//! 持续失败的任务：重试三次后丢弃
//!
//! 每条任务共 4 次投递尝试、4 次确认、3 次重投，重试计数 0→1→2→3。

use std::sync::Arc;
use std::time::Duration;

use notify_shared::config::BackoffMode;
use notify_shared::events::NotificationType;
use serde_json::{Value, json};

use crate::helpers::{FailingSender, wait_until};
use crate::setup::TestEnvironment;

fn republished_retries(env: &TestEnvironment) -> Vec<Value> {
    env.republished()
        .iter()
        .map(|m| {
            let body: Value = serde_json::from_slice(&m.payload).unwrap();
            body["retries"].clone()
        })
        .collect()
}

async fn wait_for_acks(env: &TestEnvironment, expected: usize) {
    let broker = env.broker.clone();
    wait_until(Duration::from_secs(5), || {
        let broker = broker.clone();
        async move { broker.acked().len() >= expected && broker.pending() == 0 }
    })
    .await
    .unwrap();
}

async fn run_failing_sms(mode: BackoffMode) {
    let mut env = TestEnvironment::new();
    let sms = FailingSender::new(NotificationType::Sms);
    let senders = env.registry().with(sms.clone() as Arc<_>);
    env.start_dispatcher(senders, mode);

    let status = env
        .submit(&json!({"user_id": 7, "type": "sms", "to": "+15550001111", "message": "hi"}))
        .await
        .unwrap();
    assert!(status.is_success());

    wait_for_acks(&env, 4).await;
    // 丢弃之后不应再有新的投递
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sms.attempts(), 4);
    assert_eq!(sms.seen_retries(), vec![0, 1, 2, 3]);
    assert_eq!(env.broker.acked().len(), 4);
    assert_eq!(env.broker.in_flight(), 0);
    assert_eq!(republished_retries(&env), vec![json!(1), json!(2), json!(3)]);

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_sms_is_dropped_after_three_retries() {
    run_failing_sms(BackoffMode::Inline).await;
}

#[tokio::test]
async fn test_failing_sms_scheduled_backoff() {
    run_failing_sms(BackoffMode::Scheduled).await;
}

#[tokio::test]
async fn test_unknown_type_exhausts_retries() {
    let mut env = TestEnvironment::new();
    let sms = FailingSender::new(NotificationType::Sms);
    let senders = env.registry().with(sms.clone() as Arc<_>);
    env.start_dispatcher(senders, BackoffMode::Inline);

    let status = env
        .submit(&json!({"user_id": 7, "type": "bogus", "to": "x", "message": "hi"}))
        .await
        .unwrap();
    assert!(status.is_success());

    wait_for_acks(&env, 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sms.attempts(), 0);
    assert_eq!(env.broker.acked().len(), 4);
    assert_eq!(republished_retries(&env), vec![json!(1), json!(2), json!(3)]);

    // 重投负载除 retries 外保持原样
    let last: Value = serde_json::from_slice(&env.republished()[2].payload).unwrap();
    assert_eq!(
        last,
        json!({"user_id": 7, "type": "bogus", "to": "x", "message": "hi", "retries": 3})
    );
    assert!(env.store.all().is_empty());

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_exhausts_retries_via_header() {
    let mut env = TestEnvironment::new();
    let senders = env.registry();
    env.start_dispatcher(senders, BackoffMode::Inline);

    env.broker
        .enqueue(notify_shared::queue::QueueMessage::new(b"{not json".to_vec()));

    wait_for_acks(&env, 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let retries: Vec<Option<u32>> = env
        .republished()
        .iter()
        .map(|m| m.retries_header())
        .collect();
    assert_eq!(retries, vec![Some(1), Some(2), Some(3)]);
    assert!(env.republished().iter().all(|m| m.payload == b"{not json"));
    assert_eq!(env.broker.acked().len(), 4);

    env.shutdown().await.unwrap();
}
