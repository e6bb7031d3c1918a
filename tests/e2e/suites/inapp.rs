//! 站内通知：提交后立即可查，调度器投递后再写一条

use std::time::Duration;

use notify_shared::config::BackoffMode;
use serde_json::json;

use crate::helpers::wait_until;
use crate::setup::TestEnvironment;

#[tokio::test]
async fn test_inapp_submission_is_queryable() {
    let mut env = TestEnvironment::new();

    let status = env
        .submit(&json!({"user_id": 7, "type": "inapp", "to": "u7", "message": "hi"}))
        .await
        .unwrap();
    assert!(status.is_success());

    // 提交端同步写入，调度器尚未启动也能查到
    let records = env.query(7).await.unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["message"], "hi");
    assert_eq!(records[0]["type"], "inapp");
    assert_eq!(records[0]["user_id"], 7);

    let senders = env.registry();
    env.start_dispatcher(senders, BackoffMode::Inline);

    let broker = env.broker.clone();
    wait_until(Duration::from_secs(5), || {
        let broker = broker.clone();
        async move { broker.acked().len() == 1 }
    })
    .await
    .unwrap();

    // 两条写入路径都生效
    let records = env.query(7).await.unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["message"] == "hi" && r["type"] == "inapp"));
    assert!(env.republished().is_empty());

    assert!(env.query(8).await.unwrap().as_array().unwrap().is_empty());

    env.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_inapp_store_outage_retries_until_success() {
    let mut env = TestEnvironment::new();
    env.broker
        .enqueue_json(&json!({"user_id": 9, "type": "inapp", "to": "u9", "message": "later"}));
    env.store.fail_next_inserts(2);

    let senders = env.registry();
    env.start_dispatcher(senders, BackoffMode::Inline);

    let store = env.store.clone();
    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { !store.all().is_empty() }
    })
    .await
    .unwrap();

    // 失败的两次尝试不留记录，成功的那次恰好写入一条
    let records = env.query(9).await.unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(env.republished().len(), 2);

    let broker = env.broker.clone();
    wait_until(Duration::from_secs(5), || {
        let broker = broker.clone();
        async move { broker.acked().len() == 3 }
    })
    .await
    .unwrap();

    env.shutdown().await.unwrap();
}
