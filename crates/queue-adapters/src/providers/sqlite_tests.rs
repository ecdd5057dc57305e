//! Tests for the SQLite provider.

use super::*;
use std::collections::HashSet;
use tempfile::TempDir;

fn name(value: &str) -> QueueName {
    QueueName::new(value.to_string()).unwrap()
}

fn provider_in(dir: &TempDir) -> SqliteProvider {
    SqliteProvider::new(SqliteConfig::new(dir.path().join("queues.db")))
}

fn new_record(body: &'static str, message_type: &str) -> NewRecord {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), serde_json::json!({"system": "billing"}));
    NewRecord {
        content: Bytes::from_static(body.as_bytes()),
        metadata,
        message_type: message_type.to_string(),
        created_at: Timestamp::from_secs(100),
        schedule_at: None,
        repeating_interval: None,
    }
}

fn filter_at(now: i64) -> ScanFilter {
    ScanFilter {
        now: Timestamp::from_secs(now),
        message_type: None,
    }
}

fn unclaimed_at(now: i64) -> RecordMatch {
    RecordMatch::Unclaimed(Timestamp::from_secs(now))
}

fn claim_until(expires_at: Option<i64>) -> Claim {
    Claim {
        handle: Handle::generate(),
        expires_at: expires_at.map(Timestamp::from_secs),
    }
}

async fn queue_in(provider: &SqliteProvider, queue: &str) -> QueueId {
    provider.create_queue(&name(queue)).await.unwrap();
    provider.get_queue_id(&name(queue)).await.unwrap()
}

#[tokio::test]
async fn test_connect_creates_schema() {
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);

    provider.connect().await.unwrap();

    assert!(dir.path().join("queues.db").exists());
    assert!(provider.list_queues().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let provider = SqliteProvider::new(SqliteConfig::new(
        dir.path().join("missing").join("queues.db"),
    ));

    let result = provider.connect().await;

    assert!(matches!(
        result,
        Err(QueueError::ConnectionFailed {
            provider: ProviderType::Sqlite,
            ..
        })
    ));
}

#[tokio::test]
async fn test_queue_lifecycle() {
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);

    assert!(provider.create_queue(&name("beta")).await.unwrap());
    assert!(provider.create_queue(&name("alpha")).await.unwrap());
    assert!(!provider.create_queue(&name("alpha")).await.unwrap());
    assert!(provider.queue_exists(&name("alpha")).await.unwrap());
    assert_eq!(
        provider.list_queues().await.unwrap(),
        vec![name("alpha"), name("beta")]
    );

    let queue_id = provider.get_queue_id(&name("alpha")).await.unwrap();
    provider
        .insert_record(&queue_id, new_record("job", "order"))
        .await
        .unwrap();

    assert!(provider.delete_queue(&name("alpha")).await.unwrap());
    assert!(!provider.delete_queue(&name("alpha")).await.unwrap());
    assert!(matches!(
        provider.get_queue_id(&name("alpha")).await,
        Err(QueueError::QueueNotFound { .. })
    ));
}

#[tokio::test]
async fn test_record_round_trips_through_storage() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    let queue_id = queue_in(&provider, "orders").await;
    let mut record = new_record("payload", "order");
    record.repeating_interval = Some(90);

    // Act
    let id = provider.insert_record(&queue_id, record).await.unwrap();
    let peeked = provider
        .peek_visible(&queue_id, &filter_at(100), 10)
        .await
        .unwrap();

    // Assert
    assert_eq!(peeked.len(), 1);
    let stored = &peeked[0];
    assert_eq!(stored.id, id);
    assert_eq!(stored.queue_id, queue_id);
    assert_eq!(stored.content, Bytes::from_static(b"payload"));
    assert_eq!(stored.metadata["source"]["system"], "billing");
    assert_eq!(stored.message_type, "order");
    assert_eq!(stored.created_at, Timestamp::from_secs(100));
    assert_eq!(stored.repeating_interval, Some(90));
    assert!(stored.handle.is_none());
}

#[tokio::test]
async fn test_claim_visibility_rules() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    let queue_id = queue_in(&provider, "orders").await;
    let mut scheduled = new_record("later", "order");
    scheduled.schedule_at = Some(Timestamp::from_secs(500));
    provider.insert_record(&queue_id, scheduled).await.unwrap();
    provider
        .insert_record(&queue_id, new_record("refund", "refund"))
        .await
        .unwrap();
    provider
        .insert_record(&queue_id, new_record("now", "order"))
        .await
        .unwrap();
    let orders = ScanFilter {
        now: Timestamp::from_secs(100),
        message_type: Some("order".to_string()),
    };

    // Act
    let claimed = provider
        .claim_visible(&queue_id, &orders, &claim_until(Some(130)))
        .await
        .unwrap()
        .unwrap();
    let while_hidden = provider
        .claim_visible(&queue_id, &orders, &claim_until(None))
        .await
        .unwrap();
    let expired = provider
        .claim_visible(
            &queue_id,
            &ScanFilter {
                now: Timestamp::from_secs(131),
                ..orders.clone()
            },
            &claim_until(None),
        )
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(claimed.content, Bytes::from_static(b"now"));
    assert_eq!(claimed.handle_expires_at, Some(Timestamp::from_secs(130)));
    assert!(while_hidden.is_none());
    assert_eq!(expired.id, claimed.id);
    assert_ne!(expired.handle, claimed.handle);
}

#[tokio::test]
async fn test_conditional_update_and_delete() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    let queue_id = queue_in(&provider, "orders").await;
    let id = provider
        .insert_record(&queue_id, new_record("job", "order"))
        .await
        .unwrap();
    let claim = claim_until(None);
    provider
        .claim_visible(&queue_id, &filter_at(100), &claim)
        .await
        .unwrap();
    let stranger = RecordMatch::Handle(Handle::generate());
    let owner = RecordMatch::Handle(claim.handle.clone());

    // Act
    let foreign_update = provider
        .update_visibility(
            &queue_id,
            &id,
            &stranger,
            VisibilityUpdate::reschedule(Timestamp::from_secs(200)),
        )
        .await
        .unwrap();
    let rescheduled = provider
        .update_visibility(
            &queue_id,
            &id,
            &owner,
            VisibilityUpdate::reschedule(Timestamp::from_secs(200)),
        )
        .await
        .unwrap();

    // Assert
    assert!(!foreign_update);
    assert!(rescheduled);
    assert_eq!(provider.count_visible(&queue_id).await.unwrap(), 1);
    assert!(provider
        .claim_visible(&queue_id, &filter_at(199), &claim_until(None))
        .await
        .unwrap()
        .is_none());
    assert!(provider
        .delete_record(&queue_id, &id, &unclaimed_at(100))
        .await
        .unwrap());
    assert!(!provider
        .delete_record(&queue_id, &id, &unclaimed_at(100))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_handleless_guard_waits_for_claim_to_expire() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    let queue_id = queue_in(&provider, "orders").await;
    let id = provider
        .insert_record(&queue_id, new_record("job", "order"))
        .await
        .unwrap();
    provider
        .claim_visible(&queue_id, &filter_at(100), &claim_until(Some(130)))
        .await
        .unwrap();

    // Act
    let rescheduled_while_claimed = provider
        .update_visibility(
            &queue_id,
            &id,
            &unclaimed_at(120),
            VisibilityUpdate::reschedule(Timestamp::from_secs(500)),
        )
        .await
        .unwrap();
    let deleted_at_expiry = provider
        .delete_record(&queue_id, &id, &unclaimed_at(130))
        .await
        .unwrap();
    let deleted_after_expiry = provider
        .delete_record(&queue_id, &id, &unclaimed_at(131))
        .await
        .unwrap();

    // Assert
    assert!(!rescheduled_while_claimed);
    assert!(!deleted_at_expiry);
    assert!(deleted_after_expiry);
}

#[tokio::test]
async fn test_records_are_scoped_to_their_queue() {
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    let orders = queue_in(&provider, "orders").await;
    let refunds = queue_in(&provider, "refunds").await;
    let id = provider
        .insert_record(&orders, new_record("job", "order"))
        .await
        .unwrap();

    assert!(provider
        .claim_visible(&refunds, &filter_at(100), &claim_until(None))
        .await
        .unwrap()
        .is_none());
    assert!(!provider
        .delete_record(&refunds, &id, &unclaimed_at(100))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_state_is_shared_through_the_file() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let producer = provider_in(&dir);
    let consumer = provider_in(&dir);
    let queue_id = queue_in(&producer, "orders").await;

    // Act
    producer
        .insert_record(&queue_id, new_record("job", "order"))
        .await
        .unwrap();
    let claimed = consumer
        .claim_visible(&queue_id, &filter_at(100), &claim_until(None))
        .await
        .unwrap();

    // Assert
    assert!(claimed.is_some());
    assert_eq!(producer.count_visible(&queue_id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_across_connections_are_exclusive() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let setup = provider_in(&dir);
    let queue_id = queue_in(&setup, "orders").await;
    for _ in 0..40 {
        setup
            .insert_record(&queue_id, new_record("job", "order"))
            .await
            .unwrap();
    }

    // Act - each consumer has its own connection to the file
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let consumer = provider_in(&dir);
        let queue_id = queue_id.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(record) = consumer
                .claim_visible(&queue_id, &filter_at(100), &claim_until(None))
                .await
                .unwrap()
            {
                ids.push(record.id);
            }
            ids
        }));
    }
    let mut claimed = Vec::new();
    for task in tasks {
        claimed.extend(task.await.unwrap());
    }

    // Assert
    let unique: HashSet<_> = claimed.iter().cloned().collect();
    assert_eq!(claimed.len(), 40);
    assert_eq!(unique.len(), 40);
}

#[tokio::test]
async fn test_foreign_ids_do_not_match() {
    let dir = TempDir::new().unwrap();
    let provider = provider_in(&dir);
    queue_in(&provider, "orders").await;

    assert!(matches!(
        provider
            .count_visible(&QueueId::new("orders"))
            .await,
        Err(QueueError::QueueNotFound { .. })
    ));
    let queue_id = provider.get_queue_id(&name("orders")).await.unwrap();
    assert!(!provider
        .delete_record(&queue_id, &MessageId::new("01HXYZ"), &unclaimed_at(100))
        .await
        .unwrap());
}
