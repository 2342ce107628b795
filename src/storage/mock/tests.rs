use super::*;
use crate::audit::EntityType;

fn make_record(id: &str, actor: &str) -> AuditLog {
    AuditLog {
        id: id.to_string(),
        event_type: "EmployeeCreated".to_string(),
        entity_type: EntityType::Employee,
        entity_id: "1".to_string(),
        timestamp: chrono::Utc::now(),
        actor: actor.to_string(),
        before: None,
        after: Some(serde_json::json!({ "EmployeeId": 1 })),
    }
}

#[tokio::test]
async fn test_upsert_inserts_when_absent() {
    let store = MockAuditStore::new();

    store.upsert(&make_record("a", "alice")).await.unwrap();

    assert_eq!(store.record_count().await, 1);
    assert_eq!(store.get("a").await.unwrap().actor, "alice");
}

#[tokio::test]
async fn test_upsert_replaces_in_place() {
    let store = MockAuditStore::new();

    store.upsert(&make_record("a", "alice")).await.unwrap();
    store.upsert(&make_record("a", "bob")).await.unwrap();

    assert_eq!(store.record_count().await, 1);
    assert_eq!(store.write_count(), 2);
    assert_eq!(store.get("a").await.unwrap().actor, "bob");
}

#[tokio::test]
async fn test_fail_on_upsert() {
    let store = MockAuditStore::new();
    store.set_fail_on_upsert(true).await;

    let result = store.upsert(&make_record("a", "alice")).await;

    assert!(matches!(result, Err(StorageError::Unavailable(_))));
    assert_eq!(store.record_count().await, 0);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_upsert_delay() {
    let store = MockAuditStore::new();
    store
        .set_upsert_delay(Some(Duration::from_secs(5)))
        .await;

    let started = tokio::time::Instant::now();
    store.upsert(&make_record("a", "alice")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
}
