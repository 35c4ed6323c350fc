//! End-to-end behaviour of the control-plane through its public entry points

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use certmcp::config::{resolve, SettingsLayer};
use certmcp::store::{MemoryStore, SCHEMA};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Executor;
use std::sync::Arc;
use tooling::runtime::{Arguments, FailureKind, PolicySnapshot};

fn args(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[tokio::test]
async fn test_read_only_session() {
    // Empty database first
    let empty = common::registry(Arc::new(MemoryStore::new()), PolicySnapshot::default());
    let result = empty.invoke("list_records", &Map::new()).await;
    let payload = result.payload().unwrap();
    assert_eq!(payload["count"], 0);
    assert_eq!(payload["items"], json!([]));

    let store = common::populated_store();
    let registry = common::registry(store.clone(), PolicySnapshot::default());

    // Identity numbers come back masked
    let result = registry.invoke("get_member", &args(json!({ "member_id": 10 }))).await;
    let member = result.payload().unwrap();
    assert_eq!(member["id_card"], "110101********0011");
    assert_eq!(member["phone"], "*******8000");
    assert_eq!(member["name"], "Alice");

    // A 2 MiB attachment is capped at 1 MiB
    let result = registry
        .invoke(
            "read_attachment",
            &args(json!({ "record_id": 1, "attachment_id": 100 })),
        )
        .await;
    let slice = result.payload().unwrap();
    let bytes = BASE64
        .decode(slice["content_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(bytes.len(), 1_048_576);
    assert_eq!(slice["length"], 1_048_576);
    assert_eq!(slice["truncated"], true);
    assert_eq!(slice["eof"], false);

    // Mutations are refused before the store is touched
    let before = store.mutation_calls();
    let result = registry.invoke("rebuild_search_index", &Map::new()).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::PolicyDenied));
    assert_eq!(store.mutation_calls(), before);
}

#[tokio::test]
async fn test_reading_the_tail_of_an_attachment() {
    let registry = common::registry(common::populated_store(), PolicySnapshot::default());

    let result = registry
        .invoke(
            "read_attachment",
            &args(json!({ "record_id": 1, "attachment_id": 100, "offset": 1_572_864 })),
        )
        .await;
    let slice = result.payload().unwrap();
    assert_eq!(slice["length"], 524_288);
    assert_eq!(slice["truncated"], false);
    assert_eq!(slice["eof"], true);

    let result = registry
        .invoke(
            "read_attachment",
            &args(json!({ "record_id": 1, "attachment_id": 100, "offset": 2_097_152 })),
        )
        .await;
    let slice = result.payload().unwrap();
    assert_eq!(slice["length"], 0);
    assert_eq!(slice["eof"], true);
}

#[tokio::test]
async fn test_unlocked_session_redacts_nothing_and_mutates() {
    let store = common::populated_store();
    let policy = PolicySnapshot::default()
        .with_allow_write(true)
        .with_redact_pii(false);
    let registry = common::registry(store.clone(), policy);

    let result = registry.invoke("get_member", &args(json!({ "member_id": 11 }))).await;
    assert_eq!(result.payload().unwrap()["id_card"], common::ID_CARD);

    let result = registry.invoke("rebuild_search_index", &Map::new()).await;
    assert!(result.is_success());
    assert_eq!(store.mutation_calls(), 1);
    assert_eq!(store.index_counts().records, 2);
}

#[tokio::test]
async fn test_unknown_tool_and_bad_arguments() {
    let registry = common::registry(common::populated_store(), PolicySnapshot::default());

    let result = registry.invoke("drop_everything", &Map::new()).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::ValidationError));

    let result = registry
        .invoke("get_record", &args(json!({ "record_id": "one" })))
        .await;
    assert_eq!(result.failure_kind(), Some(FailureKind::ValidationError));

    let result = registry.invoke("get_record", &args(json!({ "record_id": 404 }))).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::NotFound));
}

#[tokio::test]
async fn test_open_registry_against_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let attachments = dir.path().join("attachments");
    std::fs::create_dir_all(attachments.join("1")).unwrap();
    std::fs::write(attachments.join("1/a.pdf"), b"%PDF-1.4 certificate").unwrap();

    let db_path = dir.path().join("certificates.db");
    {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        pool.execute(SCHEMA).await.unwrap();
        pool.execute(
            "INSERT INTO awards (id, competition_name, award_date, level, rank) VALUES
                 (1, 'Robotics Cup', '2024-05-01', 'national', 'first');
             INSERT INTO team_members (id, name, id_card) VALUES (10, 'Alice', '110101199001010011');
             INSERT INTO award_members (award_id, member_id) VALUES (1, 10);
             INSERT INTO attachments (id, award_id, stored_name, original_name, relative_path)
                 VALUES (5, 1, 'a.pdf', 'certificate.pdf', '1/a.pdf');",
        )
        .await
        .unwrap();
        pool.close().await;
    }

    let config = resolve(
        &SettingsLayer::default(),
        &SettingsLayer::default(),
        &SettingsLayer::defaults_in(dir.path()),
    )
    .unwrap();
    let registry = certmcp::open_registry(&config).await.unwrap();

    let result = registry.invoke("get_record", &args(json!({ "record_id": 1 }))).await;
    let record = result.payload().unwrap();
    assert_eq!(record["members"][0]["id_card"], "110101********0011");
    assert_eq!(record["attachments"][0]["id"], 5);

    let result = registry
        .invoke("read_attachment", &args(json!({ "record_id": 1, "attachment_id": 5 })))
        .await;
    let slice = result.payload().unwrap();
    assert_eq!(slice["mime_type"], "application/pdf");
    assert_eq!(
        BASE64.decode(slice["content_base64"].as_str().unwrap()).unwrap(),
        b"%PDF-1.4 certificate"
    );

    // Read-only: the mutation never reaches the database
    let result = registry.invoke("rebuild_search_index", &Map::new()).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::PolicyDenied));
}

#[tokio::test]
async fn test_missing_attachment_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = resolve(
        &SettingsLayer::default(),
        &SettingsLayer::default(),
        &SettingsLayer::defaults_in(dir.path()),
    )
    .unwrap();

    let err = certmcp::open_registry(&config).await.unwrap_err();
    assert_eq!(err.exit_code(), certmcp::ExitCode::StartupFailed);
}
