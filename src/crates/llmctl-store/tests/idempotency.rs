//! Double-submit protection for dispatch keys (spec §7): claiming the same
//! `(execution_id, dispatch_id)` pair twice must not silently succeed
//! twice — the second caller has to find out a `NodeRun` already exists.
//!
//! Dispatch keys are ordinary `kinds::DISPATCH_KEY` rows in the generic
//! entities table (see `noderun::NodeDispatcher::persist`), so the
//! idempotency guarantee is just the store's `(kind, id)` uniqueness
//! constraint applied to a `"{run_id}:{dispatch_id}"` row id.

use llmctl_store::sqlite::{DatabaseConnection, SqliteStore};
use llmctl_store::store::{Query, StoreExt};
use llmctl_store::{InMemoryStore, Store, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DISPATCH_KEY: &str = "dispatch_key";
const NODE_RUN: &str = "node_run";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DispatchKeyRecord {
    run_id: Uuid,
    dispatch_id: String,
    node_run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NodeRunStub {
    id: Uuid,
    run_id: Uuid,
    node_id: Uuid,
}

fn dispatch_record_id(run_id: Uuid, dispatch_id: &str) -> String {
    format!("{run_id}:{dispatch_id}")
}

async fn sqlite_store() -> SqliteStore {
    let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
    conn.run_migrations().await.unwrap();
    SqliteStore::new(conn.pool().clone())
}

#[tokio::test]
async fn repeated_dispatch_with_same_key_does_not_create_a_second_node_run() {
    let store = sqlite_store().await;

    let run_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();
    let dispatch_id = format!("{node_id}:1");
    let record_id = dispatch_record_id(run_id, &dispatch_id);

    let first_attempt = NodeRunStub { id: Uuid::new_v4(), run_id, node_id };
    store
        .insert(
            DISPATCH_KEY,
            &record_id,
            &DispatchKeyRecord { run_id, dispatch_id: dispatch_id.clone(), node_run_id: first_attempt.id },
        )
        .await
        .unwrap();
    store.insert(NODE_RUN, &first_attempt.id.to_string(), &first_attempt).await.unwrap();

    // A retried dispatch (same run_id + dispatch_id) must see the existing
    // claim and refuse to register a second NodeRun under it.
    let existing: DispatchKeyRecord = store.get(DISPATCH_KEY, &record_id).await.unwrap().unwrap();
    assert_eq!(existing.node_run_id, first_attempt.id);

    let err = store
        .insert(
            DISPATCH_KEY,
            &record_id,
            &DispatchKeyRecord { run_id, dispatch_id, node_run_id: Uuid::new_v4() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));

    let node_runs: Vec<NodeRunStub> = store.find(NODE_RUN, &Query::new().eq("run_id", run_id)).await.unwrap();
    assert_eq!(node_runs.len(), 1);
    assert_eq!(node_runs[0].id, first_attempt.id);
}

#[tokio::test]
async fn distinct_dispatch_ids_claim_independently() {
    let store = sqlite_store().await;
    let run_id = Uuid::new_v4();

    let a_id = dispatch_record_id(run_id, "node-a:1");
    let b_id = dispatch_record_id(run_id, "node-b:1");
    let node_run_a = Uuid::new_v4();
    let node_run_b = Uuid::new_v4();

    store
        .insert(DISPATCH_KEY, &a_id, &DispatchKeyRecord { run_id, dispatch_id: "node-a:1".to_string(), node_run_id: node_run_a })
        .await
        .unwrap();
    store
        .insert(DISPATCH_KEY, &b_id, &DispatchKeyRecord { run_id, dispatch_id: "node-b:1".to_string(), node_run_id: node_run_b })
        .await
        .unwrap();

    let got_a: DispatchKeyRecord = store.get(DISPATCH_KEY, &a_id).await.unwrap().unwrap();
    let got_b: DispatchKeyRecord = store.get(DISPATCH_KEY, &b_id).await.unwrap().unwrap();
    assert_eq!(got_a.node_run_id, node_run_a);
    assert_eq!(got_b.node_run_id, node_run_b);
}

#[tokio::test]
async fn in_memory_store_enforces_the_same_insert_once_contract() {
    let store = InMemoryStore::new();
    let node_run = NodeRunStub { id: Uuid::new_v4(), run_id: Uuid::new_v4(), node_id: Uuid::new_v4() };
    store.insert(NODE_RUN, &node_run.id.to_string(), &node_run).await.unwrap();

    let err = store.insert(NODE_RUN, &node_run.id.to_string(), &node_run).await.unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));
}
