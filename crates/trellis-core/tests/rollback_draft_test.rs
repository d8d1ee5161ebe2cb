//! A committed multi-node write fails downstream; rollback restores the
//! pre-scope values and preserves the work as a recoverable draft.

use std::sync::Arc;

use serde_json::Value;
use trellis_core::{
    snapshot_row, ChangeOp, GraphStore, Node, RollbackManager, StoreError, TrackedTransaction,
};

async fn store_with_nodes() -> Arc<GraphStore> {
    let store = Arc::new(GraphStore::open_in_memory().unwrap());
    let mut a = Node::with_id("a", "Alpha");
    a.status = Some("todo".into());
    store.create_node(a).await.unwrap();
    let mut b = Node::with_id("b", "Beta");
    b.status = Some("todo".into());
    store.create_node(b).await.unwrap();
    store
}

/// Rename both nodes in one committed scope, journaling row images.
async fn journaled_batch_rename(
    store: &Arc<GraphStore>,
    tx: &mut TrackedTransaction,
) -> trellis_core::Result<()> {
    let correlation_id = tx.correlation_id.clone();
    store
        .coordinator()
        .execute_in_transaction(&correlation_id, |scope| {
            for (id, name) in [("a", "Alpha (edited)"), ("b", "Beta (edited)")] {
                let before = snapshot_row(scope.conn(), "nodes", id)?.expect("row exists");
                scope.conn().execute(
                    "UPDATE nodes SET name = ?2, status = 'doing' WHERE id = ?1",
                    rusqlite::params![id, name],
                )?;
                let after = snapshot_row(scope.conn(), "nodes", id)?.expect("row exists");
                tx.record_update("nodes", id, before, after);
                scope.record("nodes", ChangeOp::Update, Some(id.to_string()));
            }
            Ok(())
        })
        .await
}

/// The remote step that would normally follow the local commit.
fn failing_remote_step() -> trellis_core::Result<()> {
    Err(StoreError::SyncTransport("record store unavailable".into()))
}

#[tokio::test]
async fn failed_batch_rolls_back_and_drafts_both_updates() {
    let store = store_with_nodes().await;
    let manager = RollbackManager::new(store.clone());

    let mut tx = TrackedTransaction::new("import.batch/42");
    journaled_batch_rename(&store, &mut tx).await.unwrap();
    let tx_id = tx.tx_id.clone();
    manager.track(tx);

    // The scope committed.
    assert_eq!(
        store.get_node("a").await.unwrap().unwrap().name,
        "Alpha (edited)"
    );

    // Downstream failure triggers the logical rollback.
    assert!(failing_remote_step().is_err());
    let result = manager.rollback(&tx_id, true).await.unwrap();

    assert!(result.success);
    assert_eq!(result.operations_rolled_back, 2);

    let a = store.get_node("a").await.unwrap().unwrap();
    let b = store.get_node("b").await.unwrap().unwrap();
    assert_eq!(a.name, "Alpha");
    assert_eq!(b.name, "Beta");
    assert_eq!(a.status.as_deref(), Some("todo"));
    assert_eq!(b.status.as_deref(), Some("todo"));

    // The draft holds exactly the two updates, with both images populated.
    let draft_id = result.preserved_draft_id.expect("draft preserved");
    let draft = manager.get_draft(&draft_id).unwrap();
    assert_eq!(draft.original_tx_id, tx_id);
    assert_eq!(draft.preserved_operations.len(), 2);
    for op in &draft.preserved_operations {
        let before = op.before.as_ref().expect("before image");
        let after = op.after.as_ref().expect("after image");
        assert_eq!(before.get("status"), Some(&Value::String("todo".into())));
        assert_eq!(after.get("status"), Some(&Value::String("doing".into())));
    }

    // And the draft outlives this manager instance.
    let fresh = RollbackManager::new(store.clone());
    fresh.load_persisted_drafts().await.unwrap();
    assert!(fresh.get_draft(&draft_id).is_some());
}

#[tokio::test]
async fn successful_batch_completes_without_drafting() {
    let store = store_with_nodes().await;
    let manager = RollbackManager::new(store.clone());

    let mut tx = TrackedTransaction::new("import.batch/43");
    journaled_batch_rename(&store, &mut tx).await.unwrap();
    let tx_id = tx.tx_id.clone();
    manager.track(tx);

    // The remote step succeeds this time: tracking just ends.
    manager.complete(&tx_id);
    assert_eq!(manager.active_count(), 0);
    assert_eq!(
        store.get_node("a").await.unwrap().unwrap().name,
        "Alpha (edited)"
    );
    assert!(manager.list_drafts().is_empty());
}
