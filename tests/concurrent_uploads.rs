//! Concurrent writers against a file-backed database.
//!
//! Many uploads commit at once across several storages; every one must
//! land and every storage's usage must match its live files.

mod common;

use std::sync::Arc;

use common::{payload, TestEngine};
use cumulus::ROOT_FOLDER_ID;
use tokio::task::JoinSet;

const STORAGES: i64 = 8;
const UPLOADS_PER_STORAGE: usize = 5;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uploads_across_storages() {
    let t = Arc::new(TestEngine::on_file().await);

    let mut storage_ids = Vec::new();
    for user_id in 1..=STORAGES {
        storage_ids.push(t.storage(user_id, 1_000_000).await);
    }

    let mut uploads = JoinSet::new();
    for (s, &storage_id) in storage_ids.iter().enumerate() {
        for i in 0..UPLOADS_PER_STORAGE {
            let t = Arc::clone(&t);
            let data = payload((s * UPLOADS_PER_STORAGE + i) as u8, 40 + i);
            uploads.spawn(async move {
                t.upload(storage_id, ROOT_FOLDER_ID, &format!("f{i}.bin"), &data)
                    .await
            });
        }
    }

    let mut failures = Vec::new();
    while let Some(joined) = uploads.join_next().await {
        if let Err(e) = joined.unwrap() {
            failures.push(e.to_string());
        }
    }
    assert!(failures.is_empty(), "uploads failed: {failures:?}");

    let expected: i64 = (0..UPLOADS_PER_STORAGE).map(|i| 40 + i as i64).sum();
    for &storage_id in &storage_ids {
        assert_eq!(t.used(storage_id).await, expected);
        assert_eq!(t.live_bytes(storage_id).await, expected);
        assert_eq!(t.child_names(storage_id, ROOT_FOLDER_ID).await.len(), UPLOADS_PER_STORAGE);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_uploads_of_shared_content() {
    let t = Arc::new(TestEngine::on_file().await);
    let storage_id = t.storage(1, 1_000_000).await;
    let data = payload(9, 64);

    let mut uploads = JoinSet::new();
    for i in 0..6 {
        let t = Arc::clone(&t);
        let data = data.clone();
        uploads.spawn(async move {
            t.upload(storage_id, ROOT_FOLDER_ID, &format!("copy{i}.bin"), &data)
                .await
        });
    }

    let mut nodes = Vec::new();
    while let Some(joined) = uploads.join_next().await {
        nodes.push(joined.unwrap().unwrap());
    }

    assert_eq!(t.used(storage_id).await, 6 * 64);
    assert_eq!(t.ref_count(&nodes[0]).await, Some(6));
    assert!(nodes.iter().all(|n| n.blob_id == nodes[0].blob_id));
}
