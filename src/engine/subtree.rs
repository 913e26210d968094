//! Recursive copy and delete over an explicit worklist.
//!
//! Both walks run on the caller's transaction and fetch children in pages
//! ordered by id, so memory stays bounded by the page size times the depth.

use std::collections::VecDeque;

use sqlx::SqliteConnection;

use crate::blob::BlobRepository;
use crate::quota::QuotaLedger;
use crate::tree::{FileNode, NewFileNode, TreeRepository};
use crate::{CumulusError, Result};

/// Physical object to remove once the transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleasedObject {
    pub bucket: String,
    pub key: String,
}

/// Totals gathered while deleting.
#[derive(Debug, Default)]
pub(crate) struct DeleteTally {
    pub nodes: usize,
    pub bytes: i64,
    pub released: Vec<ReleasedObject>,
    /// Child pages fetched.
    pub pages: usize,
}

/// Node count and referenced bytes of a subtree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SubtreeSize {
    pub nodes: usize,
    pub bytes: i64,
    /// Child pages fetched.
    pub pages: usize,
}

impl SubtreeSize {
    fn add(&mut self, node: &FileNode, root: &FileNode, max_nodes: usize) -> Result<()> {
        self.nodes += 1;
        self.bytes += node.size;
        if self.nodes > max_nodes {
            return Err(CumulusError::Validation(format!(
                "subtree of {} exceeds {max_nodes} nodes",
                root.name
            )));
        }
        Ok(())
    }
}

/// Live children of `folder` with `id > cursor`, at most `page_size`.
async fn child_page(
    conn: &mut SqliteConnection,
    folder: &FileNode,
    cursor: i64,
    page_size: i64,
) -> Result<Vec<FileNode>> {
    TreeRepository::list_children(conn, folder.storage_id, folder.id, cursor, page_size).await
}

/// Measure a subtree, failing once it grows past `max_nodes`.
pub(crate) async fn measure(
    conn: &mut SqliteConnection,
    root: &FileNode,
    page_size: i64,
    max_nodes: usize,
) -> Result<SubtreeSize> {
    let mut size = SubtreeSize::default();
    size.add(root, root, max_nodes)?;

    // Folders whose children are still to be counted
    let mut pending = VecDeque::new();
    if root.is_folder() {
        pending.push_back(root.clone());
    }

    while let Some(folder) = pending.pop_front() {
        let mut cursor = 0;
        loop {
            let page = child_page(conn, &folder, cursor, page_size).await?;
            size.pages += 1;
            let full = page.len() as i64 >= page_size;
            for child in page {
                cursor = child.id;
                size.add(&child, root, max_nodes)?;
                if child.is_folder() {
                    pending.push_back(child);
                }
            }
            if !full {
                break;
            }
        }
    }
    Ok(size)
}

/// Insert a copy of `source` under `father_id` and charge it.
async fn insert_copy(
    conn: &mut SqliteConnection,
    source: &FileNode,
    father_id: i64,
    name: String,
) -> Result<FileNode> {
    let copy = TreeRepository::create(
        conn,
        &NewFileNode {
            storage_id: source.storage_id,
            father_id,
            name,
            file_type: source.file_type,
            blob_id: source.blob_id,
        },
    )
    .await?;

    if let Some(blob_id) = source.blob_id {
        BlobRepository::adjust_ref_count(conn, blob_id, 1).await?;
        QuotaLedger::increase_used(conn, source.storage_id, source.size).await?;
    }
    Ok(copy)
}

/// Copy `source` and everything below it under `father_id`.
///
/// The top-level copy takes the first free name; descendants keep theirs.
/// Each page of children is copied before the next is fetched. Returns the
/// new top-level node.
pub(crate) async fn copy(
    conn: &mut SqliteConnection,
    source: &FileNode,
    father_id: i64,
    page_size: i64,
) -> Result<FileNode> {
    let name =
        TreeRepository::unique_name(conn, source.storage_id, father_id, &source.name).await?;
    let top = insert_copy(conn, source, father_id, name).await?;

    // (source folder, its copy)
    let mut pending = VecDeque::new();
    if source.is_folder() {
        pending.push_back((source.clone(), top.id));
    }

    while let Some((folder, copy_id)) = pending.pop_front() {
        let mut cursor = 0;
        loop {
            let page = child_page(conn, &folder, cursor, page_size).await?;
            let full = page.len() as i64 >= page_size;
            for child in page {
                cursor = child.id;
                let copied = insert_copy(conn, &child, copy_id, child.name.clone()).await?;
                if child.is_folder() {
                    pending.push_back((child, copied.id));
                }
            }
            if !full {
                break;
            }
        }
    }
    Ok(top)
}

/// Soft-delete one node and release what it held.
async fn remove_node(
    conn: &mut SqliteConnection,
    node: &FileNode,
    tally: &mut DeleteTally,
) -> Result<()> {
    if !TreeRepository::soft_delete(conn, node.id).await? {
        return Ok(());
    }
    tally.nodes += 1;

    let Some(blob_id) = node.blob_id else {
        return Ok(());
    };
    let blob = BlobRepository::get_by_id(conn, blob_id).await?.ok_or_else(|| {
        CumulusError::Database(format!(
            "file {} references missing blob {blob_id}",
            node.id
        ))
    })?;

    tally.bytes += QuotaLedger::decrease_used(conn, node.storage_id, blob.size).await?;

    if BlobRepository::adjust_ref_count(conn, blob_id, -1).await? == 0 {
        BlobRepository::delete(conn, blob_id).await?;
        tally.released.push(ReleasedObject {
            bucket: blob.bucket,
            key: blob.object_key,
        });
    }
    Ok(())
}

/// Delete `root` and its descendants, children before parents.
///
/// The folder on top of the stack is re-read from its first live child
/// after every page: files in the page are removed at once and subfolders
/// are stacked, so a folder is removed once a read comes back empty. The
/// stack holds at most one page per level.
pub(crate) async fn delete(
    conn: &mut SqliteConnection,
    root: &FileNode,
    page_size: i64,
    tally: &mut DeleteTally,
) -> Result<()> {
    let mut stack = vec![root.clone()];

    while let Some(top) = stack.last().cloned() {
        if !top.is_folder() {
            stack.pop();
            remove_node(conn, &top, tally).await?;
            continue;
        }

        let page = child_page(conn, &top, 0, page_size).await?;
        tally.pages += 1;
        if page.is_empty() {
            stack.pop();
            remove_node(conn, &top, tally).await?;
            continue;
        }
        for child in page {
            if child.is_folder() {
                stack.push(child);
            } else {
                remove_node(conn, &child, tally).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::NewBlob;
    use crate::quota::{NewStorage, QuotaLedger};
    use crate::tree::ROOT_FOLDER_ID;
    use crate::Database;

    struct Fixture {
        db: Database,
        storage_id: i64,
        blob_id: i64,
    }

    async fn setup() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let (storage_id, blob_id) = {
            let mut conn = db.acquire().await.unwrap();
            let storage = QuotaLedger::create(&mut conn, &NewStorage::new(1, "bucket", 10_000))
                .await
                .unwrap();
            let blob = BlobRepository::create(&mut conn, &NewBlob::new("h", "f", "bucket", "k", 10))
                .await
                .unwrap();
            (storage.id, blob.id)
        };
        Fixture {
            db,
            storage_id,
            blob_id,
        }
    }

    async fn add_file(conn: &mut SqliteConnection, fx: &Fixture, father: i64, name: &str) -> FileNode {
        let node = TreeRepository::create(conn, &NewFileNode::file(fx.storage_id, father, name, fx.blob_id))
            .await
            .unwrap();
        BlobRepository::adjust_ref_count(conn, fx.blob_id, 1).await.unwrap();
        QuotaLedger::increase_used(conn, fx.storage_id, 10).await.unwrap();
        node
    }

    async fn add_folder(conn: &mut SqliteConnection, fx: &Fixture, father: i64, name: &str) -> FileNode {
        TreeRepository::create(conn, &NewFileNode::folder(fx.storage_id, father, name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_measure_pages_through_children() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let root = add_folder(&mut conn, &fx, ROOT_FOLDER_ID, "root").await;
        for i in 0..7 {
            add_file(&mut conn, &fx, root.id, &format!("f{i}")).await;
        }
        let sub = add_folder(&mut conn, &fx, root.id, "sub").await;
        add_file(&mut conn, &fx, sub.id, "g").await;

        let size = measure(&mut conn, &root, 3, 100).await.unwrap();
        assert_eq!(size.nodes, 10);
        assert_eq!(size.bytes, 80);
        // root: 8 children in pages of 3, 3, 2; sub: 1 child
        assert_eq!(size.pages, 4);

        let result = measure(&mut conn, &root, 3, 5).await;
        assert!(matches!(result, Err(CumulusError::Validation(_))));
    }

    #[tokio::test]
    async fn test_copy_into_same_parent_gets_suffix() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let root = add_folder(&mut conn, &fx, ROOT_FOLDER_ID, "docs").await;
        add_file(&mut conn, &fx, root.id, "a.txt").await;

        let copied = copy(&mut conn, &root, ROOT_FOLDER_ID, 2).await.unwrap();
        assert_eq!(copied.name, "docs(1)");

        let children = TreeRepository::list_children(&mut conn, fx.storage_id, copied.id, 0, 10)
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "a.txt");

        let blob = BlobRepository::get_by_id(&mut conn, fx.blob_id).await.unwrap().unwrap();
        assert_eq!(blob.ref_count, 2);
    }

    #[tokio::test]
    async fn test_delete_post_order_releases_blob() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let root = add_folder(&mut conn, &fx, ROOT_FOLDER_ID, "root").await;
        let sub = add_folder(&mut conn, &fx, root.id, "sub").await;
        add_file(&mut conn, &fx, root.id, "a").await;
        add_file(&mut conn, &fx, sub.id, "b").await;

        let mut tally = DeleteTally::default();
        delete(&mut conn, &root, 1, &mut tally).await.unwrap();

        assert_eq!(tally.nodes, 4);
        assert_eq!(tally.bytes, 20);
        assert_eq!(
            tally.released,
            vec![ReleasedObject {
                bucket: "bucket".to_string(),
                key: "k".to_string()
            }]
        );
        assert!(BlobRepository::get_by_id(&mut conn, fx.blob_id).await.unwrap().is_none());

        let storage = QuotaLedger::get_by_id(&mut conn, fx.storage_id).await.unwrap().unwrap();
        assert_eq!(storage.current_size, 0);
    }

    #[tokio::test]
    async fn test_delete_handles_one_page_at_a_time() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let root = add_folder(&mut conn, &fx, ROOT_FOLDER_ID, "root").await;
        for i in 0..3 {
            add_file(&mut conn, &fx, root.id, &format!("f{i}")).await;
        }

        let mut tally = DeleteTally::default();
        delete(&mut conn, &root, 2, &mut tally).await.unwrap();

        // [f0, f1] removed before [f2] is read, then an empty read
        assert_eq!(tally.pages, 3);
        assert_eq!(tally.nodes, 4);
        assert_eq!(tally.bytes, 30);
    }

    #[tokio::test]
    async fn test_copy_pages_through_wide_folder() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let root = add_folder(&mut conn, &fx, ROOT_FOLDER_ID, "wide").await;
        for i in 0..5 {
            let sub = add_folder(&mut conn, &fx, root.id, &format!("d{i}")).await;
            add_file(&mut conn, &fx, sub.id, "x").await;
        }

        let copied = copy(&mut conn, &root, ROOT_FOLDER_ID, 2).await.unwrap();
        let size = measure(&mut conn, &copied, 2, 100).await.unwrap();
        assert_eq!(size.nodes, 11);
        assert_eq!(size.bytes, 50);

        let blob = BlobRepository::get_by_id(&mut conn, fx.blob_id).await.unwrap().unwrap();
        assert_eq!(blob.ref_count, 10);
    }

    #[tokio::test]
    async fn test_delete_releases_only_recorded_usage() {
        let fx = setup().await;
        let mut conn = fx.db.acquire().await.unwrap();

        let file = add_file(&mut conn, &fx, ROOT_FOLDER_ID, "a").await;
        QuotaLedger::decrease_used(&mut conn, fx.storage_id, 4).await.unwrap();

        let mut tally = DeleteTally::default();
        delete(&mut conn, &file, 2, &mut tally).await.unwrap();

        assert_eq!(tally.bytes, 6);
        let storage = QuotaLedger::get_by_id(&mut conn, fx.storage_id).await.unwrap().unwrap();
        assert_eq!(storage.current_size, 0);
    }
}
