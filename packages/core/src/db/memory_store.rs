//! In-Memory Store
//!
//! A `NodeStore` implementation backed by process memory. Used by unit and
//! integration tests, and useful as a scratch repository; several
//! repositories sharing one `MemoryStore` behave like cluster nodes sharing
//! one database.

use crate::db::error::DatabaseError;
use crate::db::node_store::{InvalidationRecord, NodeStore, WriteBatch};
use crate::models::{Node, NodeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<NodeId, Node>,
    queue: Vec<InvalidationRecord>,
    next_seq: i64,
}

/// Shared in-memory backing store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of rows currently held, soft-deleted included.
    pub fn row_count(&self) -> usize {
        self.read().nodes.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        // Lock poisoning only happens if a writer panicked; propagating the
        // panic here is the correct response for an in-memory test store.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn sorted_by_pos(mut nodes: Vec<Node>) -> Vec<Node> {
        nodes.sort_by(|a, b| (a.pos, &a.id).cmp(&(b.pos, &b.id)));
        nodes
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn read_node(&self, id: &NodeId) -> Result<Option<Node>, DatabaseError> {
        Ok(self.read().nodes.get(id).cloned())
    }

    async fn read_children(&self, parent_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let inner = self.read();
        let children = inner
            .nodes
            .values()
            .filter(|n| !n.deleted && n.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect();
        Ok(Self::sorted_by_pos(children))
    }

    async fn read_versions(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let inner = self.read();
        let mut versions: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| {
                !n.deleted
                    && n.version
                        .as_ref()
                        .map(|v| &v.series_id == series_id)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        versions.sort_by(|a, b| {
            let ka = a.version.as_ref().map(|v| v.created);
            let kb = b.version.as_ref().map(|v| v.created);
            (ka, &a.id).cmp(&(kb, &b.id))
        });
        Ok(versions)
    }

    async fn read_proxies(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let inner = self.read();
        let proxies = inner
            .nodes
            .values()
            .filter(|n| {
                !n.deleted
                    && n.proxy
                        .as_ref()
                        .map(|p| &p.series_id == series_id)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(Self::sorted_by_pos(proxies))
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        let mut inner = self.write();
        for node in batch.creates {
            // Duplicate (parent, name) rows are tolerated by design; ids are
            // unique so this never clobbers a foreign row.
            inner.nodes.insert(node.id.clone(), node);
        }
        for node in batch.updates {
            inner.nodes.insert(node.id.clone(), node);
        }
        for (id, at) in batch.soft_deletes {
            if let Some(node) = inner.nodes.get_mut(&id) {
                node.deleted = true;
                node.deleted_at = Some(at);
            }
        }
        for id in batch.deletes {
            inner.nodes.remove(&id);
        }
        Ok(())
    }

    async fn append_invalidations(
        &self,
        origin: &str,
        modified: &[NodeId],
        parents: &[NodeId],
    ) -> Result<i64, DatabaseError> {
        let mut inner = self.write();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.queue.push(InvalidationRecord {
            seq,
            origin: origin.to_string(),
            modified: modified.to_vec(),
            parents: parents.to_vec(),
        });
        Ok(seq)
    }

    async fn poll_invalidations_since(
        &self,
        since: i64,
    ) -> Result<Vec<InvalidationRecord>, DatabaseError> {
        let inner = self.read();
        Ok(inner
            .queue
            .iter()
            .filter(|r| r.seq > since)
            .cloned()
            .collect())
    }

    async fn latest_invalidation_seq(&self) -> Result<i64, DatabaseError> {
        Ok(self.read().next_seq)
    }

    async fn purge_soft_deleted(
        &self,
        max_count: Option<usize>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<usize, DatabaseError> {
        let mut inner = self.write();
        let mut candidates: Vec<(NodeId, DateTime<Utc>)> = inner
            .nodes
            .values()
            .filter(|n| n.deleted)
            .filter(|n| match (cutoff, n.deleted_at) {
                (Some(cut), Some(at)) => at <= cut,
                (Some(_), None) => true,
                (None, _) => true,
            })
            .map(|n| (n.id.clone(), n.deleted_at.unwrap_or_else(Utc::now)))
            .collect();
        // Oldest first so the count bound keeps the most recent tombstones.
        candidates.sort_by(|a, b| (a.1, &a.0).cmp(&(b.1, &b.0)));
        if let Some(max) = max_count {
            candidates.truncate(max);
        }
        for (id, _) in &candidates {
            inner.nodes.remove(id);
        }
        Ok(candidates.len())
    }

    async fn read_binary_digests(&self) -> Result<Vec<String>, DatabaseError> {
        let inner = self.read();
        let mut digests: Vec<String> = inner
            .nodes
            .values()
            .flat_map(|n| n.binary_digests())
            .collect();
        digests.sort();
        digests.dedup();
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(parent: &NodeId, name: &str, pos: i64) -> Node {
        Node::new(Some(parent.clone()), name, "note", Some(pos))
    }

    #[tokio::test]
    async fn children_are_ordered_and_exclude_deleted() {
        let store = MemoryStore::new();
        let parent = NodeId::root();
        let a = child(&parent, "a", 1);
        let b = child(&parent, "b", 0);
        let mut c = child(&parent, "c", 2);
        c.deleted = true;
        store
            .write_batch(WriteBatch {
                creates: vec![a.clone(), b.clone(), c],
                ..Default::default()
            })
            .await
            .unwrap();

        let children = store.read_children(&parent).await.unwrap();
        let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn queue_polls_by_sequence() {
        let store = MemoryStore::new();
        let id = NodeId::new();
        let s1 = store
            .append_invalidations("n1", &[id.clone()], &[])
            .await
            .unwrap();
        let s2 = store.append_invalidations("n2", &[], &[id]).await.unwrap();
        assert!(s2 > s1);

        let all = store.poll_invalidations_since(0).await.unwrap();
        assert_eq!(all.len(), 2);
        let tail = store.poll_invalidations_since(s1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].origin, "n2");
    }

    #[tokio::test]
    async fn purge_honors_count_and_cutoff() {
        let store = MemoryStore::new();
        let parent = NodeId::root();
        let nodes: Vec<Node> = (0..4).map(|i| child(&parent, &format!("n{i}"), i)).collect();
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();
        store
            .write_batch(WriteBatch {
                creates: nodes,
                ..Default::default()
            })
            .await
            .unwrap();

        let old = Utc::now() - chrono::Duration::days(10);
        let recent = Utc::now();
        store
            .write_batch(WriteBatch {
                soft_deletes: vec![
                    (ids[0].clone(), old),
                    (ids[1].clone(), old),
                    (ids[2].clone(), recent),
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        // Cutoff excludes the recent tombstone; count bound keeps one old row.
        let cutoff = Utc::now() - chrono::Duration::days(1);
        let purged = store
            .purge_soft_deleted(Some(1), Some(cutoff))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        let purged = store.purge_soft_deleted(None, Some(cutoff)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.row_count(), 2);
    }
}
