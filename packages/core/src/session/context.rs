//! Session Cache Context
//!
//! Per-session cache of node state and child lists. Entries move through a
//! small status machine:
//!
//! - `Pristine`: loaded from the store, unchanged; evictable when unpinned
//! - `Created`: born in this session, not yet persisted
//! - `Modified`: loaded then changed; the load-time snapshot is kept so
//!   `save()` can skip value-identical writes
//! - `Deleted`: removed in this session, pending flush
//!
//! Dirty entries are never evicted. A parent is pinned while it has
//! uncommitted created children, so hierarchy fixups at flush time always
//! find it cached.

use crate::models::{Node, NodeId};
use crate::session::invalidation::Invalidations;
use std::collections::HashMap;

/// Lifecycle of a cached entry within the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheStatus {
    Pristine,
    Created,
    Modified,
    Deleted,
}

#[derive(Debug)]
pub(crate) struct CachedEntry {
    pub node: Node,
    pub status: CacheStatus,
    /// Load-time snapshot, kept once the entry turns `Modified`.
    pub pristine: Option<Node>,
    /// Number of uncommitted created children keeping this entry resident.
    pub pin: u32,
}

impl CachedEntry {
    /// Whether flushing this entry would actually change stored values.
    pub fn is_value_dirty(&self) -> bool {
        match self.status {
            CacheStatus::Modified => match &self.pristine {
                Some(snapshot) => snapshot != &self.node,
                None => true,
            },
            CacheStatus::Created | CacheStatus::Deleted => true,
            CacheStatus::Pristine => false,
        }
    }
}

/// Per-session cache of nodes and child id lists.
pub(crate) struct SessionContext {
    entries: HashMap<NodeId, CachedEntry>,
    /// Complete child id lists, in (pos, id) order. Present only for parents
    /// whose children were fully enumerated in this session.
    children: HashMap<NodeId, Vec<NodeId>>,
    capacity: usize,
}

impl SessionContext {
    pub fn new(capacity: usize) -> Self {
        SessionContext {
            entries: HashMap::new(),
            children: HashMap::new(),
            capacity,
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&CachedEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut CachedEntry> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Caches a node freshly loaded from the store.
    ///
    /// An existing entry wins: the session may hold newer local state than
    /// what the store returned.
    pub fn insert_pristine(&mut self, node: Node) {
        self.entries.entry(node.id.clone()).or_insert(CachedEntry {
            node,
            status: CacheStatus::Pristine,
            pristine: None,
            pin: 0,
        });
    }

    /// Caches a node created in this session.
    pub fn insert_created(&mut self, node: Node) {
        self.entries.insert(
            node.id.clone(),
            CachedEntry {
                node,
                status: CacheStatus::Created,
                pristine: None,
                pin: 0,
            },
        );
    }

    /// Marks an entry modified, snapshotting its pristine state first.
    pub fn mark_modified(&mut self, id: &NodeId) {
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.status == CacheStatus::Pristine {
                entry.pristine = Some(entry.node.clone());
                entry.status = CacheStatus::Modified;
            }
        }
    }

    /// Marks an entry deleted. Created entries are dropped outright; they
    /// never reached the store.
    ///
    /// Returns true if the entry had been persisted and needs a store delete.
    pub fn mark_deleted(&mut self, id: &NodeId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.status == CacheStatus::Created => {
                self.entries.remove(id);
                false
            }
            Some(entry) => {
                entry.status = CacheStatus::Deleted;
                true
            }
            None => false,
        }
    }

    pub fn pin(&mut self, id: &NodeId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.pin += 1;
        }
    }

    pub fn unpin(&mut self, id: &NodeId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.pin = entry.pin.saturating_sub(1);
        }
    }

    /// After a successful flush: dirty entries settle into `Pristine` with a
    /// fresh snapshot baseline, deleted entries leave the cache.
    pub fn settle_after_flush(&mut self) {
        let deleted: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.status == CacheStatus::Deleted)
            .map(|(id, _)| id.clone())
            .collect();
        for id in deleted {
            self.entries.remove(&id);
        }
        for entry in self.entries.values_mut() {
            if entry.status != CacheStatus::Pristine {
                entry.status = CacheStatus::Pristine;
                entry.pristine = None;
            }
            // Nothing is pending creation after a flush, so no pins remain.
            entry.pin = 0;
        }
    }

    // ---- child lists ----

    pub fn set_children(&mut self, parent_id: NodeId, ids: Vec<NodeId>) {
        self.children.insert(parent_id, ids);
    }

    pub fn child_ids(&self, parent_id: &NodeId) -> Option<&[NodeId]> {
        self.children.get(parent_id).map(|v| v.as_slice())
    }

    /// Inserts a child into a cached list, if the list is loaded, keeping
    /// (pos, id) order.
    pub fn add_child_id(&mut self, parent_id: &NodeId, child: &Node) {
        let Some(list) = self.children.get(parent_id) else {
            return;
        };
        if list.contains(&child.id) {
            return;
        }
        let key = (child.pos, child.id.clone());
        let insert_at = list
            .iter()
            .position(|sibling| {
                self.entries
                    .get(sibling)
                    .map(|e| (e.node.pos, e.node.id.clone()) > key)
                    .unwrap_or(false)
            })
            .unwrap_or(list.len());
        if let Some(list) = self.children.get_mut(parent_id) {
            list.insert(insert_at, child.id.clone());
        }
    }

    pub fn remove_child_id(&mut self, parent_id: &NodeId, child_id: &NodeId) {
        if let Some(list) = self.children.get_mut(parent_id) {
            list.retain(|id| id != child_id);
        }
    }

    /// Forgets a cached child list, e.g. when its owner is removed.
    pub fn drop_child_list(&mut self, parent_id: &NodeId) {
        self.children.remove(parent_id);
    }

    /// Ids of cached, non-deleted entries whose current parent is `parent`.
    ///
    /// Used when merging the store's child rows with in-session creations
    /// and moves.
    pub fn ids_with_parent(&self, parent: &NodeId) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.status != CacheStatus::Deleted && e.node.parent_id.as_ref() == Some(parent)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// (pos, id) ordering key of a cached entry.
    pub fn sort_key(&self, id: &NodeId) -> Option<(Option<i64>, NodeId)> {
        self.entries.get(id).map(|e| (e.node.pos, e.node.id.clone()))
    }

    /// Ids of cached, non-deleted version nodes of a series.
    pub fn ids_with_version_series(&self, series_id: &NodeId) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.status != CacheStatus::Deleted
                    && e.node
                        .version
                        .as_ref()
                        .map(|v| &v.series_id == series_id)
                        .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of cached, non-deleted proxy nodes keyed by a series.
    pub fn ids_with_proxy_series(&self, series_id: &NodeId) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, e)| {
                e.status != CacheStatus::Deleted
                    && e.node
                        .proxy
                        .as_ref()
                        .map(|p| &p.series_id == series_id)
                        .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Applies received invalidations: pristine node state and affected child
    /// lists are dropped. Locally dirty entries are kept; this session's own
    /// pending changes overwrite on its next save.
    pub fn apply_invalidations(&mut self, invalidations: &Invalidations) {
        for id in &invalidations.modified {
            if let Some(entry) = self.entries.get(id) {
                if entry.status == CacheStatus::Pristine && entry.pin == 0 {
                    self.entries.remove(id);
                }
            }
        }
        for parent in &invalidations.parents {
            self.children.remove(parent);
        }
    }

    /// Drops unpinned pristine entries down to the configured capacity.
    ///
    /// Dirty and pinned entries are exempt; a session with more uncommitted
    /// work than capacity simply runs over until it saves.
    pub fn evict_excess(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let excess = self.entries.len() - self.capacity;
        let victims: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.status == CacheStatus::Pristine && e.pin == 0)
            .map(|(id, _)| id.clone())
            .take(excess)
            .collect();
        for id in victims {
            self.entries.remove(&id);
        }
    }

    /// Discards everything: caches, child lists, pending work.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.children.clear();
    }
}
