//! Session Layer
//!
//! A [`Session`] is the transactional unit of work against a repository: it
//! caches what it reads, accumulates what it writes, and flushes everything
//! in one batch on [`Session::save`]. Between its own saves a session's view
//! is stable; invalidations from other sessions and other cluster nodes wait
//! in an inbox until the next save boundary.
//!
//! # Architecture
//!
//! - `context`: per-session cache (node entries + child id lists)
//! - `tracker`: what changed since the last save, in flush order
//! - `invalidation`: the two-tier cache coherence protocol
//! - `versioning`: check-in/check-out/restore and proxies
//! - `pool`: bounded reuse of sessions
//!
//! Sessions are single-owner (`&mut self` surface) and cheap to open; share
//! the repository, not the session.

pub mod context;
pub mod error;
pub mod invalidation;
pub mod pool;
pub mod tracker;
pub mod versioning;

pub use error::SessionError;
pub use invalidation::{ClusterState, InvalidationBus, Invalidations};
pub use pool::{PooledSession, SessionPool};

use crate::db::WriteBatch;
use crate::events::RepositoryEvent;
use crate::models::{AclEntry, LockInfo, Node, NodeId, PropertyValue, ValidationError};
use crate::repository::Repository;
use crate::session::context::{CacheStatus, SessionContext};
use crate::session::tracker::WriteTracker;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A unit of work against one repository.
pub struct Session {
    id: u64,
    repo: Arc<Repository>,
    context: SessionContext,
    tracker: WriteTracker,
    inbox: Arc<Mutex<Invalidations>>,
}

impl Session {
    pub(crate) fn new(repo: Arc<Repository>, id: u64) -> Self {
        let inbox = repo.bus.register(id);
        Session {
            id,
            repo: Arc::clone(&repo),
            context: SessionContext::new(repo.config.cache_capacity),
            tracker: WriteTracker::new(),
            inbox,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this session holds unsaved work.
    pub fn has_pending_changes(&self) -> bool {
        !self.tracker.is_empty()
    }

    // ---- cache plumbing ----

    /// Ensures the node is cached, loading it from the store on a miss.
    ///
    /// Eviction runs before the insert so a read-heavy session sheds excess
    /// pristine entries as it goes; the entry being loaded is never the
    /// victim, and pinned parents survive regardless.
    async fn load(&mut self, id: &NodeId) -> Result<(), SessionError> {
        if self.context.contains(id) {
            return Ok(());
        }
        if let Some(node) = self.repo.store.read_node(id).await? {
            if !node.deleted {
                self.context.evict_excess();
                self.context.insert_pristine(node);
            }
        }
        Ok(())
    }

    /// The node as this session sees it, or `NodeNotFound`.
    async fn require(&mut self, id: &NodeId) -> Result<Node, SessionError> {
        self.load(id).await?;
        match self.context.get(id) {
            Some(entry) if entry.status != CacheStatus::Deleted => Ok(entry.node.clone()),
            _ => Err(SessionError::NodeNotFound(id.clone())),
        }
    }

    fn mark_dirty(&mut self, id: &NodeId) {
        self.context.mark_modified(id);
        if !self.tracker.is_created(id) {
            self.tracker.note_modified(id.clone());
        }
    }

    /// Child ids of a parent in this session's view, (pos, id) ordered.
    ///
    /// Merges the store's rows with in-session creations, moves and removals,
    /// then caches the complete list.
    async fn children_ids(&mut self, parent_id: &NodeId) -> Result<Vec<NodeId>, SessionError> {
        if let Some(ids) = self.context.child_ids(parent_id) {
            return Ok(ids.to_vec());
        }
        let stored = self.repo.store.read_children(parent_id).await?;
        for node in stored {
            self.context.insert_pristine(node);
        }
        let mut ids: Vec<NodeId> = self.context.ids_with_parent(parent_id);
        ids.sort_by_key(|id| self.context.sort_key(id));
        self.context.set_children(parent_id.clone(), ids.clone());
        Ok(ids)
    }

    /// Next free sibling position under a parent.
    async fn next_pos(&mut self, parent_id: &NodeId) -> Result<i64, SessionError> {
        let ids = self.children_ids(parent_id).await?;
        let max = ids
            .iter()
            .filter_map(|id| self.context.get(id).and_then(|e| e.node.pos))
            .max();
        Ok(max.map(|p| p + 1).unwrap_or(0))
    }

    /// Rejects a name already taken among the visible children of a parent.
    async fn check_free_name(
        &mut self,
        parent_id: &NodeId,
        name: &str,
        exclude: Option<&NodeId>,
    ) -> Result<(), SessionError> {
        let ids = self.children_ids(parent_id).await?;
        for id in &ids {
            if Some(id) == exclude {
                continue;
            }
            if let Some(entry) = self.context.get(id) {
                if entry.node.name == name {
                    return Err(ValidationError::NameExists {
                        parent_id: parent_id.clone(),
                        name: name.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Rejects placing `id` at or under `dest` when `dest` sits inside the
    /// subtree rooted at `id`.
    async fn check_not_under(
        &mut self,
        op: &'static str,
        id: &NodeId,
        dest: &NodeId,
    ) -> Result<(), SessionError> {
        let mut cursor = Some(dest.clone());
        while let Some(current) = cursor {
            if &current == id {
                return Err(ValidationError::UnderOwnDescendant {
                    op,
                    id: id.clone(),
                    dest: dest.clone(),
                }
                .into());
            }
            cursor = self.require(&current).await?.parent_id;
        }
        Ok(())
    }

    /// Resolves a proxy to its target (one hop). Non-proxies resolve to
    /// themselves.
    async fn resolve_target(&mut self, id: &NodeId) -> Result<Node, SessionError> {
        let node = self.require(id).await?;
        match &node.proxy {
            Some(proxy) => {
                let target_id = proxy.target_id.clone();
                self.require(&target_id).await
            }
            None => Ok(node),
        }
    }

    /// The version root above a node, if the node sits inside a frozen
    /// version subtree. Version roots are parentless, so the walk is bounded
    /// by the hierarchy depth.
    async fn version_root_of(&mut self, start: &Node) -> Result<Option<NodeId>, SessionError> {
        let mut node = start.clone();
        loop {
            if node.is_version() {
                return Ok(Some(node.id));
            }
            match node.parent_id.clone() {
                Some(parent_id) => node = self.require(&parent_id).await?,
                None => return Ok(None),
            }
        }
    }

    // ---- reads ----

    /// Reads a node by id.
    pub async fn get_node(&mut self, id: &NodeId) -> Result<Node, SessionError> {
        self.require(id).await
    }

    /// Reads a node by id, `None` instead of an error when absent.
    pub async fn try_get_node(&mut self, id: &NodeId) -> Result<Option<Node>, SessionError> {
        match self.get_node(id).await {
            Ok(node) => Ok(Some(node)),
            Err(SessionError::NodeNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The visible children of a parent, in (pos, id) order.
    ///
    /// When two sessions committed the same name concurrently, both rows are
    /// returned; name lookups pick the first in order, so every reader sees
    /// the same stable winner.
    pub async fn get_children(&mut self, parent_id: &NodeId) -> Result<Vec<Node>, SessionError> {
        self.require(parent_id).await?;
        let ids = self.children_ids(parent_id).await?;
        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            // A stale cached list may reference a row removed elsewhere;
            // skip quietly, the next save drains the pending invalidation.
            if let Some(node) = self.try_get_node(&id).await? {
                children.push(node);
            }
        }
        Ok(children)
    }

    /// Looks up a child by name. Duplicates resolve to the first in
    /// (pos, id) order.
    pub async fn get_child_by_name(
        &mut self,
        parent_id: &NodeId,
        name: &str,
    ) -> Result<Option<Node>, SessionError> {
        let children = self.get_children(parent_id).await?;
        Ok(children.into_iter().find(|c| c.name == name))
    }

    /// Resolves a `/`-separated path from the root.
    pub async fn get_node_by_path(&mut self, path: &str) -> Result<Node, SessionError> {
        let mut node = self.require(&NodeId::root()).await?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let parent_id = node.id.clone();
            node = self
                .get_child_by_name(&parent_id, segment)
                .await?
                .ok_or_else(|| SessionError::PathNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    // ---- structure ----

    /// Creates a child node. The new node exists only in this session until
    /// `save()`; its parent stays cached (pinned) until then.
    pub async fn add_child(
        &mut self,
        parent_id: &NodeId,
        name: &str,
        primary_type: &str,
    ) -> Result<Node, SessionError> {
        if !self.repo.schemas.has_type(primary_type) {
            return Err(ValidationError::UnknownType(primary_type.to_string()).into());
        }
        self.require(parent_id).await?;
        self.check_free_name(parent_id, name, None).await?;
        let pos = self.next_pos(parent_id).await?;

        let node = Node::new(Some(parent_id.clone()), name, primary_type, Some(pos));
        self.context.insert_created(node.clone());
        self.context.pin(parent_id);
        self.context.add_child_id(parent_id, &node);
        self.tracker.note_created(node.id.clone(), parent_id.clone());
        self.tracker.note_parent_touched(parent_id.clone());
        Ok(node)
    }

    /// Moves a node under a new parent, optionally renaming it.
    ///
    /// Identity is stable across moves: the id does not change and cached
    /// state follows the node.
    pub async fn move_node(
        &mut self,
        id: &NodeId,
        new_parent_id: &NodeId,
        new_name: Option<&str>,
    ) -> Result<(), SessionError> {
        if *id == NodeId::root() {
            return Err(SessionError::RootOperation("moved"));
        }
        let node = self.require(id).await?;
        if node.is_version() {
            return Err(ValidationError::VersionImmutable {
                id: id.clone(),
                path: "parent".to_string(),
            }
            .into());
        }
        self.require(new_parent_id).await?;
        self.check_not_under("move", id, new_parent_id).await?;
        let name = new_name.unwrap_or(&node.name).to_string();
        self.check_free_name(new_parent_id, &name, Some(id)).await?;
        let pos = self.next_pos(new_parent_id).await?;

        let old_parent = node.parent_id.clone();
        self.mark_dirty(id);
        if let Some(entry) = self.context.get_mut(id) {
            entry.node.parent_id = Some(new_parent_id.clone());
            entry.node.name = name;
            entry.node.pos = Some(pos);
        }
        if let Some(old_parent) = &old_parent {
            self.context.remove_child_id(old_parent, id);
            self.tracker.note_parent_touched(old_parent.clone());
        }
        let moved = self.require(id).await?;
        self.context.add_child_id(new_parent_id, &moved);
        self.tracker.note_parent_touched(new_parent_id.clone());

        // A created node pins the parent it will be flushed under.
        if self.tracker.is_created(id) {
            if let Some(previous) = self.tracker.repin(id, new_parent_id.clone()) {
                self.context.unpin(&previous);
            }
            self.context.pin(new_parent_id);
        }
        Ok(())
    }

    /// Deep-copies a subtree under a new parent. Every copied node gets a
    /// fresh id; property values are deep-cloned, never aliased. Locks and
    /// versioning state are not copied; proxies copy as proxies.
    pub async fn copy_node(
        &mut self,
        id: &NodeId,
        dest_parent_id: &NodeId,
        new_name: Option<&str>,
    ) -> Result<Node, SessionError> {
        if *id == NodeId::root() {
            return Err(SessionError::RootOperation("copied"));
        }
        let source = self.require(id).await?;
        self.require(dest_parent_id).await?;
        self.check_not_under("copy", id, dest_parent_id).await?;
        let root_name = new_name.unwrap_or(&source.name).to_string();
        self.check_free_name(dest_parent_id, &root_name, None).await?;
        let root_pos = self.next_pos(dest_parent_id).await?;

        let mut copy_root = None;
        let mut queue: VecDeque<(NodeId, NodeId, Option<String>, Option<i64>)> = VecDeque::new();
        queue.push_back((
            id.clone(),
            dest_parent_id.clone(),
            Some(root_name),
            Some(root_pos),
        ));
        while let Some((source_id, parent_id, name, pos)) = queue.pop_front() {
            let original = self.require(&source_id).await?;
            let child_ids = if original.is_proxy() {
                Vec::new()
            } else {
                self.children_ids(&source_id).await?
            };

            let mut copy = original.clone();
            copy.id = NodeId::new();
            copy.parent_id = Some(parent_id.clone());
            if let Some(name) = name {
                copy.name = name;
            }
            if let Some(pos) = pos {
                copy.pos = Some(pos);
            }
            copy.lock = None;
            copy.is_checked_in = false;
            copy.base_version_id = None;
            copy.version = None;

            self.context.insert_created(copy.clone());
            self.context.pin(&parent_id);
            self.context.add_child_id(&parent_id, &copy);
            self.tracker.note_created(copy.id.clone(), parent_id.clone());
            self.tracker.note_parent_touched(parent_id);

            for child_id in child_ids {
                queue.push_back((child_id, copy.id.clone(), None, None));
            }
            if copy_root.is_none() {
                copy_root = Some(copy);
            }
        }
        // The queue starts non-empty, so the root copy always exists.
        copy_root.ok_or_else(|| SessionError::NodeNotFound(id.clone()))
    }

    /// Removes a node and its whole subtree.
    ///
    /// Versions of a removed live document are removed with it, except those
    /// still targeted by a proxy that survives the removal.
    pub async fn remove_node(&mut self, id: &NodeId) -> Result<(), SessionError> {
        if *id == NodeId::root() {
            return Err(SessionError::RootOperation("removed"));
        }
        let node = self.require(id).await?;

        // Pre-order walk of the subtree; reversed it yields children first.
        let mut order = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            let current_node = self.require(&current).await?;
            order.push(current.clone());
            if !current_node.is_proxy() {
                stack.extend(self.children_ids(&current).await?);
            }
        }

        // Versions orphaned by this removal, minus those a surviving proxy
        // still needs.
        let mut version_casualties = Vec::new();
        for removed_id in &order {
            let removed = self.require(removed_id).await?;
            if removed.is_proxy() || removed.is_version() {
                continue;
            }
            let series = removed.version_series_id();
            let versions = self.get_versions(&series).await?;
            if versions.is_empty() {
                continue;
            }
            let survivors = self.get_proxies(&series).await?;
            let protected: Vec<NodeId> = survivors
                .iter()
                .filter(|p| !order.contains(&p.id))
                .filter_map(|p| p.proxy.as_ref().map(|info| info.target_id.clone()))
                .collect();
            for version in versions {
                if !protected.contains(&version.id) && !order.contains(&version.id) {
                    version_casualties.push(version.id);
                }
            }
        }

        order.reverse();
        // Casualty versions are subtree roots of their own; their frozen
        // children go with them.
        for casualty in version_casualties {
            let mut sub = Vec::new();
            let mut stack = vec![casualty];
            while let Some(current) = stack.pop() {
                self.load(&current).await?;
                sub.push(current.clone());
                stack.extend(self.children_ids(&current).await?);
            }
            sub.reverse();
            order.extend(sub);
        }
        for removed_id in &order {
            let parent = self
                .context
                .get(removed_id)
                .and_then(|e| e.node.parent_id.clone());
            if self.tracker.is_created(removed_id) {
                if let Some(pinned) = self.tracker.forget_created(removed_id) {
                    self.context.unpin(&pinned);
                }
                self.context.mark_deleted(removed_id);
            } else if self.context.mark_deleted(removed_id) {
                self.tracker.note_removed(removed_id.clone());
            }
            self.context.drop_child_list(removed_id);
            if let Some(parent) = parent {
                self.context.remove_child_id(&parent, removed_id);
            }
        }
        if let Some(parent) = &node.parent_id {
            self.tracker.note_parent_touched(parent.clone());
        }
        Ok(())
    }

    // ---- properties ----

    /// Writes a property. On a proxy the write lands on the target (one
    /// hop). Writes into a frozen version subtree are rejected unless the
    /// path is on the lifecycle allow-list of the version root itself.
    pub async fn set_property(
        &mut self,
        id: &NodeId,
        path: &str,
        value: PropertyValue,
    ) -> Result<(), SessionError> {
        let node = self.resolve_target(id).await?;
        self.check_version_writable(&node, path).await?;
        // Lifecycle paths are system-managed and bypass the type's schemas.
        if !crate::models::VERSION_WRITABLE_PROPS.contains(&path) {
            let def = self.repo.schemas.resolve(&node.primary_type, path)?;
            def.check_value(path, &value)?;
        }
        let target_id = node.id.clone();
        self.mark_dirty(&target_id);
        if let Some(entry) = self.context.get_mut(&target_id) {
            entry.node.properties.insert(path.to_string(), value);
        }
        Ok(())
    }

    /// Writes several properties in one call. Stops at the first invalid
    /// path; earlier writes in the batch stay pending like any other.
    pub async fn set_simple_properties(
        &mut self,
        id: &NodeId,
        values: impl IntoIterator<Item = (String, PropertyValue)>,
    ) -> Result<(), SessionError> {
        for (path, value) in values {
            self.set_property(id, &path, value).await?;
        }
        Ok(())
    }

    /// Reads a property, resolving proxies to their target.
    pub async fn get_property(
        &mut self,
        id: &NodeId,
        path: &str,
    ) -> Result<Option<PropertyValue>, SessionError> {
        let node = self.resolve_target(id).await?;
        if !crate::models::VERSION_WRITABLE_PROPS.contains(&path) {
            self.repo.schemas.resolve(&node.primary_type, path)?;
        }
        Ok(node.properties.get(path).cloned())
    }

    /// Removes a property, returning the previous value.
    pub async fn remove_property(
        &mut self,
        id: &NodeId,
        path: &str,
    ) -> Result<Option<PropertyValue>, SessionError> {
        let node = self.resolve_target(id).await?;
        self.check_version_writable(&node, path).await?;
        let target_id = node.id.clone();
        self.mark_dirty(&target_id);
        Ok(self
            .context
            .get_mut(&target_id)
            .and_then(|entry| entry.node.properties.remove(path)))
    }

    async fn check_version_writable(
        &mut self,
        node: &Node,
        path: &str,
    ) -> Result<(), SessionError> {
        if node.is_version() {
            if !node.is_property_writable(path) {
                return Err(ValidationError::VersionImmutable {
                    id: node.id.clone(),
                    path: path.to_string(),
                }
                .into());
            }
            return Ok(());
        }
        if let Some(root) = self.version_root_of(node).await? {
            // Inside a version subtree but not the root: fully frozen.
            return Err(ValidationError::VersionImmutable {
                id: root,
                path: path.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ---- ACL ----

    pub async fn get_acl(&mut self, id: &NodeId) -> Result<Vec<AclEntry>, SessionError> {
        Ok(self.require(id).await?.acl)
    }

    /// Replaces the node's ACL. Row positions are normalized to list order.
    pub async fn set_acl(
        &mut self,
        id: &NodeId,
        mut entries: Vec<AclEntry>,
    ) -> Result<(), SessionError> {
        let node = self.require(id).await?;
        if node.is_version() {
            return Err(ValidationError::VersionImmutable {
                id: id.clone(),
                path: "acl".to_string(),
            }
            .into());
        }
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.pos = i as i64;
        }
        self.mark_dirty(id);
        if let Some(entry) = self.context.get_mut(id) {
            entry.node.acl = entries;
        }
        Ok(())
    }

    // ---- locks ----

    pub async fn get_lock(&mut self, id: &NodeId) -> Result<Option<LockInfo>, SessionError> {
        Ok(self.resolve_target(id).await?.lock)
    }

    /// Takes a lock for `owner`. If a lock already exists it is returned
    /// unchanged and the node is not modified; callers detect contention by
    /// the `Some` return.
    pub async fn set_lock(
        &mut self,
        id: &NodeId,
        owner: &str,
    ) -> Result<Option<LockInfo>, SessionError> {
        let node = self.resolve_target(id).await?;
        if let Some(existing) = node.lock {
            return Ok(Some(existing));
        }
        let target_id = node.id;
        self.mark_dirty(&target_id);
        if let Some(entry) = self.context.get_mut(&target_id) {
            entry.node.lock = Some(LockInfo {
                owner: owner.to_string(),
                created: Utc::now(),
            });
        }
        Ok(None)
    }

    /// Releases a lock, returning the lock that was held.
    pub async fn remove_lock(&mut self, id: &NodeId) -> Result<Option<LockInfo>, SessionError> {
        let node = self.resolve_target(id).await?;
        if node.lock.is_none() {
            return Ok(None);
        }
        let target_id = node.id;
        self.mark_dirty(&target_id);
        Ok(self
            .context
            .get_mut(&target_id)
            .and_then(|entry| entry.node.lock.take()))
    }

    // ---- transaction boundary ----

    /// Flushes pending work in one batch, then exchanges invalidations.
    ///
    /// Order of effects:
    ///
    /// 1. pending creations (creation order), value-dirty updates, removals
    ///    (children first) are written as one [`WriteBatch`]
    /// 2. the commit's invalidations go to every sibling session's inbox
    /// 3. in cluster mode they are appended to the durable queue; the queue
    ///    is polled when the delay window elapsed, and remote records fan
    ///    into all local inboxes
    /// 4. this session's own inbox is drained and applied
    ///
    /// A save with no pending changes writes nothing and sends nothing, but
    /// still polls and drains, so read-only sessions converge too.
    pub async fn save(&mut self) -> Result<(), SessionError> {
        let mut batch = WriteBatch::default();
        let mut invalidations = Invalidations::new();

        for id in self.tracker.created_ids().to_vec() {
            if let Some(entry) = self.context.get(&id) {
                if entry.status == CacheStatus::Created {
                    batch.creates.push(entry.node.clone());
                    invalidations.add_modified(id);
                }
            }
        }
        let modified: Vec<NodeId> = self.tracker.modified_ids().cloned().collect();
        for id in modified {
            if let Some(entry) = self.context.get(&id) {
                if entry.status == CacheStatus::Modified && entry.is_value_dirty() {
                    batch.updates.push(entry.node.clone());
                    invalidations.add_modified(id);
                }
            }
        }
        let now = Utc::now();
        for id in self.tracker.removed_ids().to_vec() {
            if self.repo.config.soft_delete {
                batch.soft_deletes.push((id.clone(), now));
            } else {
                batch.deletes.push(id.clone());
            }
            invalidations.add_modified(id);
        }
        for parent in self.tracker.touched_parent_ids() {
            invalidations.add_parent(parent.clone());
        }

        let event = RepositoryEvent::DocumentsChanged {
            created: batch.creates.iter().map(|n| n.id.clone()).collect(),
            modified: batch.updates.iter().map(|n| n.id.clone()).collect(),
            removed: self.tracker.removed_ids().to_vec(),
        };

        let wrote = !batch.is_empty();
        if wrote {
            debug!(
                session = self.id,
                creates = batch.creates.len(),
                updates = batch.updates.len(),
                removes = batch.deletes.len() + batch.soft_deletes.len(),
                "flushing session batch"
            );
            self.repo.store.write_batch(batch).await?;
        }
        self.context.settle_after_flush();
        self.tracker.clear();

        if !invalidations.is_empty() {
            self.repo.bus.post(self.id, &invalidations);
        }
        if let Some(cluster) = &self.repo.cluster {
            if !invalidations.is_empty() {
                let modified: Vec<NodeId> = invalidations.modified.iter().cloned().collect();
                let parents: Vec<NodeId> = invalidations.parents.iter().cloned().collect();
                let seq = self
                    .repo
                    .store
                    .append_invalidations(cluster.node_id(), &modified, &parents)
                    .await?;
                cluster.note_sent(seq);
            }
            if cluster.should_poll() {
                let records = self
                    .repo
                    .store
                    .poll_invalidations_since(cluster.last_seq())
                    .await?;
                let mut head = cluster.last_seq();
                for record in records {
                    head = head.max(record.seq);
                    if record.origin == cluster.node_id() {
                        continue;
                    }
                    let mut remote = Invalidations::new();
                    remote.modified.extend(record.modified);
                    remote.parents.extend(record.parents);
                    self.repo.bus.post_all(&remote);
                }
                cluster.note_polled(head);
            }
        }

        let pending = self
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.context.apply_invalidations(&pending);

        if wrote {
            // No subscribers is fine; the commit does not depend on them.
            let _ = self.repo.events.send(event);
        }
        self.context.evict_excess();
        Ok(())
    }

    /// Flushes pending work ahead of an external commit decision. The vote
    /// itself belongs to the transaction coordinator; this is the implicit
    /// `save()` it expects before prepare.
    pub async fn prepare(&mut self) -> Result<(), SessionError> {
        self.save().await
    }

    /// Discards all unsaved work and cached state. The next read reloads
    /// from the store.
    pub fn rollback(&mut self) {
        self.tracker.clear();
        self.context.clear();
        let _ = self
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.repo.bus.unregister(self.id);
    }
}
