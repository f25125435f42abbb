//! Versioning and Proxies
//!
//! Check-in freezes a deep copy of a document's subtree as a parentless
//! version node; the live document stays fully writable. Versions of one
//! document form a series keyed by the live document's id, with
//! `is_latest` / `is_latest_major` flags recomputed whenever the series
//! changes. Proxies are placeable nodes that resolve their content through a
//! target (a version or the live document) and are looked up by series.

use crate::models::{Node, NodeId, ValidationError, VersionInfo};
use crate::session::{Session, SessionError};
use chrono::Utc;
use std::collections::VecDeque;

impl Session {
    /// Freezes the document's current state as a new version.
    ///
    /// The whole subtree is deep-copied parentless; the live document is
    /// left checked in, with the new version as its base. Check-in does not
    /// freeze the live document itself.
    pub async fn check_in(
        &mut self,
        id: &NodeId,
        label: &str,
        description: Option<&str>,
        major: bool,
    ) -> Result<Node, SessionError> {
        let node = self.resolve_target(id).await?;
        if node.is_version() {
            return Err(ValidationError::NotVersionable(node.id).into());
        }
        if node.is_checked_in {
            return Err(ValidationError::AlreadyCheckedIn(node.id).into());
        }
        let live_id = node.id.clone();

        let mut root = node.clone();
        root.id = NodeId::new();
        root.parent_id = None;
        root.pos = None;
        root.lock = None;
        root.is_checked_in = false;
        root.base_version_id = None;
        root.version = Some(VersionInfo {
            series_id: live_id.clone(),
            label: label.to_string(),
            description: description.map(str::to_string),
            created: Utc::now(),
            major,
            is_latest: true,
            is_latest_major: major,
        });
        let version_id = root.id.clone();
        self.context.insert_created(root.clone());
        // A parentless version pins the live document it was cut from.
        self.context.pin(&live_id);
        self.tracker.note_created(version_id.clone(), live_id.clone());

        self.freeze_children(&live_id, &version_id).await?;

        self.mark_dirty(&live_id);
        if let Some(entry) = self.context.get_mut(&live_id) {
            entry.node.is_checked_in = true;
            entry.node.base_version_id = Some(version_id.clone());
        }
        self.recompute_version_series(&live_id).await?;
        self.require(&version_id).await
    }

    /// Reopens a checked-in document for the next check-in.
    pub async fn check_out(&mut self, id: &NodeId) -> Result<(), SessionError> {
        let node = self.resolve_target(id).await?;
        if node.is_version() {
            return Err(ValidationError::NotVersionable(node.id).into());
        }
        if !node.is_checked_in {
            return Err(ValidationError::AlreadyCheckedOut(node.id).into());
        }
        let live_id = node.id;
        self.mark_dirty(&live_id);
        if let Some(entry) = self.context.get_mut(&live_id) {
            entry.node.is_checked_in = false;
        }
        Ok(())
    }

    /// Overwrites the live document with the state of one of its versions.
    ///
    /// Properties and ACL come from the version; identity, place, name and
    /// lock stay. The current children are removed and the version's subtree
    /// is copied back in. The document is left checked out, based on the
    /// restored version.
    pub async fn restore_version(
        &mut self,
        id: &NodeId,
        version_id: &NodeId,
    ) -> Result<(), SessionError> {
        let node = self.resolve_target(id).await?;
        let live_id = node.id.clone();
        let version = self.require(version_id).await?;
        let belongs = version
            .version
            .as_ref()
            .map(|v| v.series_id == live_id)
            .unwrap_or(false);
        if !belongs {
            return Err(ValidationError::NotAVersionOf {
                version_id: version_id.clone(),
                node_id: live_id,
            }
            .into());
        }

        for child in self.children_ids(&live_id).await? {
            self.remove_node(&child).await?;
        }

        self.mark_dirty(&live_id);
        if let Some(entry) = self.context.get_mut(&live_id) {
            entry.node.properties = version.properties.clone();
            entry.node.acl = version.acl.clone();
            entry.node.is_checked_in = false;
            entry.node.base_version_id = Some(version_id.clone());
        }

        self.thaw_children(version_id, &live_id).await?;
        Ok(())
    }

    /// All versions of a document's series, oldest first.
    pub async fn get_versions(&mut self, id: &NodeId) -> Result<Vec<Node>, SessionError> {
        let series = match self.try_get_node(id).await? {
            Some(node) => node.version_series_id(),
            None => id.clone(),
        };
        let stored = self.repo.store.read_versions(&series).await?;
        for version in stored {
            self.context.insert_pristine(version);
        }
        let mut ids = self.context.ids_with_version_series(&series);
        ids.sort_by_key(|vid| {
            self.context
                .get(vid)
                .and_then(|e| e.node.version.as_ref().map(|v| (v.created, vid.clone())))
        });
        let mut versions = Vec::with_capacity(ids.len());
        for vid in ids {
            versions.push(self.require(&vid).await?);
        }
        Ok(versions)
    }

    /// Ids of a series' versions, oldest first.
    pub async fn get_version_ids(&mut self, id: &NodeId) -> Result<Vec<NodeId>, SessionError> {
        Ok(self
            .get_versions(id)
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect())
    }

    /// The latest version of a series, if any.
    pub async fn get_last_version(&mut self, id: &NodeId) -> Result<Option<Node>, SessionError> {
        Ok(self.get_versions(id).await?.into_iter().next_back())
    }

    /// Creates a proxy to a version or live document under `parent_id`.
    ///
    /// A proxy to a proxy collapses to the underlying target. The proxy is
    /// keyed by the target's series for lookup.
    pub async fn add_proxy(
        &mut self,
        target_id: &NodeId,
        parent_id: &NodeId,
        name: Option<&str>,
    ) -> Result<Node, SessionError> {
        let target = self.resolve_target(target_id).await?;
        let series = target.version_series_id();
        self.require(parent_id).await?;
        let name = name.unwrap_or(&target.name).to_string();
        self.check_free_name(parent_id, &name, None).await?;
        let pos = self.next_pos(parent_id).await?;

        let mut proxy = Node::new(
            Some(parent_id.clone()),
            name,
            target.primary_type.clone(),
            Some(pos),
        );
        proxy.proxy = Some(crate::models::ProxyInfo {
            target_id: target.id.clone(),
            series_id: series,
        });
        self.context.insert_created(proxy.clone());
        self.context.pin(parent_id);
        self.context.add_child_id(parent_id, &proxy);
        self.tracker.note_created(proxy.id.clone(), parent_id.clone());
        self.tracker.note_parent_touched(parent_id.clone());
        Ok(proxy)
    }

    /// All proxies of a document's series, in (pos, id) order.
    pub async fn get_proxies(&mut self, id: &NodeId) -> Result<Vec<Node>, SessionError> {
        let series = match self.try_get_node(id).await? {
            Some(node) => node.version_series_id(),
            None => id.clone(),
        };
        let stored = self.repo.store.read_proxies(&series).await?;
        for proxy in stored {
            self.context.insert_pristine(proxy);
        }
        let mut ids = self.context.ids_with_proxy_series(&series);
        ids.sort_by_key(|pid| self.context.sort_key(pid));
        let mut proxies = Vec::with_capacity(ids.len());
        for pid in ids {
            proxies.push(self.require(&pid).await?);
        }
        Ok(proxies)
    }

    /// Points an existing proxy at another target of the same series.
    pub async fn retarget_proxy(
        &mut self,
        proxy_id: &NodeId,
        new_target_id: &NodeId,
    ) -> Result<(), SessionError> {
        let proxy = self.require(proxy_id).await?;
        let Some(info) = proxy.proxy.clone() else {
            return Err(SessionError::NodeNotFound(proxy_id.clone()));
        };
        let target = self.require(new_target_id).await?;
        if target.version_series_id() != info.series_id {
            return Err(ValidationError::NotAVersionOf {
                version_id: new_target_id.clone(),
                node_id: info.series_id,
            }
            .into());
        }
        self.mark_dirty(proxy_id);
        if let Some(entry) = self.context.get_mut(proxy_id) {
            if let Some(p) = entry.node.proxy.as_mut() {
                p.target_id = target.id.clone();
            }
        }
        Ok(())
    }

    /// Recomputes the `is_latest` / `is_latest_major` flags of a series.
    ///
    /// Called after check-in; also useful after a version removal. Flags
    /// that do not change produce no writes.
    pub async fn recompute_version_series(&mut self, id: &NodeId) -> Result<(), SessionError> {
        let versions = self.get_versions(id).await?;
        let latest = versions.last().map(|v| v.id.clone());
        let latest_major = versions
            .iter()
            .rev()
            .find(|v| v.version.as_ref().map(|i| i.major).unwrap_or(false))
            .map(|v| v.id.clone());
        for version in versions {
            let vid = version.id.clone();
            let Some(info) = version.version.as_ref() else {
                continue;
            };
            let is_latest = Some(&vid) == latest.as_ref();
            let is_latest_major = Some(&vid) == latest_major.as_ref();
            if info.is_latest == is_latest && info.is_latest_major == is_latest_major {
                continue;
            }
            self.mark_dirty(&vid);
            if let Some(entry) = self.context.get_mut(&vid) {
                if let Some(info) = entry.node.version.as_mut() {
                    info.is_latest = is_latest;
                    info.is_latest_major = is_latest_major;
                }
            }
        }
        Ok(())
    }

    /// Deep-copies the children of `source_id` under `dest_id` as created
    /// nodes, keeping names and positions. Shared by check-in (live ->
    /// version) and restore (version -> live).
    async fn freeze_children(
        &mut self,
        source_id: &NodeId,
        dest_id: &NodeId,
    ) -> Result<(), SessionError> {
        let mut queue: VecDeque<(NodeId, NodeId)> = VecDeque::new();
        for child in self.children_ids(source_id).await? {
            queue.push_back((child, dest_id.clone()));
        }
        while let Some((source_child, parent)) = queue.pop_front() {
            let original = self.require(&source_child).await?;
            let grandchildren = if original.is_proxy() {
                Vec::new()
            } else {
                self.children_ids(&source_child).await?
            };

            let mut copy = original.clone();
            copy.id = NodeId::new();
            copy.parent_id = Some(parent.clone());
            copy.lock = None;
            copy.is_checked_in = false;
            copy.base_version_id = None;
            copy.version = None;

            self.context.insert_created(copy.clone());
            self.context.pin(&parent);
            self.context.add_child_id(&parent, &copy);
            self.tracker.note_created(copy.id.clone(), parent);
            for grandchild in grandchildren {
                queue.push_back((grandchild, copy.id.clone()));
            }
        }
        Ok(())
    }

    async fn thaw_children(
        &mut self,
        version_id: &NodeId,
        live_id: &NodeId,
    ) -> Result<(), SessionError> {
        self.freeze_children(version_id, live_id).await?;
        self.tracker.note_parent_touched(live_id.clone());
        Ok(())
    }

    /// Removes a version directly, keeping the series flags consistent.
    pub async fn remove_version(&mut self, version_id: &NodeId) -> Result<(), SessionError> {
        let version = self.require(version_id).await?;
        let Some(info) = version.version.clone() else {
            return Err(ValidationError::NotAVersionOf {
                version_id: version_id.clone(),
                node_id: version.id,
            }
            .into());
        };
        // Subtree removal; versions are parentless so the generic guard
        // against removing the root does not apply here.
        let mut order = Vec::new();
        let mut stack = vec![version_id.clone()];
        while let Some(current) = stack.pop() {
            order.push(current.clone());
            stack.extend(self.children_ids(&current).await?);
        }
        order.reverse();
        for removed_id in &order {
            if self.tracker.is_created(removed_id) {
                if let Some(pinned) = self.tracker.forget_created(removed_id) {
                    self.context.unpin(&pinned);
                }
                self.context.mark_deleted(removed_id);
            } else {
                self.load(removed_id).await?;
                if self.context.mark_deleted(removed_id) {
                    self.tracker.note_removed(removed_id.clone());
                }
            }
            self.context.drop_child_list(removed_id);
        }
        self.recompute_version_series(&info.series_id).await?;
        Ok(())
    }

    /// Whether a node is a version with at least one live proxy on it.
    pub async fn has_proxy_on(&mut self, version_id: &NodeId) -> Result<bool, SessionError> {
        let version = self.require(version_id).await?;
        let proxies = self.get_proxies(&version.version_series_id()).await?;
        Ok(proxies.iter().any(|p| {
            p.proxy
                .as_ref()
                .map(|info| &info.target_id == version_id)
                .unwrap_or(false)
        }))
    }
}
