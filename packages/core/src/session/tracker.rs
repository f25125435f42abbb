//! Write Tracker
//!
//! Records what a session has done since its last save, in the shape the
//! flush needs it:
//!
//! - created ids in creation order, so rows referenced by later rows land
//!   first in the batch
//! - a pinned-parent map, so the parent a created node pins follows it when
//!   the node moves before the first save
//! - modified ids, removed ids in children-first order, and the parent ids
//!   whose child lists changed (the invalidation fan-out)

use crate::models::NodeId;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
pub(crate) struct WriteTracker {
    created: Vec<NodeId>,
    /// Created node -> the parent it currently pins.
    pinned_parents: HashMap<NodeId, NodeId>,
    modified: BTreeSet<NodeId>,
    /// Children-first removal order, with the soft/hard split decided at
    /// flush time by configuration.
    removed: Vec<NodeId>,
    touched_parents: BTreeSet<NodeId>,
}

impl WriteTracker {
    pub fn new() -> Self {
        WriteTracker::default()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn note_created(&mut self, id: NodeId, pinned_parent: NodeId) {
        self.created.push(id.clone());
        self.pinned_parents.insert(id, pinned_parent);
    }

    pub fn note_modified(&mut self, id: NodeId) {
        self.modified.insert(id);
    }

    pub fn note_removed(&mut self, id: NodeId) {
        self.modified.remove(&id);
        self.removed.push(id);
    }

    pub fn note_parent_touched(&mut self, id: NodeId) {
        self.touched_parents.insert(id);
    }

    /// Drops a created node that was removed before ever being saved.
    /// Returns the parent it was pinning, so the caller can unpin it.
    pub fn forget_created(&mut self, id: &NodeId) -> Option<NodeId> {
        self.created.retain(|c| c != id);
        self.modified.remove(id);
        self.pinned_parents.remove(id)
    }

    pub fn is_created(&self, id: &NodeId) -> bool {
        self.pinned_parents.contains_key(id)
    }

    /// Moves the pin of a created node to its new parent. Returns the
    /// previously pinned parent, if the node was created in this session.
    pub fn repin(&mut self, id: &NodeId, new_parent: NodeId) -> Option<NodeId> {
        self.pinned_parents.insert(id.clone(), new_parent)
    }

    pub fn created_ids(&self) -> &[NodeId] {
        &self.created
    }

    pub fn modified_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.modified.iter()
    }

    pub fn removed_ids(&self) -> &[NodeId] {
        &self.removed
    }

    pub fn touched_parent_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.touched_parents.iter()
    }

    /// Parents still pinned by uncommitted created nodes.
    pub fn pinned_parent_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.pinned_parents.values()
    }

    pub fn clear(&mut self) {
        self.created.clear();
        self.pinned_parents.clear();
        self.modified.clear();
        self.removed.clear();
        self.touched_parents.clear();
    }
}
