//! Invalidation Protocol
//!
//! Two tiers keep session caches coherent:
//!
//! - **Local tier**: after a commit, the saving session posts its
//!   invalidations to the inbox of every other session of the same
//!   repository through the [`InvalidationBus`]. Inboxes are drained at the
//!   start of the owner's next `save()`, so a session's view stays stable
//!   between its own transaction boundaries.
//! - **Cluster tier**: the same invalidations are appended to a durable
//!   queue in the backing store. Other repository instances poll the queue,
//!   rate-limited by [`ClusterState`], and fan the remote records into all of
//!   their local inboxes.
//!
//! Invalidations carry ids only, never data; receivers drop cached state and
//! reload lazily.

use crate::models::NodeId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A set of cache invalidations produced by one commit.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Invalidations {
    /// Ids whose cached node state must be dropped.
    pub modified: BTreeSet<NodeId>,
    /// Parent ids whose cached child lists must be dropped.
    pub parents: BTreeSet<NodeId>,
}

impl Invalidations {
    pub fn new() -> Self {
        Invalidations::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.parents.is_empty()
    }

    pub fn add_modified(&mut self, id: NodeId) {
        self.modified.insert(id);
    }

    pub fn add_parent(&mut self, id: NodeId) {
        self.parents.insert(id);
    }

    /// Merges another set into this one.
    pub fn extend(&mut self, other: &Invalidations) {
        self.modified.extend(other.modified.iter().cloned());
        self.parents.extend(other.parents.iter().cloned());
    }

    /// Takes the accumulated content, leaving this set empty.
    pub fn take(&mut self) -> Invalidations {
        std::mem::take(self)
    }
}

/// Fan-out of invalidations between the sessions of one repository.
///
/// Each session registers an inbox at open and drops it at close. Posting is
/// synchronous and cheap (id sets only); draining happens on the receiving
/// session's own schedule.
#[derive(Default)]
pub struct InvalidationBus {
    inboxes: Mutex<HashMap<u64, Arc<Mutex<Invalidations>>>>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        InvalidationBus::default()
    }

    fn inboxes(&self) -> MutexGuard<'_, HashMap<u64, Arc<Mutex<Invalidations>>>> {
        self.inboxes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a session and returns its inbox handle.
    pub fn register(&self, session_id: u64) -> Arc<Mutex<Invalidations>> {
        let inbox = Arc::new(Mutex::new(Invalidations::new()));
        self.inboxes().insert(session_id, Arc::clone(&inbox));
        inbox
    }

    pub fn unregister(&self, session_id: u64) {
        self.inboxes().remove(&session_id);
    }

    /// Posts invalidations to every inbox except the sender's own.
    pub fn post(&self, sender: u64, invalidations: &Invalidations) {
        if invalidations.is_empty() {
            return;
        }
        for (id, inbox) in self.inboxes().iter() {
            if *id != sender {
                inbox
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(invalidations);
            }
        }
    }

    /// Posts remote invalidations to every inbox, the poller's included.
    pub fn post_all(&self, invalidations: &Invalidations) {
        if invalidations.is_empty() {
            return;
        }
        for inbox in self.inboxes().values() {
            inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(invalidations);
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.inboxes().len()
    }
}

struct ClusterWindow {
    /// `None` until the first poll or send, so a fresh node polls at once.
    last_poll: Option<Instant>,
    last_seq: i64,
}

/// Poll state for the cluster tier of one repository instance.
///
/// The window resets when the queue is actually polled and when a save
/// appended records (the saver knows the queue head it just wrote, so it is
/// as fresh as a poll would make it). A save that sends nothing does NOT
/// reset the window; otherwise a busy read-mostly node could stay stale
/// forever.
pub struct ClusterState {
    node_id: String,
    delay: Duration,
    window: Mutex<ClusterWindow>,
}

impl ClusterState {
    pub fn new(node_id: impl Into<String>, delay: Duration, start_seq: i64) -> Self {
        ClusterState {
            node_id: node_id.into(),
            delay,
            window: Mutex::new(ClusterWindow {
                last_poll: None,
                last_seq: start_seq,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn window(&self) -> MutexGuard<'_, ClusterWindow> {
        self.window.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the poll delay has elapsed since the window last reset.
    pub fn should_poll(&self) -> bool {
        self.window()
            .last_poll
            .map_or(true, |at| at.elapsed() >= self.delay)
    }

    /// The queue sequence this node has processed up to.
    pub fn last_seq(&self) -> i64 {
        self.window().last_seq
    }

    /// Records a completed poll up to `seq`.
    pub fn note_polled(&self, seq: i64) {
        let mut window = self.window();
        window.last_poll = Some(Instant::now());
        if seq > window.last_seq {
            window.last_seq = seq;
        }
    }

    /// Records that this node itself appended a queue record.
    ///
    /// Resets the time window only. The cursor must not jump: a foreign
    /// record appended between this node's sends would be skipped forever.
    /// Own records come back on the next poll and are dropped by origin.
    pub fn note_sent(&self, _seq: i64) {
        self.window().last_poll = Some(Instant::now());
    }
}
