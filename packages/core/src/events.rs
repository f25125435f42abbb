//! Repository Events
//!
//! Domain events emitted after a session commit. They follow the observer
//! pattern: interested parties (indexers, audit log, UI bridges) subscribe to
//! a repository-wide broadcast channel without coupling to the session layer.
//!
//! # Event Flow
//!
//! 1. A session flushes its pending work in `save()`
//! 2. One `DocumentsChanged` event is broadcast for the whole commit
//! 3. All subscribers receive the event asynchronously; a lagging or absent
//!    subscriber never blocks or fails the commit

use crate::models::NodeId;

/// Capacity of the repository event channel.
///
/// A subscriber that falls further behind than this misses events (tokio
/// broadcast semantics) and should resynchronize from the store.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Domain events emitted by the repository.
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    /// A session commit landed. Carries the ids touched by the commit,
    /// grouped by the kind of change.
    DocumentsChanged {
        created: Vec<NodeId>,
        modified: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
}

impl RepositoryEvent {
    /// String tag used for logging and debugging.
    pub fn event_type(&self) -> &str {
        match self {
            RepositoryEvent::DocumentsChanged { .. } => "documents:changed",
        }
    }

    /// Total number of ids carried by the event.
    pub fn change_count(&self) -> usize {
        match self {
            RepositoryEvent::DocumentsChanged {
                created,
                modified,
                removed,
            } => created.len() + modified.len() + removed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_count_sums_all_groups() {
        let event = RepositoryEvent::DocumentsChanged {
            created: vec![NodeId::new()],
            modified: vec![NodeId::new(), NodeId::new()],
            removed: vec![],
        };
        assert_eq!(event.event_type(), "documents:changed");
        assert_eq!(event.change_count(), 3);
    }
}
