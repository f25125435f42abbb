//! Session Error Types
//!
//! One error enum for the session surface. Structural validation, property
//! schema and store errors keep their own types and convert in via `#[from]`,
//! so callers can still match on the precise failure.

use crate::db::DatabaseError;
use crate::models::{NodeId, PropertyError, ValidationError};
use thiserror::Error;

/// Errors surfaced by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// The node does not exist (or is deleted) in this session's view.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// A path segment did not resolve during path lookup.
    #[error("No node at path: {0}")]
    PathNotFound(String),

    /// The repository root cannot be moved, renamed or removed.
    #[error("The repository root cannot be {0}")]
    RootOperation(&'static str),

    /// Structural validation failed (naming, hierarchy, versioning state).
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Property path or value did not match the document type's schemas.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Backing store failure, propagated unchanged.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// No pooled session became available within the acquire timeout.
    #[error("Timed out waiting for a pooled session")]
    PoolTimeout,

    /// The pool was shut down while waiting.
    #[error("Session pool is closed")]
    PoolClosed,
}
