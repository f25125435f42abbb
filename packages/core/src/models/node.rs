//! Node Data Structures
//!
//! This module defines the core [`Node`] record and its auxiliary fragments
//! (lock, ACL, version and proxy state) for the Canopy document hierarchy.
//!
//! # Architecture
//!
//! - **Opaque identity**: `NodeId` is assigned once at creation and never
//!   reused; identity survives moves and renames.
//! - **Single record**: one struct carries hierarchy position, typed
//!   properties, ACL, lock and version/proxy fields; the store adapter decides
//!   how to split it across tables.
//! - **Soft delete**: a deleted marker plus timestamp keeps the row
//!   addressable internally while hiding it from traversal, pending batch
//!   cleanup.

use crate::models::property::PropertyValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Properties of a version that stay writable after check-in.
///
/// Everything else on a version is immutable. This is a fixed named set, not
/// a general mutability flag, so the invariant stays auditable.
pub const VERSION_WRITABLE_PROPS: &[&str] = &[
    "lifecycle:state",
    "lifecycle:released",
    "lifecycle:obsoleted",
];

/// Validation errors for structural node operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Primary type is not registered in the schema registry.
    #[error("Unknown document type: {0}")]
    UnknownType(String),

    /// A non-deleted sibling with this name already exists in this session's view.
    #[error("Destination name already exists under {parent_id}: {name}")]
    NameExists { parent_id: NodeId, name: String },

    /// Move or copy would place a node under its own descendant.
    #[error("Cannot {op} {id} under its own descendant {dest}")]
    UnderOwnDescendant {
        op: &'static str,
        id: NodeId,
        dest: NodeId,
    },

    /// Write to a version outside the writable allow-list.
    #[error("Version {id} is immutable: property {path} is not writable")]
    VersionImmutable { id: NodeId, path: String },

    /// Check-in attempted on a node that cannot be versioned.
    #[error("Node {0} is not versionable")]
    NotVersionable(NodeId),

    /// Check-in attempted while already checked in.
    #[error("Node {0} is already checked in")]
    AlreadyCheckedIn(NodeId),

    /// Check-out attempted while not checked in.
    #[error("Node {0} is already checked out")]
    AlreadyCheckedOut(NodeId),

    /// Restore attempted with a version from another series.
    #[error("Node {version_id} is not a version of {node_id}")]
    NotAVersionOf { version_id: NodeId, node_id: NodeId },
}

/// Opaque, immutable node identity.
///
/// Assigned once at creation (UUIDv4), never reused. The repository root uses
/// the fixed nil id so every cluster node agrees on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Generates a fresh id.
    pub fn new() -> Self {
        NodeId(Uuid::new_v4().to_string())
    }

    /// The fixed id of the repository root.
    pub fn root() -> Self {
        NodeId(Uuid::nil().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(value.to_string())
    }
}

/// A lock held on a node: owner plus creation time, or absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub owner: String,
    pub created: DateTime<Utc>,
}

/// One row of a node's access-control list.
///
/// Rows are ordered; `pos` is the row position within the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclEntry {
    pub pos: i64,
    pub name: String,
    pub grant: bool,
    pub permission: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// Version fragment carried by version nodes only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The versionable series this version belongs to (the live node's id).
    pub series_id: NodeId,
    pub label: String,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    /// Whether this is a major version; drives `is_latest_major`.
    pub major: bool,
    /// Recomputed across the series on check-in and version removal.
    pub is_latest: bool,
    pub is_latest_major: bool,
}

/// Proxy fragment carried by proxy nodes only.
///
/// A proxy has a normal hierarchy position but resolves its content through
/// the target; it never owns content itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyInfo {
    /// The live node or version the proxy resolves to.
    pub target_id: NodeId,
    /// The versionable series key used for proxy lookups.
    pub series_id: NodeId,
}

/// A single addressable entity in the document hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// `None` for the root and for versions (placeless nodes).
    pub parent_id: Option<NodeId>,
    pub name: String,
    /// Fixes the schema; validated against the registry at creation.
    pub primary_type: String,
    /// Sibling position; `None` when unordered.
    pub pos: Option<i64>,
    /// Simple and collection properties keyed by `schema:field` path.
    pub properties: BTreeMap<String, PropertyValue>,
    pub acl: Vec<AclEntry>,
    pub lock: Option<LockInfo>,
    /// True once a version exists for this live node; does not freeze it.
    pub is_checked_in: bool,
    pub base_version_id: Option<NodeId>,
    /// Present on version nodes only.
    pub version: Option<VersionInfo>,
    /// Present on proxy nodes only.
    pub proxy: Option<ProxyInfo>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Creates a new live node with a fresh id and empty state.
    pub fn new(
        parent_id: Option<NodeId>,
        name: impl Into<String>,
        primary_type: impl Into<String>,
        pos: Option<i64>,
    ) -> Self {
        Node {
            id: NodeId::new(),
            parent_id,
            name: name.into(),
            primary_type: primary_type.into(),
            pos,
            properties: BTreeMap::new(),
            acl: Vec::new(),
            lock: None,
            is_checked_in: false,
            base_version_id: None,
            version: None,
            proxy: None,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn is_version(&self) -> bool {
        self.version.is_some()
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// The versionable-series key this node belongs to.
    ///
    /// A live document is its own series; versions and proxies carry the
    /// series of the live node they derive from.
    pub fn version_series_id(&self) -> NodeId {
        if let Some(proxy) = &self.proxy {
            proxy.series_id.clone()
        } else if let Some(version) = &self.version {
            version.series_id.clone()
        } else {
            self.id.clone()
        }
    }

    /// Whether a property path stays writable on this node.
    ///
    /// Live nodes are fully writable (check-in does not freeze them);
    /// versions accept only [`VERSION_WRITABLE_PROPS`].
    pub fn is_property_writable(&self, path: &str) -> bool {
        !self.is_version() || VERSION_WRITABLE_PROPS.contains(&path)
    }

    /// All binary digests referenced by this node's properties.
    pub fn binary_digests(&self) -> Vec<String> {
        self.properties
            .values()
            .flat_map(|v| v.binary_refs())
            .map(|b| b.digest.clone())
            .collect()
    }
}
