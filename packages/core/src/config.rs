//! Repository Configuration
//!
//! Tunables for caches, session pooling, soft-delete cleanup and cluster
//! invalidation. Everything has a sensible default; `RepositoryConfig` is
//! serde-friendly so hosts can load it from their own config files.

use serde::{Deserialize, Serialize};

/// Session pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Idle sessions kept warm for reuse.
    pub min_idle: usize,
    /// Hard cap on concurrently checked-out sessions.
    pub max_sessions: usize,
    /// How long `acquire()` waits for a free slot before failing (ms).
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_sessions: 16,
            acquire_timeout_ms: 60_000,
        }
    }
}

/// Cluster invalidation settings. Absent means single-node: the durable
/// queue is never written or polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Identity of this cluster node; own queue records are skipped on poll.
    pub node_id: String,
    /// Minimum interval between queue polls (ms). Zero polls on every save.
    pub delay_ms: u64,
}

/// Repository-wide tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryConfig {
    /// Pristine-cache entries kept per session before soft eviction.
    pub cache_capacity: usize,
    /// Remove operations mark rows deleted instead of dropping them; a
    /// background purge reclaims them later.
    pub soft_delete: bool,
    /// Row bound for one purge pass (None purges everything eligible).
    pub purge_batch_size: Option<usize>,
    /// Age in seconds a tombstone must reach before it is purgeable.
    pub purge_min_age_secs: u64,
    pub pool: PoolConfig,
    pub cluster: Option<ClusterConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            soft_delete: false,
            purge_batch_size: Some(1000),
            purge_min_age_secs: 0,
            pool: PoolConfig::default(),
            cluster: None,
        }
    }
}

impl RepositoryConfig {
    /// Single-node config with soft delete enabled.
    pub fn with_soft_delete() -> Self {
        Self {
            soft_delete: true,
            ..Self::default()
        }
    }

    /// Config for one node of a cluster sharing a backing store.
    pub fn clustered(node_id: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            cluster: Some(ClusterConfig {
                node_id: node_id.into(),
                delay_ms,
            }),
            ..Self::default()
        }
    }
}
