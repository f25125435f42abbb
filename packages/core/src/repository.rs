//! Repository
//!
//! The shared root object of one repository instance: the backing store, the
//! schema registry, the invalidation bus between local sessions, the
//! optional cluster poll state, and the commit event channel. Sessions are
//! opened from here and share everything through it.
//!
//! # Examples
//!
//! ```no_run
//! use canopy_core::{Repository, RepositoryConfig, SchemaRegistry};
//! use canopy_core::models::{FieldDef, FieldKind, NodeId, PropertyValue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let schemas = SchemaRegistry::builder()
//!     .schema("dublincore", [("title", FieldDef::scalar(FieldKind::String))])
//!     .document_type("note", ["dublincore"])
//!     .build();
//! let repo = Repository::open_local(
//!     "data/canopy.db".into(),
//!     schemas,
//!     RepositoryConfig::default(),
//! )
//! .await?;
//!
//! let mut session = repo.open_session();
//! let doc = session.add_child(&NodeId::root(), "readme", "note").await?;
//! session
//!     .set_property(&doc.id, "dublincore:title", PropertyValue::string("Readme"))
//!     .await?;
//! session.save().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RepositoryConfig;
use crate::db::{NodeStore, SqliteStore, WriteBatch};
use crate::events::{RepositoryEvent, EVENT_CHANNEL_CAPACITY};
use crate::models::{Node, NodeId, SchemaRegistry};
use crate::session::{ClusterState, InvalidationBus, Session, SessionError, SessionPool};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Shared state of one repository instance.
///
/// One process may hold several `Repository` values over the same backing
/// store; with cluster configuration they behave like cluster nodes and keep
/// each other's caches coherent through the durable invalidation queue.
pub struct Repository {
    pub(crate) store: Arc<dyn NodeStore>,
    pub(crate) schemas: Arc<SchemaRegistry>,
    pub(crate) config: RepositoryConfig,
    pub(crate) bus: InvalidationBus,
    pub(crate) cluster: Option<ClusterState>,
    pub(crate) events: broadcast::Sender<RepositoryEvent>,
    next_session_id: AtomicU64,
}

impl Repository {
    /// Builds a repository over an existing store, creating the root node if
    /// the store is empty.
    pub async fn new(
        store: Arc<dyn NodeStore>,
        schemas: SchemaRegistry,
        config: RepositoryConfig,
    ) -> Result<Arc<Self>, SessionError> {
        if store.read_node(&NodeId::root()).await?.is_none() {
            let mut root = Node::new(None, "", "root", None);
            root.id = NodeId::root();
            store
                .write_batch(WriteBatch {
                    creates: vec![root],
                    ..Default::default()
                })
                .await?;
            info!("initialized repository root");
        }

        let cluster = match &config.cluster {
            Some(cluster_config) => {
                // A joining node starts at the current queue head; history
                // before that was never in its caches.
                let start_seq = store.latest_invalidation_seq().await?;
                Some(ClusterState::new(
                    cluster_config.node_id.clone(),
                    Duration::from_millis(cluster_config.delay_ms),
                    start_seq,
                ))
            }
            None => None,
        };

        Ok(Arc::new(Repository {
            store,
            schemas: Arc::new(schemas),
            config,
            bus: InvalidationBus::new(),
            cluster,
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            next_session_id: AtomicU64::new(1),
        }))
    }

    /// Opens (or creates) an embedded repository at a local path.
    pub async fn open_local(
        db_path: PathBuf,
        schemas: SchemaRegistry,
        config: RepositoryConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let store = SqliteStore::new(db_path).await?;
        Repository::new(Arc::new(store), schemas, config).await
    }

    /// Opens a new session. Sessions are single-owner and cheap; open one
    /// per unit of work or use [`Repository::pool`].
    pub fn open_session(self: &Arc<Self>) -> Session {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        Session::new(Arc::clone(self), id)
    }

    /// Builds a bounded session pool per the repository's pool config.
    pub fn pool(self: &Arc<Self>) -> SessionPool {
        SessionPool::new(Arc::clone(self), &self.config.pool)
    }

    /// Subscribes to commit events.
    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Runs one purge pass over soft-deleted rows, honoring the configured
    /// batch size and minimum tombstone age. Returns the purged row count.
    pub async fn purge_soft_deleted(&self) -> Result<usize, SessionError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.purge_min_age_secs as i64);
        let purged = self
            .store
            .purge_soft_deleted(self.config.purge_batch_size, Some(cutoff))
            .await?;
        if purged > 0 {
            info!(purged, "purged soft-deleted rows");
        }
        Ok(purged)
    }

    /// All binary digests any persisted node still references. Input for
    /// the binary store's mark-and-sweep collector.
    pub async fn referenced_binaries(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.store.read_binary_digests().await?)
    }
}
