//! SQLite Store (libsql)
//!
//! Durable `NodeStore` implementation on libsql/SQLite.
//!
//! # Persisted layout
//!
//! - `nodes`: one row per node - identity, hierarchy position, primary type,
//!   simple properties as a JSON column, lock, version and proxy reference
//!   columns, soft-delete marker + timestamp
//! - `node_collections`: collection properties, one row per element, keyed
//!   (node id, property, position)
//! - `node_acls`: ACL rows keyed (node id, position)
//! - `invalidations`: append-only cluster invalidation queue keyed by a
//!   monotonic sequence number
//!
//! WAL mode and a busy timeout are enabled so concurrent sessions wait and
//! retry instead of failing immediately with `SQLITE_BUSY`.

use crate::db::error::DatabaseError;
use crate::db::node_store::{InvalidationRecord, NodeStore, WriteBatch};
use crate::models::{
    AclEntry, LockInfo, Node, NodeId, PropertyValue, ProxyInfo, ScalarValue, VersionInfo,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params_from_iter, Builder, Connection, Database, Row, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const NODE_COLUMNS: &str = "id, parent_id, name, pos, primary_type, properties, \
     lock_owner, lock_created, is_checked_in, base_version_id, \
     version_series_id, version_label, version_description, version_created, \
     version_is_major, is_latest_version, is_latest_major_version, \
     proxy_target_id, proxy_series_id, deleted, deleted_at";

/// Durable backing store on an embedded libsql database.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    db_path: PathBuf,
    /// Set for `:memory:` databases, which are private to one connection.
    shared_conn: Option<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the parent directory cannot be created, the
    /// connection fails, or schema initialization fails.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;
        let db = Arc::new(db);
        // A `:memory:` database exists only within the connection that
        // created it, so every operation must run on one shared connection.
        let shared_conn = if db_path.to_str() == Some(":memory:") {
            Some(db.connect().map_err(DatabaseError::LibsqlError)?)
        } else {
            None
        };
        let store = SqliteStore {
            db,
            db_path,
            shared_conn,
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Opens an in-memory database, mainly for tests.
    pub async fn new_in_memory() -> Result<Self, DatabaseError> {
        SqliteStore::new(PathBuf::from(":memory:")).await
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// PRAGMA statements return rows, so they go through query() not execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn connection(&self) -> Result<Connection, DatabaseError> {
        if let Some(conn) = &self.shared_conn {
            return Ok(conn.clone());
        }
        let conn = self.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000")
            .await?;
        Ok(conn)
    }

    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connection().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                name TEXT NOT NULL,
                pos INTEGER,
                primary_type TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                lock_owner TEXT,
                lock_created TEXT,
                is_checked_in INTEGER NOT NULL DEFAULT 0,
                base_version_id TEXT,
                version_series_id TEXT,
                version_label TEXT,
                version_description TEXT,
                version_created TEXT,
                version_is_major INTEGER NOT NULL DEFAULT 0,
                is_latest_version INTEGER NOT NULL DEFAULT 0,
                is_latest_major_version INTEGER NOT NULL DEFAULT 0,
                proxy_target_id TEXT,
                proxy_series_id TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at TEXT
            )",
            (),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to create nodes table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_collections (
                node_id TEXT NOT NULL,
                prop TEXT NOT NULL,
                pos INTEGER NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (node_id, prop, pos)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create node_collections table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS node_acls (
                node_id TEXT NOT NULL,
                pos INTEGER NOT NULL,
                ace_name TEXT NOT NULL,
                ace_grant INTEGER NOT NULL,
                permission TEXT NOT NULL,
                user_name TEXT,
                group_name TEXT,
                PRIMARY KEY (node_id, pos)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create node_acls table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS invalidations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                origin TEXT NOT NULL,
                modified TEXT NOT NULL,
                parents TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create invalidations table: {}", e))
        })?;

        for (name, sql) in [
            (
                "idx_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id)",
            ),
            (
                "idx_nodes_version_series",
                "CREATE INDEX IF NOT EXISTS idx_nodes_version_series ON nodes(version_series_id)",
            ),
            (
                "idx_nodes_proxy_series",
                "CREATE INDEX IF NOT EXISTS idx_nodes_proxy_series ON nodes(proxy_series_id)",
            ),
            (
                "idx_nodes_deleted",
                "CREATE INDEX IF NOT EXISTS idx_nodes_deleted ON nodes(deleted, deleted_at)",
            ),
        ] {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    fn text_value(value: Option<&str>) -> Value {
        match value {
            Some(s) => Value::Text(s.to_string()),
            None => Value::Null,
        }
    }

    fn datetime_value(value: Option<&DateTime<Utc>>) -> Value {
        match value {
            Some(dt) => Value::Text(dt.to_rfc3339()),
            None => Value::Null,
        }
    }

    fn parse_datetime(id: &NodeId, raw: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        match raw {
            Some(s) => {
                let dt = DateTime::parse_from_rfc3339(&s).map_err(|e| {
                    DatabaseError::corrupt_row(id.as_str(), format!("bad datetime '{}': {}", s, e))
                })?;
                Ok(Some(dt.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    /// Splits a node's properties into the simple JSON column payload and the
    /// collection rows.
    fn split_properties(node: &Node) -> (BTreeMap<String, ScalarValue>, Vec<(String, Vec<ScalarValue>)>) {
        let mut simple = BTreeMap::new();
        let mut collections = Vec::new();
        for (path, value) in &node.properties {
            match value {
                PropertyValue::Scalar(s) => {
                    simple.insert(path.clone(), s.clone());
                }
                PropertyValue::Array(items) => {
                    collections.push((path.clone(), items.clone()));
                }
            }
        }
        (simple, collections)
    }

    async fn write_node_row(&self, conn: &Connection, node: &Node) -> Result<(), DatabaseError> {
        let (simple, collections) = Self::split_properties(node);
        let properties_json = serde_json::to_string(&simple).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to encode properties: {}", e))
        })?;

        let version = node.version.as_ref();
        let proxy = node.proxy.as_ref();
        let params: Vec<Value> = vec![
            Value::Text(node.id.to_string()),
            Self::text_value(node.parent_id.as_ref().map(NodeId::as_str)),
            Value::Text(node.name.clone()),
            match node.pos {
                Some(p) => Value::Integer(p),
                None => Value::Null,
            },
            Value::Text(node.primary_type.clone()),
            Value::Text(properties_json),
            Self::text_value(node.lock.as_ref().map(|l| l.owner.as_str())),
            Self::datetime_value(node.lock.as_ref().map(|l| &l.created)),
            Value::Integer(node.is_checked_in as i64),
            Self::text_value(node.base_version_id.as_ref().map(NodeId::as_str)),
            Self::text_value(version.map(|v| v.series_id.as_str())),
            Self::text_value(version.map(|v| v.label.as_str())),
            Self::text_value(version.and_then(|v| v.description.as_deref())),
            Self::datetime_value(version.map(|v| &v.created)),
            Value::Integer(version.map(|v| v.major as i64).unwrap_or(0)),
            Value::Integer(version.map(|v| v.is_latest as i64).unwrap_or(0)),
            Value::Integer(version.map(|v| v.is_latest_major as i64).unwrap_or(0)),
            Self::text_value(proxy.map(|p| p.target_id.as_str())),
            Self::text_value(proxy.map(|p| p.series_id.as_str())),
            Value::Integer(node.deleted as i64),
            Self::datetime_value(node.deleted_at.as_ref()),
        ];

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO nodes ({}) VALUES \
                 (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                NODE_COLUMNS
            ),
            params_from_iter(params),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to write node row: {}", e)))?;

        // Dependent rows are rewritten wholesale; the batch already went
        // through value-level diffing in the session layer.
        conn.execute(
            "DELETE FROM node_collections WHERE node_id = ?",
            [node.id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to clear collections: {}", e)))?;
        for (prop, items) in collections {
            for (pos, item) in items.iter().enumerate() {
                let value_json = serde_json::to_string(item).map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to encode collection item: {}", e))
                })?;
                conn.execute(
                    "INSERT INTO node_collections (node_id, prop, pos, value) VALUES (?, ?, ?, ?)",
                    (node.id.to_string(), prop.clone(), pos as i64, value_json),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to write collection row: {}", e))
                })?;
            }
        }

        conn.execute(
            "DELETE FROM node_acls WHERE node_id = ?",
            [node.id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to clear acls: {}", e)))?;
        for ace in &node.acl {
            let params: Vec<Value> = vec![
                Value::Text(node.id.to_string()),
                Value::Integer(ace.pos),
                Value::Text(ace.name.clone()),
                Value::Integer(ace.grant as i64),
                Value::Text(ace.permission.clone()),
                Self::text_value(ace.user.as_deref()),
                Self::text_value(ace.group.as_deref()),
            ];
            conn.execute(
                "INSERT INTO node_acls (node_id, pos, ace_name, ace_grant, permission, user_name, group_name) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params_from_iter(params),
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to write acl row: {}", e)))?;
        }

        Ok(())
    }

    async fn delete_node_rows(&self, conn: &Connection, id: &NodeId) -> Result<(), DatabaseError> {
        for sql in [
            "DELETE FROM node_collections WHERE node_id = ?",
            "DELETE FROM node_acls WHERE node_id = ?",
            "DELETE FROM nodes WHERE id = ?",
        ] {
            conn.execute(sql, [id.to_string()]).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete node rows: {}", e))
            })?;
        }
        Ok(())
    }

    /// Decodes the fixed `NODE_COLUMNS` projection into a `Node`, without its
    /// dependent collection/ACL rows.
    fn node_from_row(row: &Row) -> Result<Node, DatabaseError> {
        let id_raw: String = row
            .get(0)
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to get id: {}", e)))?;
        let id = NodeId::from(id_raw);
        let get_err = |col: &str, e: libsql::Error| {
            DatabaseError::corrupt_row(id.as_str(), format!("column {}: {}", col, e))
        };

        let parent_id: Option<String> = row.get(1).map_err(|e| get_err("parent_id", e))?;
        let name: String = row.get(2).map_err(|e| get_err("name", e))?;
        let pos: Option<i64> = row.get(3).map_err(|e| get_err("pos", e))?;
        let primary_type: String = row.get(4).map_err(|e| get_err("primary_type", e))?;
        let properties_json: String = row.get(5).map_err(|e| get_err("properties", e))?;
        let lock_owner: Option<String> = row.get(6).map_err(|e| get_err("lock_owner", e))?;
        let lock_created: Option<String> = row.get(7).map_err(|e| get_err("lock_created", e))?;
        let is_checked_in: i64 = row.get(8).map_err(|e| get_err("is_checked_in", e))?;
        let base_version_id: Option<String> =
            row.get(9).map_err(|e| get_err("base_version_id", e))?;
        let version_series_id: Option<String> =
            row.get(10).map_err(|e| get_err("version_series_id", e))?;
        let version_label: Option<String> =
            row.get(11).map_err(|e| get_err("version_label", e))?;
        let version_description: Option<String> =
            row.get(12).map_err(|e| get_err("version_description", e))?;
        let version_created: Option<String> =
            row.get(13).map_err(|e| get_err("version_created", e))?;
        let version_is_major: i64 = row.get(14).map_err(|e| get_err("version_is_major", e))?;
        let is_latest_version: i64 = row.get(15).map_err(|e| get_err("is_latest_version", e))?;
        let is_latest_major_version: i64 = row
            .get(16)
            .map_err(|e| get_err("is_latest_major_version", e))?;
        let proxy_target_id: Option<String> =
            row.get(17).map_err(|e| get_err("proxy_target_id", e))?;
        let proxy_series_id: Option<String> =
            row.get(18).map_err(|e| get_err("proxy_series_id", e))?;
        let deleted: i64 = row.get(19).map_err(|e| get_err("deleted", e))?;
        let deleted_at: Option<String> = row.get(20).map_err(|e| get_err("deleted_at", e))?;

        let simple: BTreeMap<String, ScalarValue> =
            serde_json::from_str(&properties_json).map_err(|e| {
                DatabaseError::corrupt_row(id.as_str(), format!("bad properties JSON: {}", e))
            })?;
        let properties: BTreeMap<String, PropertyValue> = simple
            .into_iter()
            .map(|(k, v)| (k, PropertyValue::Scalar(v)))
            .collect();

        let lock = match (lock_owner, lock_created) {
            (Some(owner), created) => Some(LockInfo {
                owner,
                created: Self::parse_datetime(&id, created)?.unwrap_or_else(Utc::now),
            }),
            (None, _) => None,
        };

        let version = match version_series_id {
            Some(series) => Some(VersionInfo {
                series_id: NodeId::from(series),
                label: version_label.unwrap_or_default(),
                description: version_description,
                created: Self::parse_datetime(&id, version_created)?.unwrap_or_else(Utc::now),
                major: version_is_major != 0,
                is_latest: is_latest_version != 0,
                is_latest_major: is_latest_major_version != 0,
            }),
            None => None,
        };

        let proxy = match (proxy_target_id, proxy_series_id) {
            (Some(target), Some(series)) => Some(ProxyInfo {
                target_id: NodeId::from(target),
                series_id: NodeId::from(series),
            }),
            _ => None,
        };

        let deleted_at = Self::parse_datetime(&id, deleted_at)?;

        Ok(Node {
            id,
            parent_id: parent_id.map(NodeId::from),
            name,
            primary_type,
            pos,
            properties,
            acl: Vec::new(),
            lock,
            is_checked_in: is_checked_in != 0,
            base_version_id: base_version_id.map(NodeId::from),
            version,
            proxy,
            deleted: deleted != 0,
            deleted_at,
        })
    }

    /// Loads the dependent collection and ACL rows of a node.
    async fn hydrate_node(&self, conn: &Connection, node: &mut Node) -> Result<(), DatabaseError> {
        let mut rows = conn
            .query(
                "SELECT prop, pos, value FROM node_collections WHERE node_id = ? ORDER BY prop, pos",
                [node.id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to read collections: {}", e)))?;
        let mut collections: BTreeMap<String, Vec<ScalarValue>> = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let prop: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("collection prop: {}", e)))?;
            let value_json: String = row
                .get(2)
                .map_err(|e| DatabaseError::sql_execution(format!("collection value: {}", e)))?;
            let value: ScalarValue = serde_json::from_str(&value_json).map_err(|e| {
                DatabaseError::corrupt_row(node.id.as_str(), format!("bad collection item: {}", e))
            })?;
            collections.entry(prop).or_default().push(value);
        }
        for (prop, items) in collections {
            node.properties.insert(prop, PropertyValue::Array(items));
        }

        let mut rows = conn
            .query(
                "SELECT pos, ace_name, ace_grant, permission, user_name, group_name \
                 FROM node_acls WHERE node_id = ? ORDER BY pos",
                [node.id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to read acls: {}", e)))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let pos: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("acl pos: {}", e)))?;
            let name: String = row
                .get(1)
                .map_err(|e| DatabaseError::sql_execution(format!("acl name: {}", e)))?;
            let grant: i64 = row
                .get(2)
                .map_err(|e| DatabaseError::sql_execution(format!("acl grant: {}", e)))?;
            let permission: String = row
                .get(3)
                .map_err(|e| DatabaseError::sql_execution(format!("acl permission: {}", e)))?;
            let user: Option<String> = row
                .get(4)
                .map_err(|e| DatabaseError::sql_execution(format!("acl user: {}", e)))?;
            let group: Option<String> = row
                .get(5)
                .map_err(|e| DatabaseError::sql_execution(format!("acl group: {}", e)))?;
            node.acl.push(AclEntry {
                pos,
                name,
                grant: grant != 0,
                permission,
                user,
                group,
            });
        }
        Ok(())
    }

    async fn query_nodes(
        &self,
        conn: &Connection,
        where_clause: &str,
        param: &NodeId,
    ) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!("SELECT {} FROM nodes WHERE {}", NODE_COLUMNS, where_clause);
        let mut rows = conn
            .query(&sql, [param.to_string()])
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to query nodes: {}", e)))?;
        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let mut node = Self::node_from_row(&row)?;
            self.hydrate_node(conn, &mut node).await?;
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[async_trait]
impl NodeStore for SqliteStore {
    async fn read_node(&self, id: &NodeId) -> Result<Option<Node>, DatabaseError> {
        let conn = self.connection().await?;
        let nodes = self.query_nodes(&conn, "id = ?", id).await?;
        Ok(nodes.into_iter().next())
    }

    async fn read_children(&self, parent_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let conn = self.connection().await?;
        self.query_nodes(
            &conn,
            "parent_id = ? AND deleted = 0 ORDER BY pos, id",
            parent_id,
        )
        .await
    }

    async fn read_versions(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let conn = self.connection().await?;
        self.query_nodes(
            &conn,
            "version_series_id = ? AND deleted = 0 ORDER BY version_created, id",
            series_id,
        )
        .await
    }

    async fn read_proxies(&self, series_id: &NodeId) -> Result<Vec<Node>, DatabaseError> {
        let conn = self.connection().await?;
        self.query_nodes(
            &conn,
            "proxy_series_id = ? AND deleted = 0 ORDER BY pos, id",
            series_id,
        )
        .await
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<(), DatabaseError> {
        let conn = self.connection().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to begin batch: {}", e)))?;

        let result: Result<(), DatabaseError> = async {
            for node in &batch.creates {
                self.write_node_row(&conn, node).await?;
            }
            for node in &batch.updates {
                self.write_node_row(&conn, node).await?;
            }
            for (id, at) in &batch.soft_deletes {
                conn.execute(
                    "UPDATE nodes SET deleted = 1, deleted_at = ? WHERE id = ?",
                    (at.to_rfc3339(), id.to_string()),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to soft-delete node: {}", e))
                })?;
            }
            for id in &batch.deletes {
                self.delete_node_rows(&conn, id).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await.map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to commit batch: {}", e))
                })?;
                Ok(())
            }
            Err(err) => {
                // Roll back best-effort; the original error is the one that matters.
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn append_invalidations(
        &self,
        origin: &str,
        modified: &[NodeId],
        parents: &[NodeId],
    ) -> Result<i64, DatabaseError> {
        let conn = self.connection().await?;
        let modified_json = serde_json::to_string(modified).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to encode invalidation ids: {}", e))
        })?;
        let parents_json = serde_json::to_string(parents).map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to encode invalidation parents: {}", e))
        })?;
        conn.execute(
            "INSERT INTO invalidations (origin, modified, parents) VALUES (?, ?, ?)",
            (origin, modified_json, parents_json),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to append invalidation: {}", e))
        })?;
        Ok(conn.last_insert_rowid())
    }

    async fn poll_invalidations_since(
        &self,
        since: i64,
    ) -> Result<Vec<InvalidationRecord>, DatabaseError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(
                "SELECT seq, origin, modified, parents FROM invalidations \
                 WHERE seq > ? ORDER BY seq",
                [since],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to poll invalidations: {}", e))
            })?;
        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let seq: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("invalidation seq: {}", e)))?;
            let origin: String = row
                .get(1)
                .map_err(|e| DatabaseError::sql_execution(format!("invalidation origin: {}", e)))?;
            let modified_json: String = row
                .get(2)
                .map_err(|e| DatabaseError::sql_execution(format!("invalidation ids: {}", e)))?;
            let parents_json: String = row
                .get(3)
                .map_err(|e| DatabaseError::sql_execution(format!("invalidation parents: {}", e)))?;
            let modified: Vec<NodeId> = serde_json::from_str(&modified_json).map_err(|e| {
                DatabaseError::sql_execution(format!("Bad invalidation id list: {}", e))
            })?;
            let parents: Vec<NodeId> = serde_json::from_str(&parents_json).map_err(|e| {
                DatabaseError::sql_execution(format!("Bad invalidation parent list: {}", e))
            })?;
            records.push(InvalidationRecord {
                seq,
                origin,
                modified,
                parents,
            });
        }
        Ok(records)
    }

    async fn latest_invalidation_seq(&self) -> Result<i64, DatabaseError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT COALESCE(MAX(seq), 0) FROM invalidations", ())
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to read queue head: {}", e))
            })?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            Some(row) => row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("queue head: {}", e))),
            None => Ok(0),
        }
    }

    async fn purge_soft_deleted(
        &self,
        max_count: Option<usize>,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<usize, DatabaseError> {
        let conn = self.connection().await?;
        let limit = max_count.map(|m| m as i64).unwrap_or(-1);
        let cutoff_text = cutoff
            .map(|c| c.to_rfc3339())
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let mut rows = conn
            .query(
                "SELECT id FROM nodes WHERE deleted = 1 \
                 AND (deleted_at IS NULL OR deleted_at <= ?) \
                 ORDER BY deleted_at, id LIMIT ?",
                (cutoff_text, limit),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to select purge candidates: {}", e))
            })?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("purge id: {}", e)))?;
            ids.push(NodeId::from(id));
        }
        for id in &ids {
            self.delete_node_rows(&conn, id).await?;
        }
        Ok(ids.len())
    }

    async fn read_binary_digests(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.connection().await?;
        let mut digests = Vec::new();

        let mut rows = conn
            .query("SELECT id, properties FROM nodes", ())
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to scan nodes: {}", e)))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("scan id: {}", e)))?;
            let properties_json: String = row
                .get(1)
                .map_err(|e| DatabaseError::sql_execution(format!("scan properties: {}", e)))?;
            let simple: BTreeMap<String, ScalarValue> = serde_json::from_str(&properties_json)
                .map_err(|e| DatabaseError::corrupt_row(id, format!("bad properties JSON: {}", e)))?;
            for value in simple.values() {
                if let ScalarValue::Binary(b) = value {
                    digests.push(b.digest.clone());
                }
            }
        }

        let mut rows = conn
            .query("SELECT value FROM node_collections", ())
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to scan collections: {}", e))
            })?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to fetch row: {}", e)))?
        {
            let value_json: String = row
                .get(0)
                .map_err(|e| DatabaseError::sql_execution(format!("scan value: {}", e)))?;
            if let Ok(ScalarValue::Binary(b)) = serde_json::from_str::<ScalarValue>(&value_json) {
                digests.push(b.digest);
            }
        }

        digests.sort();
        digests.dedup();
        Ok(digests)
    }
}
