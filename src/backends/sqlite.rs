//! Relational engine mapping the graph onto a SQLite table pair.
//!
//! Nodes live in a table keyed by the node storage key; edges live in a table
//! whose primary key is the compound `(source, target)` pair, so existence
//! checks and fetch-by-endpoints resolve in one indexed lookup. Table and
//! source/target column names are configurable to interoperate with
//! externally-defined schemas. Metadata round-trips as a JSON text blob.

use std::collections::VecDeque;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::backend::{EdgeIter, GraphBackend, NodeIter, Teardown};
use crate::config::{EndpointPolicy, GraphOptions, SqliteTables};
use crate::errors::GraphStoreError;
use crate::types::{EdgeKey, Metadata, NodeId};

/// Rows fetched per round trip during enumeration.
const PAGE_SIZE: usize = 256;

pub struct SqliteBackend {
    conn: Connection,
    options: GraphOptions,
    tables: SqliteTables,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: GraphOptions,
        tables: SqliteTables,
    ) -> Result<Self, GraphStoreError> {
        let conn = Connection::open(&path).map_err(|e| GraphStoreError::storage(e.to_string()))?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite backend");
        Self::from_connection(conn, options, tables)
    }

    pub fn open_in_memory(
        options: GraphOptions,
        tables: SqliteTables,
    ) -> Result<Self, GraphStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| GraphStoreError::storage(e.to_string()))?;
        Self::from_connection(conn, options, tables)
    }

    fn from_connection(
        conn: Connection,
        options: GraphOptions,
        tables: SqliteTables,
    ) -> Result<Self, GraphStoreError> {
        for identifier in [
            &tables.node_table,
            &tables.edge_table,
            &tables.source_column,
            &tables.target_column,
        ] {
            validate_identifier(identifier)?;
        }
        let backend = Self {
            conn,
            options,
            tables,
        };
        backend.ensure_schema()?;
        Ok(backend)
    }

    fn ensure_schema(&self) -> Result<(), GraphStoreError> {
        let t = &self.tables;
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {node} (
                    id       TEXT PRIMARY KEY,
                    metadata TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS {edge} (
                    {src}    TEXT NOT NULL,
                    {tgt}    TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    PRIMARY KEY ({src}, {tgt})
                );
                CREATE INDEX IF NOT EXISTS idx_{edge}_{tgt} ON {edge}({tgt});",
                node = t.node_table,
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            ))
            .map_err(|e| GraphStoreError::storage(e.to_string()))
    }

    fn canonical(&self, u: NodeId, v: NodeId) -> EdgeKey {
        EdgeKey::canonical(u, v, self.options.directed)
    }

    fn node_exists(&self, key: &str) -> Result<bool, GraphStoreError> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id=?1", self.tables.node_table),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        Ok(exists.is_some())
    }

    /// Upsert the node row; `INSERT OR IGNORE` when only the row's existence
    /// matters (endpoint auto-creation must not clobber metadata).
    fn upsert_node_row(
        &self,
        conn: &Connection,
        key: &str,
        metadata: &Metadata,
        keep_existing: bool,
    ) -> Result<(), GraphStoreError> {
        let sql = if keep_existing {
            format!(
                "INSERT OR IGNORE INTO {}(id, metadata) VALUES(?1, ?2)",
                self.tables.node_table
            )
        } else {
            format!(
                "INSERT INTO {}(id, metadata) VALUES(?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET metadata=excluded.metadata",
                self.tables.node_table
            )
        };
        conn.execute(&sql, params![key, encode_metadata(metadata)?])
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        Ok(())
    }

    fn resolve_endpoint(&self, conn: &Connection, id: &NodeId) -> Result<(), GraphStoreError> {
        if self.node_exists(&id.storage_key())? {
            return Ok(());
        }
        match self.options.missing_endpoints {
            EndpointPolicy::CreateEmpty => {
                self.upsert_node_row(conn, &id.storage_key(), &Metadata::new(), true)
            }
            EndpointPolicy::Reject => Err(GraphStoreError::invalid_endpoint(format!(
                "node {id} does not exist"
            ))),
        }
    }

    fn count(&self, sql: &str, bind: &[&str]) -> Result<usize, GraphStoreError> {
        let count: i64 = self
            .conn
            .query_row(sql, rusqlite::params_from_iter(bind.iter()), |row| {
                row.get(0)
            })
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        Ok(count as usize)
    }

    fn require_node(&self, u: &NodeId) -> Result<String, GraphStoreError> {
        let key = u.storage_key();
        if !self.node_exists(&key)? {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        Ok(key)
    }

    fn fetch_node_page(
        &self,
        after: Option<&str>,
        include_metadata: bool,
    ) -> Result<Vec<(NodeId, Option<Metadata>)>, GraphStoreError> {
        let sql = match after {
            Some(_) => format!(
                "SELECT id, metadata FROM {} WHERE id > ?1 ORDER BY id LIMIT {PAGE_SIZE}",
                self.tables.node_table
            ),
            None => format!(
                "SELECT id, metadata FROM {} ORDER BY id LIMIT {PAGE_SIZE}",
                self.tables.node_table
            ),
        };
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let rows = match after {
            Some(last) => stmt.query_map(params![last], map_row),
            None => stmt.query_map([], map_row),
        }
        .map_err(|e| GraphStoreError::storage(e.to_string()))?;

        let mut page = Vec::new();
        for row in rows {
            let (key, blob) = row.map_err(|e| GraphStoreError::storage(e.to_string()))?;
            let id = NodeId::from_storage_key(&key)?;
            let metadata = if include_metadata {
                Some(decode_metadata(&blob)?)
            } else {
                None
            };
            page.push((id, metadata));
        }
        Ok(page)
    }

    fn fetch_edge_page(
        &self,
        after: Option<&(String, String)>,
        include_metadata: bool,
    ) -> Result<Vec<(NodeId, NodeId, Option<Metadata>)>, GraphStoreError> {
        let t = &self.tables;
        let sql = match after {
            Some(_) => format!(
                "SELECT {src}, {tgt}, metadata FROM {edge}
                 WHERE ({src} > ?1 OR ({src} = ?1 AND {tgt} > ?2))
                 ORDER BY {src}, {tgt} LIMIT {PAGE_SIZE}",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            ),
            None => format!(
                "SELECT {src}, {tgt}, metadata FROM {edge} ORDER BY {src}, {tgt} LIMIT {PAGE_SIZE}",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            ),
        };
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String)> {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        };
        let rows = match after {
            Some((src, tgt)) => stmt.query_map(params![src, tgt], map_row),
            None => stmt.query_map([], map_row),
        }
        .map_err(|e| GraphStoreError::storage(e.to_string()))?;

        let mut page = Vec::new();
        for row in rows {
            let (src, tgt, blob) = row.map_err(|e| GraphStoreError::storage(e.to_string()))?;
            let metadata = if include_metadata {
                Some(decode_metadata(&blob)?)
            } else {
                None
            };
            page.push((
                NodeId::from_storage_key(&src)?,
                NodeId::from_storage_key(&tgt)?,
                metadata,
            ));
        }
        Ok(page)
    }
}

impl GraphBackend for SqliteBackend {
    fn is_directed(&self) -> bool {
        self.options.directed
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        let key = id.storage_key();
        if !self.options.upsert && self.node_exists(&key)? {
            return Err(GraphStoreError::already_exists(format!("node {id}")));
        }
        self.upsert_node_row(&self.conn, &key, &metadata, false)?;
        Ok(id)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        let blob: String = self
            .conn
            .query_row(
                &format!(
                    "SELECT metadata FROM {} WHERE id=?1",
                    self.tables.node_table
                ),
                params![id.storage_key()],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    GraphStoreError::not_found(format!("node {id}"))
                }
                other => GraphStoreError::storage(other.to_string()),
            })?;
        decode_metadata(&blob)
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        self.node_exists(&id.storage_key())
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        let t = &self.tables;
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        let affected = tx
            .execute(
                &format!("DELETE FROM {} WHERE id=?1", t.node_table),
                params![id.storage_key()],
            )
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(GraphStoreError::not_found(format!("node {id}")));
        }
        let removed_edges = tx
            .execute(
                &format!(
                    "DELETE FROM {edge} WHERE {src}=?1 OR {tgt}=?1",
                    edge = t.edge_table,
                    src = t.source_column,
                    tgt = t.target_column,
                ),
                params![id.storage_key()],
            )
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        tracing::debug!(node = %id, edges = removed_edges, "removed node and incident edges");
        tx.commit()
            .map_err(|e| GraphStoreError::storage(e.to_string()))
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        Ok(Box::new(SqliteNodeIter {
            backend: self,
            include_metadata,
            last_key: None,
            buffer: VecDeque::new(),
            done: false,
        }))
    }

    fn add_edge(
        &self,
        u: NodeId,
        v: NodeId,
        metadata: Metadata,
    ) -> Result<EdgeKey, GraphStoreError> {
        let key = self.canonical(u, v);
        let t = &self.tables;
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        self.resolve_endpoint(&tx, &key.source)?;
        self.resolve_endpoint(&tx, &key.target)?;
        if !self.options.upsert && self.has_edge(&key.source, &key.target)? {
            return Err(GraphStoreError::already_exists(format!("edge {key}")));
        }
        tx.execute(
            &format!(
                "INSERT INTO {edge}({src}, {tgt}, metadata) VALUES(?1, ?2, ?3)
                 ON CONFLICT({src}, {tgt}) DO UPDATE SET metadata=excluded.metadata",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            ),
            params![
                key.source.storage_key(),
                key.target.storage_key(),
                encode_metadata(&metadata)?
            ],
        )
        .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        tx.commit()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        Ok(key)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        let t = &self.tables;
        let blob: String = self
            .conn
            .query_row(
                &format!(
                    "SELECT metadata FROM {edge} WHERE {src}=?1 AND {tgt}=?2",
                    edge = t.edge_table,
                    src = t.source_column,
                    tgt = t.target_column,
                ),
                params![key.source.storage_key(), key.target.storage_key()],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    GraphStoreError::not_found(format!("edge {key}"))
                }
                other => GraphStoreError::storage(other.to_string()),
            })?;
        decode_metadata(&blob)
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        let t = &self.tables;
        let affected = self
            .conn
            .execute(
                &format!(
                    "DELETE FROM {edge} WHERE {src}=?1 AND {tgt}=?2",
                    edge = t.edge_table,
                    src = t.source_column,
                    tgt = t.target_column,
                ),
                params![key.source.storage_key(), key.target.storage_key()],
            )
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        if affected == 0 {
            return Err(GraphStoreError::not_found(format!("edge {key}")));
        }
        Ok(())
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        Ok(Box::new(SqliteEdgeIter {
            backend: self,
            include_metadata,
            last_key: None,
            buffer: VecDeque::new(),
            done: false,
        }))
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        let key = self.require_node(u)?;
        let t = &self.tables;
        let sql = if self.options.directed {
            format!(
                "SELECT {tgt} FROM {edge} WHERE {src}=?1 ORDER BY {tgt}",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            )
        } else {
            format!(
                "SELECT CASE WHEN {src}=?1 THEN {tgt} ELSE {src} END
                 FROM {edge} WHERE {src}=?1 OR {tgt}=?1",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            )
        };
        collect_ids(&self.conn, &sql, &key)
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        if !self.options.directed {
            return self.neighbors(u);
        }
        let key = self.require_node(u)?;
        let t = &self.tables;
        let sql = format!(
            "SELECT {src} FROM {edge} WHERE {tgt}=?1 ORDER BY {src}",
            edge = t.edge_table,
            src = t.source_column,
            tgt = t.target_column,
        );
        collect_ids(&self.conn, &sql, &key)
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        self.count(
            &format!("SELECT COUNT(*) FROM {}", self.tables.node_table),
            &[],
        )
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        self.count(
            &format!("SELECT COUNT(*) FROM {}", self.tables.edge_table),
            &[],
        )
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        let key = self.require_node(u)?;
        let t = &self.tables;
        let sql = if self.options.directed {
            format!(
                "SELECT COUNT(*) FROM {edge} WHERE {src}=?1",
                edge = t.edge_table,
                src = t.source_column,
            )
        } else {
            format!(
                "SELECT COUNT(*) FROM {edge} WHERE {src}=?1 OR {tgt}=?1",
                edge = t.edge_table,
                src = t.source_column,
                tgt = t.target_column,
            )
        };
        self.count(&sql, &[&key])
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        if !self.options.directed {
            return self.out_degree(u);
        }
        let key = self.require_node(u)?;
        let t = &self.tables;
        self.count(
            &format!(
                "SELECT COUNT(*) FROM {edge} WHERE {tgt}=?1",
                edge = t.edge_table,
                tgt = t.target_column,
            ),
            &[&key],
        )
    }

    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        tracing::debug!(count = nodes.len(), "batch node ingest");
        for (id, metadata) in &nodes {
            if !self.options.upsert && self.node_exists(&id.storage_key())? {
                return Err(GraphStoreError::already_exists(format!("node {id}")));
            }
            self.upsert_node_row(&tx, &id.storage_key(), metadata, false)?;
        }
        tx.commit()
            .map_err(|e| GraphStoreError::storage(e.to_string()))
    }

    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        let t = &self.tables;
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        tracing::debug!(count = edges.len(), "batch edge ingest");
        let sql = format!(
            "INSERT INTO {edge}({src}, {tgt}, metadata) VALUES(?1, ?2, ?3)
             ON CONFLICT({src}, {tgt}) DO UPDATE SET metadata=excluded.metadata",
            edge = t.edge_table,
            src = t.source_column,
            tgt = t.target_column,
        );
        for (u, v, metadata) in edges {
            let key = self.canonical(u, v);
            self.resolve_endpoint(&tx, &key.source)?;
            self.resolve_endpoint(&tx, &key.target)?;
            tx.execute(
                &sql,
                params![
                    key.source.storage_key(),
                    key.target.storage_key(),
                    encode_metadata(&metadata)?
                ],
            )
            .map_err(|e| GraphStoreError::storage(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| GraphStoreError::storage(e.to_string()))
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        if confirm != Teardown::YesIAmSure {
            return Err(GraphStoreError::TeardownNotConfirmed);
        }
        let t = &self.tables;
        tracing::debug!(node_table = %t.node_table, edge_table = %t.edge_table, "tearing down sqlite backend");
        self.conn
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS {node}; DROP TABLE IF EXISTS {edge};",
                node = t.node_table,
                edge = t.edge_table,
            ))
            .map_err(|e| GraphStoreError::storage(e.to_string()))
    }
}

struct SqliteNodeIter<'a> {
    backend: &'a SqliteBackend,
    include_metadata: bool,
    last_key: Option<String>,
    buffer: VecDeque<(NodeId, Option<Metadata>)>,
    done: bool,
}

impl Iterator for SqliteNodeIter<'_> {
    type Item = Result<(NodeId, Option<Metadata>), GraphStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            let page = match self
                .backend
                .fetch_node_page(self.last_key.as_deref(), self.include_metadata)
            {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if page.len() < PAGE_SIZE {
                self.done = true;
            }
            if let Some((id, _)) = page.last() {
                self.last_key = Some(id.storage_key());
            }
            self.buffer.extend(page);
        }
        self.buffer.pop_front().map(Ok)
    }
}

struct SqliteEdgeIter<'a> {
    backend: &'a SqliteBackend,
    include_metadata: bool,
    last_key: Option<(String, String)>,
    buffer: VecDeque<(NodeId, NodeId, Option<Metadata>)>,
    done: bool,
}

impl Iterator for SqliteEdgeIter<'_> {
    type Item = Result<(NodeId, NodeId, Option<Metadata>), GraphStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            let page = match self
                .backend
                .fetch_edge_page(self.last_key.as_ref(), self.include_metadata)
            {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if page.len() < PAGE_SIZE {
                self.done = true;
            }
            if let Some((src, tgt, _)) = page.last() {
                self.last_key = Some((src.storage_key(), tgt.storage_key()));
            }
            self.buffer.extend(page);
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn collect_ids(conn: &Connection, sql: &str, key: &str) -> Result<Vec<NodeId>, GraphStoreError> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| GraphStoreError::storage(e.to_string()))?;
    let rows = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))
        .map_err(|e| GraphStoreError::storage(e.to_string()))?;
    let mut ids = Vec::new();
    for row in rows {
        let raw = row.map_err(|e| GraphStoreError::storage(e.to_string()))?;
        ids.push(NodeId::from_storage_key(&raw)?);
    }
    Ok(ids)
}

fn encode_metadata(metadata: &Metadata) -> Result<String, GraphStoreError> {
    serde_json::to_string(metadata).map_err(|e| GraphStoreError::serialization(e.to_string()))
}

fn decode_metadata(blob: &str) -> Result<Metadata, GraphStoreError> {
    serde_json::from_str(blob).map_err(|e| GraphStoreError::serialization(e.to_string()))
}

/// Table and column names are spliced into SQL text, so they are restricted
/// to identifier characters up front.
fn validate_identifier(name: &str) -> Result<(), GraphStoreError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(GraphStoreError::invalid_input(format!(
            "invalid SQL identifier {name:?}"
        )))
    }
}
