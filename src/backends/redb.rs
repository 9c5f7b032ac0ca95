//! Key-value engine backed by redb.
//!
//! Each node is one item in the `graph_nodes` table keyed by the node storage
//! key; each edge is one item in `graph_edges` keyed by the `(source, target)`
//! tuple. The tuple key gives both a direct point lookup (exact pair) and a
//! source-prefix range scan (all edges leaving a node); in-edges fall back to
//! a filtered scan of the edge table. Enumeration pages through the store with
//! a continuation key per physical fetch, presenting one logical iterator.

use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;

use ::redb::{Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::backend::{EdgeIter, GraphBackend, NodeIter, Teardown};
use crate::config::{EndpointPolicy, GraphOptions};
use crate::errors::GraphStoreError;
use crate::types::{EdgeKey, Metadata, NodeId};

/// Node storage key -> JSON metadata blob.
const NODES: TableDefinition<&str, &str> = TableDefinition::new("graph_nodes");

/// (source key, target key) -> JSON metadata blob.
const EDGES: TableDefinition<(&str, &str), &str> = TableDefinition::new("graph_edges");

const DEFAULT_PAGE_SIZE: usize = 256;

pub struct RedbBackend {
    db: Database,
    options: GraphOptions,
    page_size: usize,
}

impl RedbBackend {
    pub fn open<P: AsRef<Path>>(path: P, options: GraphOptions) -> Result<Self, GraphStoreError> {
        let db = Database::create(&path).map_err(storage_err)?;
        tracing::debug!(path = %path.as_ref().display(), "opened redb backend");
        let backend = Self {
            db,
            options,
            page_size: DEFAULT_PAGE_SIZE,
        };
        // Materialize both tables so read paths never race table creation.
        let txn = backend.db.begin_write().map_err(storage_err)?;
        txn.open_table(NODES).map_err(storage_err)?;
        txn.open_table(EDGES).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(backend)
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
    }

    fn canonical(&self, u: NodeId, v: NodeId) -> EdgeKey {
        EdgeKey::canonical(u, v, self.options.directed)
    }

    fn read_txn(&self) -> Result<ReadTransaction, GraphStoreError> {
        self.db.begin_read().map_err(storage_err)
    }

    fn node_item(&self, key: &str) -> Result<Option<Metadata>, GraphStoreError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(NODES).map_err(storage_err)?;
        match table.get(key).map_err(storage_err)? {
            Some(guard) => Ok(Some(decode_metadata(guard.value())?)),
            None => Ok(None),
        }
    }

    fn require_node(&self, u: &NodeId) -> Result<String, GraphStoreError> {
        let key = u.storage_key();
        if self.node_item(&key)?.is_none() {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        Ok(key)
    }

    fn incident_pairs(&self, key: &str) -> Result<Vec<(String, String)>, GraphStoreError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(EDGES).map_err(storage_err)?;
        scan_incident(&table, key)
    }

    fn fetch_node_page(
        &self,
        after: Option<&str>,
        include_metadata: bool,
    ) -> Result<Vec<(NodeId, Option<Metadata>)>, GraphStoreError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(NODES).map_err(storage_err)?;
        let range = match after {
            Some(last) => table.range::<&str>((Bound::Excluded(last), Bound::Unbounded)),
            None => table.range::<&str>(..),
        }
        .map_err(storage_err)?;
        let mut page = Vec::new();
        for entry in range.take(self.page_size) {
            let (k, v) = entry.map_err(storage_err)?;
            let id = NodeId::from_storage_key(k.value())?;
            let metadata = if include_metadata {
                Some(decode_metadata(v.value())?)
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
        let txn = self.read_txn()?;
        let table = txn.open_table(EDGES).map_err(storage_err)?;
        let range = match after {
            Some((src, tgt)) => table.range((
                Bound::Excluded((src.as_str(), tgt.as_str())),
                Bound::Unbounded,
            )),
            None => table.range::<(&str, &str)>(..),
        }
        .map_err(storage_err)?;
        let mut page = Vec::new();
        for entry in range.take(self.page_size) {
            let (k, v) = entry.map_err(storage_err)?;
            let (src, tgt) = k.value();
            let metadata = if include_metadata {
                Some(decode_metadata(v.value())?)
            } else {
                None
            };
            page.push((
                NodeId::from_storage_key(src)?,
                NodeId::from_storage_key(tgt)?,
                metadata,
            ));
        }
        Ok(page)
    }
}

impl GraphBackend for RedbBackend {
    fn is_directed(&self) -> bool {
        self.options.directed
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        let key = id.storage_key();
        let blob = encode_metadata(&metadata)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(NODES).map_err(storage_err)?;
            // Existence check inside the write txn, so two racing no-upsert
            // adds cannot both succeed.
            if !self.options.upsert && table.get(key.as_str()).map_err(storage_err)?.is_some() {
                return Err(GraphStoreError::already_exists(format!("node {id}")));
            }
            table.insert(key.as_str(), blob.as_str()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(id)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        self.node_item(&id.storage_key())?
            .ok_or_else(|| GraphStoreError::not_found(format!("node {id}")))
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        Ok(self.node_item(&id.storage_key())?.is_some())
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        let key = id.storage_key();
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            if nodes.remove(key.as_str()).map_err(storage_err)?.is_none() {
                return Err(GraphStoreError::not_found(format!("node {id}")));
            }
            // Incident edges are scanned inside this write txn; a concurrent
            // add_edge either commits before it (and is cascaded here) or
            // serializes after it and re-resolves its endpoints.
            let mut edges = txn.open_table(EDGES).map_err(storage_err)?;
            let incident = scan_incident(&edges, &key)?;
            tracing::debug!(node = %id, edges = incident.len(), "removing node and incident edges");
            for (src, tgt) in &incident {
                edges
                    .remove((src.as_str(), tgt.as_str()))
                    .map_err(storage_err)?;
            }
        }
        txn.commit().map_err(storage_err)
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        Ok(Box::new(RedbNodeIter {
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
        let source_key = key.source.storage_key();
        let target_key = key.target.storage_key();
        let blob = encode_metadata(&metadata)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            for (endpoint, endpoint_key) in
                [(&key.source, &source_key), (&key.target, &target_key)]
            {
                if nodes.get(endpoint_key.as_str()).map_err(storage_err)?.is_none() {
                    match self.options.missing_endpoints {
                        EndpointPolicy::CreateEmpty => {
                            nodes
                                .insert(endpoint_key.as_str(), "{}")
                                .map_err(storage_err)?;
                        }
                        EndpointPolicy::Reject => {
                            return Err(GraphStoreError::invalid_endpoint(format!(
                                "node {endpoint} does not exist"
                            )));
                        }
                    }
                }
            }
            let mut edges = txn.open_table(EDGES).map_err(storage_err)?;
            if !self.options.upsert
                && edges
                    .get((source_key.as_str(), target_key.as_str()))
                    .map_err(storage_err)?
                    .is_some()
            {
                return Err(GraphStoreError::already_exists(format!("edge {key}")));
            }
            edges
                .insert((source_key.as_str(), target_key.as_str()), blob.as_str())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(key)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        let txn = self.read_txn()?;
        let table = txn.open_table(EDGES).map_err(storage_err)?;
        match table
            .get((
                key.source.storage_key().as_str(),
                key.target.storage_key().as_str(),
            ))
            .map_err(storage_err)?
        {
            Some(guard) => decode_metadata(guard.value()),
            None => Err(GraphStoreError::not_found(format!("edge {key}"))),
        }
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut edges = txn.open_table(EDGES).map_err(storage_err)?;
            if edges
                .remove((
                    key.source.storage_key().as_str(),
                    key.target.storage_key().as_str(),
                ))
                .map_err(storage_err)?
                .is_none()
            {
                return Err(GraphStoreError::not_found(format!("edge {key}")));
            }
        }
        txn.commit().map_err(storage_err)
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        Ok(Box::new(RedbEdgeIter {
            backend: self,
            include_metadata,
            last_key: None,
            buffer: VecDeque::new(),
            done: false,
        }))
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        let key = self.require_node(u)?;
        let mut ids = Vec::new();
        if self.options.directed {
            let txn = self.read_txn()?;
            let table = txn.open_table(EDGES).map_err(storage_err)?;
            for entry in table.range((key.as_str(), "")..).map_err(storage_err)? {
                let (k, _) = entry.map_err(storage_err)?;
                let (src, tgt) = k.value();
                if src != key {
                    break;
                }
                ids.push(NodeId::from_storage_key(tgt)?);
            }
        } else {
            for (src, tgt) in self.incident_pairs(&key)? {
                let other = if src == key { tgt } else { src };
                ids.push(NodeId::from_storage_key(&other)?);
            }
        }
        Ok(ids)
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        if !self.options.directed {
            return self.neighbors(u);
        }
        let key = self.require_node(u)?;
        let txn = self.read_txn()?;
        let table = txn.open_table(EDGES).map_err(storage_err)?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (k, _) = entry.map_err(storage_err)?;
            let (src, tgt) = k.value();
            if tgt == key {
                ids.push(NodeId::from_storage_key(src)?);
            }
        }
        Ok(ids)
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(NODES).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        let txn = self.read_txn()?;
        let table = txn.open_table(EDGES).map_err(storage_err)?;
        Ok(table.len().map_err(storage_err)? as usize)
    }

    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        tracing::debug!(count = nodes.len(), "batch node ingest");
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = txn.open_table(NODES).map_err(storage_err)?;
            for (id, metadata) in &nodes {
                let key = id.storage_key();
                if !self.options.upsert && table.get(key.as_str()).map_err(storage_err)?.is_some()
                {
                    return Err(GraphStoreError::already_exists(format!("node {id}")));
                }
                let blob = encode_metadata(metadata)?;
                table.insert(key.as_str(), blob.as_str()).map_err(storage_err)?;
            }
        }
        txn.commit().map_err(storage_err)
    }

    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        tracing::debug!(count = edges.len(), "batch edge ingest");
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut node_table = txn.open_table(NODES).map_err(storage_err)?;
            let mut edge_table = txn.open_table(EDGES).map_err(storage_err)?;
            for (u, v, metadata) in edges {
                let key = self.canonical(u, v);
                let source_key = key.source.storage_key();
                let target_key = key.target.storage_key();
                for (endpoint, endpoint_key) in
                    [(&key.source, &source_key), (&key.target, &target_key)]
                {
                    if node_table
                        .get(endpoint_key.as_str())
                        .map_err(storage_err)?
                        .is_none()
                    {
                        match self.options.missing_endpoints {
                            EndpointPolicy::CreateEmpty => {
                                node_table
                                    .insert(endpoint_key.as_str(), "{}")
                                    .map_err(storage_err)?;
                            }
                            EndpointPolicy::Reject => {
                                return Err(GraphStoreError::invalid_endpoint(format!(
                                    "node {endpoint} does not exist"
                                )));
                            }
                        }
                    }
                }
                let blob = encode_metadata(&metadata)?;
                edge_table
                    .insert((source_key.as_str(), target_key.as_str()), blob.as_str())
                    .map_err(storage_err)?;
            }
        }
        txn.commit().map_err(storage_err)
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        if confirm != Teardown::YesIAmSure {
            return Err(GraphStoreError::TeardownNotConfirmed);
        }
        tracing::debug!("tearing down redb backend");
        let txn = self.db.begin_write().map_err(storage_err)?;
        txn.delete_table(NODES).map_err(storage_err)?;
        txn.delete_table(EDGES).map_err(storage_err)?;
        txn.commit().map_err(storage_err)
    }
}

struct RedbNodeIter<'a> {
    backend: &'a RedbBackend,
    include_metadata: bool,
    last_key: Option<String>,
    buffer: VecDeque<(NodeId, Option<Metadata>)>,
    done: bool,
}

impl Iterator for RedbNodeIter<'_> {
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
            if page.len() < self.backend.page_size {
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

struct RedbEdgeIter<'a> {
    backend: &'a RedbBackend,
    include_metadata: bool,
    last_key: Option<(String, String)>,
    buffer: VecDeque<(NodeId, NodeId, Option<Metadata>)>,
    done: bool,
}

impl Iterator for RedbEdgeIter<'_> {
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
            if page.len() < self.backend.page_size {
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

/// All edge keys incident to `key`: one range scan for the source prefix,
/// then a filtered pass for rows where `key` is the target. Generic over the
/// table handle so it runs inside either a read or a write transaction.
fn scan_incident<T>(table: &T, key: &str) -> Result<Vec<(String, String)>, GraphStoreError>
where
    T: ReadableTable<(&'static str, &'static str), &'static str>,
{
    let mut pairs = Vec::new();
    for entry in table.range((key, "")..).map_err(storage_err)? {
        let (k, _) = entry.map_err(storage_err)?;
        let (src, tgt) = k.value();
        if src != key {
            break;
        }
        pairs.push((src.to_string(), tgt.to_string()));
    }
    for entry in table.iter().map_err(storage_err)? {
        let (k, _) = entry.map_err(storage_err)?;
        let (src, tgt) = k.value();
        if tgt == key && src != key {
            pairs.push((src.to_string(), tgt.to_string()));
        }
    }
    Ok(pairs)
}

fn storage_err<E: std::fmt::Display>(e: E) -> GraphStoreError {
    GraphStoreError::storage(e.to_string())
}

fn encode_metadata(metadata: &Metadata) -> Result<String, GraphStoreError> {
    serde_json::to_string(metadata).map_err(|e| GraphStoreError::serialization(e.to_string()))
}

fn decode_metadata(blob: &str) -> Result<Metadata, GraphStoreError> {
    serde_json::from_str(blob).map_err(|e| GraphStoreError::serialization(e.to_string()))
}
