//! In-process engine backed by adjacency maps.
//!
//! The reference implementation for contract semantics: fastest, simplest,
//! and used by the test suite to validate the other engines' behavioral
//! equivalence. No persistence across process restarts.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::backend::{EdgeIter, GraphBackend, NodeIter, Teardown};
use crate::config::{EndpointPolicy, GraphOptions};
use crate::errors::GraphStoreError;
use crate::types::{EdgeKey, Metadata, NodeId};

#[derive(Default)]
struct MemoryState {
    nodes: AHashMap<NodeId, Metadata>,
    edges: AHashMap<EdgeKey, Metadata>,
    outgoing: AHashMap<NodeId, AHashSet<NodeId>>,
    incoming: AHashMap<NodeId, AHashSet<NodeId>>,
}

pub struct MemoryBackend {
    options: GraphOptions,
    inner: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new(options: GraphOptions) -> Self {
        Self {
            options,
            inner: RwLock::new(MemoryState::default()),
        }
    }

    fn canonical(&self, u: NodeId, v: NodeId) -> EdgeKey {
        EdgeKey::canonical(u, v, self.options.directed)
    }
}

impl MemoryState {
    /// Adjacency list for undirected graphs is kept symmetric in `outgoing`;
    /// `incoming` is only maintained for directed graphs.
    fn link(&mut self, key: &EdgeKey, directed: bool) {
        self.outgoing
            .entry(key.source.clone())
            .or_default()
            .insert(key.target.clone());
        if directed {
            self.incoming
                .entry(key.target.clone())
                .or_default()
                .insert(key.source.clone());
        } else {
            self.outgoing
                .entry(key.target.clone())
                .or_default()
                .insert(key.source.clone());
        }
    }

    fn unlink(&mut self, key: &EdgeKey, directed: bool) {
        if let Some(set) = self.outgoing.get_mut(&key.source) {
            set.remove(&key.target);
        }
        if directed {
            if let Some(set) = self.incoming.get_mut(&key.target) {
                set.remove(&key.source);
            }
        } else if let Some(set) = self.outgoing.get_mut(&key.target) {
            set.remove(&key.source);
        }
    }
}

impl GraphBackend for MemoryBackend {
    fn is_directed(&self) -> bool {
        self.options.directed
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        let mut state = self.inner.write();
        if !self.options.upsert && state.nodes.contains_key(&id) {
            return Err(GraphStoreError::already_exists(format!("node {id}")));
        }
        state.nodes.insert(id.clone(), metadata);
        Ok(id)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        self.inner
            .read()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| GraphStoreError::not_found(format!("node {id}")))
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        Ok(self.inner.read().nodes.contains_key(id))
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        let mut state = self.inner.write();
        if state.nodes.remove(id).is_none() {
            return Err(GraphStoreError::not_found(format!("node {id}")));
        }
        let incident: Vec<EdgeKey> = state
            .edges
            .keys()
            .filter(|key| key.source == *id || key.target == *id)
            .cloned()
            .collect();
        tracing::debug!(node = %id, edges = incident.len(), "removing node and incident edges");
        for key in incident {
            state.edges.remove(&key);
            state.unlink(&key, self.options.directed);
        }
        state.outgoing.remove(id);
        state.incoming.remove(id);
        Ok(())
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        let snapshot: Vec<(NodeId, Option<Metadata>)> = self
            .inner
            .read()
            .nodes
            .iter()
            .map(|(id, metadata)| {
                (
                    id.clone(),
                    include_metadata.then(|| metadata.clone()),
                )
            })
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn add_edge(
        &self,
        u: NodeId,
        v: NodeId,
        metadata: Metadata,
    ) -> Result<EdgeKey, GraphStoreError> {
        let key = self.canonical(u, v);
        let mut state = self.inner.write();
        for endpoint in [&key.source, &key.target] {
            if !state.nodes.contains_key(endpoint) {
                match self.options.missing_endpoints {
                    EndpointPolicy::CreateEmpty => {
                        state.nodes.insert(endpoint.clone(), Metadata::new());
                    }
                    EndpointPolicy::Reject => {
                        return Err(GraphStoreError::invalid_endpoint(format!(
                            "node {endpoint} does not exist"
                        )));
                    }
                }
            }
        }
        if !self.options.upsert && state.edges.contains_key(&key) {
            return Err(GraphStoreError::already_exists(format!("edge {key}")));
        }
        state.link(&key, self.options.directed);
        state.edges.insert(key.clone(), metadata);
        Ok(key)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        self.inner
            .read()
            .edges
            .get(&key)
            .cloned()
            .ok_or_else(|| GraphStoreError::not_found(format!("edge {key}")))
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        let key = self.canonical(u.clone(), v.clone());
        let mut state = self.inner.write();
        if state.edges.remove(&key).is_none() {
            return Err(GraphStoreError::not_found(format!("edge {key}")));
        }
        state.unlink(&key, self.options.directed);
        Ok(())
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        let snapshot: Vec<(NodeId, NodeId, Option<Metadata>)> = self
            .inner
            .read()
            .edges
            .iter()
            .map(|(key, metadata)| {
                (
                    key.source.clone(),
                    key.target.clone(),
                    include_metadata.then(|| metadata.clone()),
                )
            })
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        let state = self.inner.read();
        if !state.nodes.contains_key(u) {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        Ok(state
            .outgoing
            .get(u)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        let state = self.inner.read();
        if !state.nodes.contains_key(u) {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        let adjacency = if self.options.directed {
            state.incoming.get(u)
        } else {
            state.outgoing.get(u)
        };
        Ok(adjacency
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        Ok(self.inner.read().nodes.len())
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        Ok(self.inner.read().edges.len())
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        let state = self.inner.read();
        if !state.nodes.contains_key(u) {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        Ok(state.outgoing.get(u).map(|set| set.len()).unwrap_or(0))
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        let state = self.inner.read();
        if !state.nodes.contains_key(u) {
            return Err(GraphStoreError::not_found(format!("node {u}")));
        }
        let adjacency = if self.options.directed {
            state.incoming.get(u)
        } else {
            state.outgoing.get(u)
        };
        Ok(adjacency.map(|set| set.len()).unwrap_or(0))
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        if confirm != Teardown::YesIAmSure {
            return Err(GraphStoreError::TeardownNotConfirmed);
        }
        let mut state = self.inner.write();
        tracing::debug!(nodes = state.nodes.len(), "tearing down memory backend");
        *state = MemoryState::default();
        Ok(())
    }
}
