//! Transparent caching proxy over any [`GraphBackend`].
//!
//! `CachedBackend` memoizes idempotent read operations keyed by
//! `(operation, normalized arguments)` and re-exposes the full contract, so
//! it is substitutable (and nestable) anywhere a backend is expected. The
//! correctness property is observational transparency: any sequence of
//! operations through the proxy observes exactly the results the wrapped
//! engine would have produced without it.
//!
//! Every operation holds the one internal mutex across lookup, delegation and
//! populate/invalidate, so a concurrent read can never observe a
//! half-invalidated memo table or re-populate a value computed before a write
//! the proxy has already applied. Writes delegate first and invalidate only
//! on success; a failed write leaves the memo table untouched.

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::backend::{EdgeEntry, EdgeIter, GraphBackend, NodeEntry, NodeIter, Teardown};
use crate::errors::GraphStoreError;
use crate::types::{EdgeKey, Metadata, NodeId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    NodeMeta(NodeId),
    HasNode(NodeId),
    EdgeMeta(NodeId, NodeId),
    HasEdge(NodeId, NodeId),
    Neighbors(NodeId),
    Predecessors(NodeId),
    Degree(NodeId),
    InDegree(NodeId),
    OutDegree(NodeId),
    NodeCount,
    EdgeCount,
    AllNodes(bool),
    AllEdges(bool),
}

impl CacheKey {
    fn touches_node(&self, id: &NodeId) -> bool {
        match self {
            CacheKey::NodeMeta(n)
            | CacheKey::HasNode(n)
            | CacheKey::Neighbors(n)
            | CacheKey::Predecessors(n)
            | CacheKey::Degree(n)
            | CacheKey::InDegree(n)
            | CacheKey::OutDegree(n) => n == id,
            CacheKey::EdgeMeta(a, b) | CacheKey::HasEdge(a, b) => a == id || b == id,
            _ => false,
        }
    }

    /// Enumeration and count results can change no matter which entity a
    /// write touched.
    fn is_aggregate(&self) -> bool {
        matches!(
            self,
            CacheKey::NodeCount
                | CacheKey::EdgeCount
                | CacheKey::AllNodes(_)
                | CacheKey::AllEdges(_)
        )
    }
}

#[derive(Clone, Debug)]
enum CacheValue {
    Bool(bool),
    Count(usize),
    Meta(Metadata),
    Ids(Vec<NodeId>),
    Nodes(Vec<NodeEntry>),
    Edges(Vec<EdgeEntry>),
}

/// Per-operation hit/miss counters, as reported by
/// [`CachedBackend::cache_info`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct CacheState {
    memo: AHashMap<CacheKey, CacheValue>,
    stats: AHashMap<&'static str, OpStats>,
}

impl CacheState {
    fn invalidate_node(&mut self, id: &NodeId) {
        self.memo
            .retain(|key, _| !key.touches_node(id) && !key.is_aggregate());
    }

    fn invalidate_edge(&mut self, key: &EdgeKey) {
        self.invalidate_node(&key.source);
        self.invalidate_node(&key.target);
    }
}

/// The memo table is unbounded by default; long-running read-heavy workloads
/// over many distinct ids should set a cap with
/// [`CachedBackend::set_max_entries`].
pub struct CachedBackend<B> {
    inner: B,
    dirty_cache_on_write: bool,
    max_entries: Option<usize>,
    state: Mutex<CacheState>,
}

impl<B: GraphBackend> CachedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self::with_write_invalidation(inner, true)
    }

    /// `dirty_cache_on_write: false` disables write invalidation entirely.
    /// Reads may then serve results from before a write. This is an explicit
    /// opt-in for read-mostly workloads that call
    /// [`CachedBackend::clear_cache`] themselves.
    pub fn with_write_invalidation(inner: B, dirty_cache_on_write: bool) -> Self {
        Self {
            inner,
            dirty_cache_on_write,
            max_entries: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cap the memo table at `cap` entries. A miss that would grow the table
    /// past the cap flushes it first, trading hit rate for bounded memory.
    pub fn set_max_entries(&mut self, cap: usize) {
        self.max_entries = Some(cap.max(1));
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    /// Unconditionally empty the memo table. Hit/miss counters survive.
    pub fn clear_cache(&self) {
        self.state.lock().memo.clear();
    }

    /// Hit/miss counters per read operation name.
    pub fn cache_info(&self) -> AHashMap<&'static str, OpStats> {
        self.state.lock().stats.clone()
    }

    fn memo_edge_key(&self, u: &NodeId, v: &NodeId) -> EdgeKey {
        EdgeKey::canonical(u.clone(), v.clone(), self.inner.is_directed())
    }

    fn lookup<T>(
        &self,
        op: &'static str,
        key: CacheKey,
        fetch: impl FnOnce() -> Result<CacheValue, GraphStoreError>,
        extract: impl Fn(&CacheValue) -> Option<T>,
    ) -> Result<T, GraphStoreError> {
        let mut state = self.state.lock();
        if let Some(value) = state.memo.get(&key) {
            if let Some(out) = extract(value) {
                state.stats.entry(op).or_default().hits += 1;
                return Ok(out);
            }
        }
        let value = fetch()?;
        let out = extract(&value).ok_or_else(|| {
            GraphStoreError::storage(format!("memoized {op} result has unexpected shape"))
        })?;
        state.stats.entry(op).or_default().misses += 1;
        if self
            .max_entries
            .is_some_and(|cap| state.memo.len() >= cap)
        {
            state.memo.clear();
        }
        state.memo.insert(key, value);
        Ok(out)
    }
}

impl<B: GraphBackend> GraphBackend for CachedBackend<B> {
    fn is_directed(&self) -> bool {
        self.inner.is_directed()
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        let mut state = self.state.lock();
        let id = self.inner.add_node(id, metadata)?;
        if self.dirty_cache_on_write {
            state.invalidate_node(&id);
        }
        Ok(id)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        self.lookup(
            "get_node",
            CacheKey::NodeMeta(id.clone()),
            || self.inner.get_node(id).map(CacheValue::Meta),
            |value| match value {
                CacheValue::Meta(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        self.lookup(
            "has_node",
            CacheKey::HasNode(id.clone()),
            || self.inner.has_node(id).map(CacheValue::Bool),
            |value| match value {
                CacheValue::Bool(b) => Some(*b),
                _ => None,
            },
        )
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        let mut state = self.state.lock();
        self.inner.remove_node(id)?;
        // Cascade deletion touches edges whose far endpoints are unknown
        // here, so targeted invalidation would be guesswork.
        if self.dirty_cache_on_write {
            state.memo.clear();
        }
        Ok(())
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        let entries = self.lookup(
            "all_nodes",
            CacheKey::AllNodes(include_metadata),
            || {
                let collected: Result<Vec<NodeEntry>, GraphStoreError> =
                    self.inner.all_nodes(include_metadata)?.collect();
                collected.map(CacheValue::Nodes)
            },
            |value| match value {
                CacheValue::Nodes(entries) => Some(entries.clone()),
                _ => None,
            },
        )?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn add_edge(
        &self,
        u: NodeId,
        v: NodeId,
        metadata: Metadata,
    ) -> Result<EdgeKey, GraphStoreError> {
        let mut state = self.state.lock();
        let key = self.inner.add_edge(u, v, metadata)?;
        if self.dirty_cache_on_write {
            state.invalidate_edge(&key);
        }
        Ok(key)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        let key = self.memo_edge_key(u, v);
        self.lookup(
            "get_edge",
            CacheKey::EdgeMeta(key.source, key.target),
            || self.inner.get_edge(u, v).map(CacheValue::Meta),
            |value| match value {
                CacheValue::Meta(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    fn has_edge(&self, u: &NodeId, v: &NodeId) -> Result<bool, GraphStoreError> {
        let key = self.memo_edge_key(u, v);
        self.lookup(
            "has_edge",
            CacheKey::HasEdge(key.source, key.target),
            || self.inner.has_edge(u, v).map(CacheValue::Bool),
            |value| match value {
                CacheValue::Bool(b) => Some(*b),
                _ => None,
            },
        )
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        let mut state = self.state.lock();
        self.inner.remove_edge(u, v)?;
        if self.dirty_cache_on_write {
            let key = EdgeKey::canonical(u.clone(), v.clone(), self.inner.is_directed());
            state.invalidate_edge(&key);
        }
        Ok(())
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        let entries = self.lookup(
            "all_edges",
            CacheKey::AllEdges(include_metadata),
            || {
                let collected: Result<Vec<EdgeEntry>, GraphStoreError> =
                    self.inner.all_edges(include_metadata)?.collect();
                collected.map(CacheValue::Edges)
            },
            |value| match value {
                CacheValue::Edges(entries) => Some(entries.clone()),
                _ => None,
            },
        )?;
        Ok(Box::new(entries.into_iter().map(Ok)))
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        self.lookup(
            "neighbors",
            CacheKey::Neighbors(u.clone()),
            || self.inner.neighbors(u).map(CacheValue::Ids),
            |value| match value {
                CacheValue::Ids(ids) => Some(ids.clone()),
                _ => None,
            },
        )
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        self.lookup(
            "predecessors",
            CacheKey::Predecessors(u.clone()),
            || self.inner.predecessors(u).map(CacheValue::Ids),
            |value| match value {
                CacheValue::Ids(ids) => Some(ids.clone()),
                _ => None,
            },
        )
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        self.lookup(
            "node_count",
            CacheKey::NodeCount,
            || self.inner.node_count().map(CacheValue::Count),
            |value| match value {
                CacheValue::Count(n) => Some(*n),
                _ => None,
            },
        )
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        self.lookup(
            "edge_count",
            CacheKey::EdgeCount,
            || self.inner.edge_count().map(CacheValue::Count),
            |value| match value {
                CacheValue::Count(n) => Some(*n),
                _ => None,
            },
        )
    }

    fn degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        self.lookup(
            "degree",
            CacheKey::Degree(u.clone()),
            || self.inner.degree(u).map(CacheValue::Count),
            |value| match value {
                CacheValue::Count(n) => Some(*n),
                _ => None,
            },
        )
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        self.lookup(
            "in_degree",
            CacheKey::InDegree(u.clone()),
            || self.inner.in_degree(u).map(CacheValue::Count),
            |value| match value {
                CacheValue::Count(n) => Some(*n),
                _ => None,
            },
        )
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        self.lookup(
            "out_degree",
            CacheKey::OutDegree(u.clone()),
            || self.inner.out_degree(u).map(CacheValue::Count),
            |value| match value {
                CacheValue::Count(n) => Some(*n),
                _ => None,
            },
        )
    }

    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        let mut state = self.state.lock();
        self.inner.add_nodes_from(nodes)?;
        if self.dirty_cache_on_write {
            state.memo.clear();
        }
        Ok(())
    }

    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        let mut state = self.state.lock();
        self.inner.add_edges_from(edges)?;
        if self.dirty_cache_on_write {
            state.memo.clear();
        }
        Ok(())
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        let mut state = self.state.lock();
        self.inner.teardown(confirm)?;
        state.memo.clear();
        Ok(())
    }
}
