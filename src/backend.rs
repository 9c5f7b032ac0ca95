//! The storage contract every engine implements.
//!
//! [`GraphBackend`] is the single integration surface between callers (or a
//! [`crate::cache::CachedBackend`] proxy) and a storage substrate. Engines
//! implement the required CRUD and enumeration methods; counts, degrees and
//! batch ingestion have derived defaults that engines override when the
//! substrate offers a cheaper native query.

use crate::errors::GraphStoreError;
use crate::types::{EdgeKey, Metadata, NodeId};

/// One node yielded by [`GraphBackend::all_nodes`]. Metadata is present only
/// when the pass was requested with `include_metadata`.
pub type NodeEntry = (NodeId, Option<Metadata>);

/// One edge yielded by [`GraphBackend::all_edges`], as stored (canonical
/// endpoint order for undirected graphs).
pub type EdgeEntry = (NodeId, NodeId, Option<Metadata>);

/// Lazy, restartable pass over the graph's nodes. Arbitrary order; every call
/// to [`GraphBackend::all_nodes`] starts a fresh pass over current state.
pub type NodeIter<'a> = Box<dyn Iterator<Item = Result<NodeEntry, GraphStoreError>> + 'a>;

/// Lazy, restartable pass over the graph's edges.
pub type EdgeIter<'a> = Box<dyn Iterator<Item = Result<EdgeEntry, GraphStoreError>> + 'a>;

/// Confirmation argument for [`GraphBackend::teardown`]. Destroying backing
/// storage requires spelling out [`Teardown::YesIAmSure`] at the call site;
/// anything else fails with [`GraphStoreError::TeardownNotConfirmed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Teardown {
    YesIAmSure,
    Cancel,
}

/// Uniform node/edge storage contract.
///
/// Semantics shared by every engine:
/// - `add_node` / `add_edge` are upserts keyed by identity; re-adding replaces
///   metadata. With `GraphOptions::upsert` disabled they signal
///   [`GraphStoreError::AlreadyExists`] instead.
/// - Point lookups distinguish "absent" ([`GraphStoreError::NotFound`]) from
///   "present with empty metadata" (an empty map).
/// - `remove_node` cascades: incident edges are removed in the same call.
/// - Degree queries on a missing node signal `NotFound`; for undirected
///   graphs `in_degree == out_degree == degree`.
pub trait GraphBackend {
    /// Fixed at construction; no side effects.
    fn is_directed(&self) -> bool;

    /// Upsert a node and return its id unchanged.
    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError>;

    /// Metadata of `id`, or `NotFound`.
    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError>;

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError>;

    /// Remove the node and its incident edges; `NotFound` if absent.
    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError>;

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError>;

    /// Upsert an edge between `u` and `v` and return its canonical key.
    /// Missing endpoints follow the engine's configured
    /// `EndpointPolicy`: auto-created with empty metadata, or refused with
    /// [`GraphStoreError::InvalidEndpoint`].
    fn add_edge(&self, u: NodeId, v: NodeId, metadata: Metadata)
    -> Result<EdgeKey, GraphStoreError>;

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError>;

    fn has_edge(&self, u: &NodeId, v: &NodeId) -> Result<bool, GraphStoreError> {
        match self.get_edge(u, v) {
            Ok(_) => Ok(true),
            Err(GraphStoreError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError>;

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError>;

    /// Downstream endpoints of `u` (all adjacent nodes when undirected).
    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError>;

    /// Upstream endpoints of `u` (all adjacent nodes when undirected).
    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError>;

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        let mut count = 0;
        for entry in self.all_nodes(false)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        let mut count = 0;
        for entry in self.all_edges(false)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        if self.is_directed() {
            Ok(self.out_degree(u)? + self.in_degree(u)?)
        } else {
            Ok(self.neighbors(u)?.len())
        }
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        Ok(self.predecessors(u)?.len())
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        Ok(self.neighbors(u)?.len())
    }

    /// Batch node upsert. Engines back this with a single transaction or
    /// write pass; the default falls back to per-entity calls.
    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        for (id, metadata) in nodes {
            self.add_node(id, metadata)?;
        }
        Ok(())
    }

    /// Batch edge upsert; same transactional contract as `add_nodes_from`.
    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        for (u, v, metadata) in edges {
            self.add_edge(u, v, metadata)?;
        }
        Ok(())
    }

    /// Destroy all backing storage for this graph instance.
    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError>;
}

impl<B> GraphBackend for &B
where
    B: GraphBackend + ?Sized,
{
    fn is_directed(&self) -> bool {
        (*self).is_directed()
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        (*self).add_node(id, metadata)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        (*self).get_node(id)
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        (*self).has_node(id)
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        (*self).remove_node(id)
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        (*self).all_nodes(include_metadata)
    }

    fn add_edge(
        &self,
        u: NodeId,
        v: NodeId,
        metadata: Metadata,
    ) -> Result<EdgeKey, GraphStoreError> {
        (*self).add_edge(u, v, metadata)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        (*self).get_edge(u, v)
    }

    fn has_edge(&self, u: &NodeId, v: &NodeId) -> Result<bool, GraphStoreError> {
        (*self).has_edge(u, v)
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        (*self).remove_edge(u, v)
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        (*self).all_edges(include_metadata)
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        (*self).neighbors(u)
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        (*self).predecessors(u)
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        (*self).node_count()
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        (*self).edge_count()
    }

    fn degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (*self).degree(u)
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (*self).in_degree(u)
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (*self).out_degree(u)
    }

    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        (*self).add_nodes_from(nodes)
    }

    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        (*self).add_edges_from(edges)
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        (*self).teardown(confirm)
    }
}

impl<B> GraphBackend for Box<B>
where
    B: GraphBackend + ?Sized,
{
    fn is_directed(&self) -> bool {
        (**self).is_directed()
    }

    fn add_node(&self, id: NodeId, metadata: Metadata) -> Result<NodeId, GraphStoreError> {
        (**self).add_node(id, metadata)
    }

    fn get_node(&self, id: &NodeId) -> Result<Metadata, GraphStoreError> {
        (**self).get_node(id)
    }

    fn has_node(&self, id: &NodeId) -> Result<bool, GraphStoreError> {
        (**self).has_node(id)
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), GraphStoreError> {
        (**self).remove_node(id)
    }

    fn all_nodes(&self, include_metadata: bool) -> Result<NodeIter<'_>, GraphStoreError> {
        (**self).all_nodes(include_metadata)
    }

    fn add_edge(
        &self,
        u: NodeId,
        v: NodeId,
        metadata: Metadata,
    ) -> Result<EdgeKey, GraphStoreError> {
        (**self).add_edge(u, v, metadata)
    }

    fn get_edge(&self, u: &NodeId, v: &NodeId) -> Result<Metadata, GraphStoreError> {
        (**self).get_edge(u, v)
    }

    fn has_edge(&self, u: &NodeId, v: &NodeId) -> Result<bool, GraphStoreError> {
        (**self).has_edge(u, v)
    }

    fn remove_edge(&self, u: &NodeId, v: &NodeId) -> Result<(), GraphStoreError> {
        (**self).remove_edge(u, v)
    }

    fn all_edges(&self, include_metadata: bool) -> Result<EdgeIter<'_>, GraphStoreError> {
        (**self).all_edges(include_metadata)
    }

    fn neighbors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        (**self).neighbors(u)
    }

    fn predecessors(&self, u: &NodeId) -> Result<Vec<NodeId>, GraphStoreError> {
        (**self).predecessors(u)
    }

    fn node_count(&self) -> Result<usize, GraphStoreError> {
        (**self).node_count()
    }

    fn edge_count(&self) -> Result<usize, GraphStoreError> {
        (**self).edge_count()
    }

    fn degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (**self).degree(u)
    }

    fn in_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (**self).in_degree(u)
    }

    fn out_degree(&self, u: &NodeId) -> Result<usize, GraphStoreError> {
        (**self).out_degree(u)
    }

    fn add_nodes_from(&self, nodes: Vec<(NodeId, Metadata)>) -> Result<(), GraphStoreError> {
        (**self).add_nodes_from(nodes)
    }

    fn add_edges_from(
        &self,
        edges: Vec<(NodeId, NodeId, Metadata)>,
    ) -> Result<(), GraphStoreError> {
        (**self).add_edges_from(edges)
    }

    fn teardown(&self, confirm: Teardown) -> Result<(), GraphStoreError> {
        (**self).teardown(confirm)
    }
}
