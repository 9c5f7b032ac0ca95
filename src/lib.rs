//! Property-graph storage behind a uniform backend trait.
//!
//! anygraph persists one logical graph (nodes and edges with arbitrary JSON
//! metadata) while the storage substrate varies. Every engine implements the
//! same [`GraphBackend`] contract, so callers issue the same small set of
//! operations regardless of what actually holds the data.
//!
//! # Engines
//!
//! - [`MemoryBackend`]: in-process adjacency maps; the reference engine.
//! - [`SqliteBackend`]: a relational table pair; edges live under a compound
//!   `(source, target)` primary key, column names configurable.
//! - [`RedbBackend`]: a key-value item pair; edges keyed by a composite
//!   `(source, target)` tuple for point lookups and source-prefix scans.
//! - [`CachedBackend`]: wraps any of the above (or another proxy), memoizing
//!   reads and invalidating on writes so it never serves stale data.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use anygraph::{BackendConfig, GraphOptions, NodeId, open_backend};
//!
//! let cfg = BackendConfig::memory(GraphOptions::directed());
//! let graph = open_backend(&cfg)?;
//! graph.add_node(NodeId::from("a"), Default::default())?;
//! graph.add_edge(NodeId::from("a"), NodeId::from("b"), Default::default())?;
//! assert_eq!(graph.out_degree(&NodeId::from("a"))?, 1);
//! # Ok::<(), anygraph::GraphStoreError>(())
//! ```
//!
//! Directedness, upsert mode and the missing-endpoint policy are fixed per
//! graph through [`GraphOptions`]; there is no process-wide default backend.

pub mod backend;
pub mod backends;
pub mod cache;
pub mod config;
pub mod errors;
pub mod types;

pub use crate::backend::{EdgeEntry, EdgeIter, GraphBackend, NodeEntry, NodeIter, Teardown};
pub use crate::backends::{MemoryBackend, RedbBackend, SqliteBackend};
pub use crate::cache::{CachedBackend, OpStats};
pub use crate::config::{
    BackendConfig, BackendKind, EndpointPolicy, GraphOptions, RedbConfig, SqliteConfig,
    SqliteTables, open_backend,
};
pub use crate::errors::GraphStoreError;
pub use crate::types::{EdgeKey, Metadata, NodeId};
