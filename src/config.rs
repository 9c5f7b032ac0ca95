//! Configuration for engine selection and shared graph semantics.
//!
//! There is no ambient default backend: every graph is constructed from an
//! explicit [`BackendConfig`], either through [`open_backend`] or by calling
//! an engine constructor directly.

use std::path::PathBuf;

use crate::GraphStoreError;
use crate::backend::GraphBackend;
use crate::backends::{MemoryBackend, RedbBackend, SqliteBackend};

/// Engine selection for [`open_backend`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process adjacency maps; the reference engine. No persistence.
    #[default]
    Memory,
    /// SQLite table pair with a compound-key edge table.
    Sqlite,
    /// redb item pair with a (source, target) composite edge key.
    Redb,
}

/// What `add_edge` does when an endpoint node does not exist yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndpointPolicy {
    /// Create the missing endpoint with empty metadata.
    #[default]
    CreateEmpty,
    /// Refuse with [`GraphStoreError::InvalidEndpoint`].
    Reject,
}

/// Semantics shared by every engine, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphOptions {
    /// Whether `(u, v)` and `(v, u)` are distinct edges.
    pub directed: bool,
    /// When `false`, re-adding an existing node or edge id signals
    /// [`GraphStoreError::AlreadyExists`] instead of replacing metadata.
    pub upsert: bool,
    pub missing_endpoints: EndpointPolicy,
}

impl GraphOptions {
    pub fn directed() -> Self {
        Self {
            directed: true,
            ..Self::default()
        }
    }

    pub fn undirected() -> Self {
        Self::default()
    }
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            directed: false,
            upsert: true,
            missing_endpoints: EndpointPolicy::CreateEmpty,
        }
    }
}

/// Table and column naming for the SQLite engine. Configurable so the edge
/// table can interoperate with externally-defined schemas; identifiers are
/// validated before being spliced into SQL.
#[derive(Clone, Debug)]
pub struct SqliteTables {
    pub node_table: String,
    pub edge_table: String,
    pub source_column: String,
    pub target_column: String,
}

impl Default for SqliteTables {
    fn default() -> Self {
        Self {
            node_table: "graph_nodes".into(),
            edge_table: "graph_edges".into(),
            source_column: "source".into(),
            target_column: "target".into(),
        }
    }
}

/// SQLite engine configuration. `path: None` opens an in-memory database.
#[derive(Clone, Debug, Default)]
pub struct SqliteConfig {
    pub path: Option<PathBuf>,
    pub tables: SqliteTables,
}

/// redb engine configuration. The file is created if missing.
#[derive(Clone, Debug, Default)]
pub struct RedbConfig {
    pub path: Option<PathBuf>,
    /// Physical fetch size for paged enumeration.
    pub page_size: usize,
}

/// Complete configuration for graph construction.
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub options: GraphOptions,
    pub sqlite: SqliteConfig,
    pub redb: RedbConfig,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, options: GraphOptions) -> Self {
        Self {
            kind,
            options,
            sqlite: SqliteConfig::default(),
            redb: RedbConfig::default(),
        }
    }

    pub fn memory(options: GraphOptions) -> Self {
        Self::new(BackendKind::Memory, options)
    }

    pub fn sqlite(options: GraphOptions) -> Self {
        Self::new(BackendKind::Sqlite, options)
    }

    pub fn redb<P: Into<PathBuf>>(path: P, options: GraphOptions) -> Self {
        let mut cfg = Self::new(BackendKind::Redb, options);
        cfg.redb.path = Some(path.into());
        cfg
    }
}

/// Construct the engine selected by `cfg`. All engines come back as the same
/// trait object, so call sites (including [`crate::cache::CachedBackend`])
/// need no per-engine branches.
pub fn open_backend(cfg: &BackendConfig) -> Result<Box<dyn GraphBackend>, GraphStoreError> {
    match cfg.kind {
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new(cfg.options))),
        BackendKind::Sqlite => {
            let backend = match &cfg.sqlite.path {
                Some(path) => SqliteBackend::open(path, cfg.options, cfg.sqlite.tables.clone())?,
                None => SqliteBackend::open_in_memory(cfg.options, cfg.sqlite.tables.clone())?,
            };
            Ok(Box::new(backend))
        }
        BackendKind::Redb => {
            let path = cfg.redb.path.as_ref().ok_or_else(|| {
                GraphStoreError::invalid_input("redb backend requires a database path")
            })?;
            let mut backend = RedbBackend::open(path, cfg.options)?;
            if cfg.redb.page_size > 0 {
                backend.set_page_size(cfg.redb.page_size);
            }
            Ok(Box::new(backend))
        }
    }
}
