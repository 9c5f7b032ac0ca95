//! Concrete storage engines. Each one owns its indexing strategy privately
//! and exposes only the [`crate::backend::GraphBackend`] contract.

pub mod memory;
pub mod redb;
pub mod sqlite;

pub use self::memory::MemoryBackend;
pub use self::redb::RedbBackend;
pub use self::sqlite::SqliteBackend;
