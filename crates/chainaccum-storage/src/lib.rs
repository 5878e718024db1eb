//! chainaccum-storage: persistent header store backends for ChainAccum.
//!
//! Backends:
//! - [`chainaccum_core::MemoryHeaderStore`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHeaderStore;
