//! Storage backend implementations of `syslogd_core::backend::StorageBackend` (§4.3).

pub mod search;
pub mod sqlite;

pub use search::{SearchBackend, SearchConfig};
pub use sqlite::SqliteBackend;
