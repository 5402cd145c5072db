//! Persistence layer — libSQL-backed storage for tasks, messages, and the
//! bounce ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::Store;
