//! Command-port adapters.
//!
//! - [`MemoryStore`]: process-local tables, for tests and local runs
//! - [`MySqlStore`]: the relational store used in production

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;
