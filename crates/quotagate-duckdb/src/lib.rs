pub mod activity;
pub mod backend;
pub mod entitlements;
pub mod schema;
pub mod usage;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `quotagate_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
