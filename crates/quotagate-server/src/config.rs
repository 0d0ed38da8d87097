/// Re-export `Config` from `quotagate-core` for use within this crate.
///
/// Environment parsing lives in `quotagate-core` so the gate can be embedded
/// by other binaries without depending on the HTTP server.
pub use quotagate_core::config::Config;
