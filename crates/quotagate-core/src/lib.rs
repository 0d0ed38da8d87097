pub mod clock;
pub mod config;
pub mod consumer;
pub mod decision;
pub mod entitlement;
pub mod error;
pub mod gate;
pub mod memory;
pub mod rate_limit;

pub use consumer::QuotaConsumer;
pub use decision::{Decision, DenyReason, UsageStatus};
pub use error::GateError;
pub use gate::{AccessGate, GatedAction};
pub use rate_limit::{ActionAdmission, RateLimiter};
