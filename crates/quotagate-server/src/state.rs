use std::sync::Arc;

use quotagate_core::{
    clock::{Clock, SystemClock},
    config::Config,
    AccessGate, QuotaConsumer, RateLimiter,
};
use quotagate_duckdb::DuckDbBackend;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend. Serves all three storage traits behind the gate.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    /// The gate holds its own copies; handlers read this for reporting.
    pub config: Arc<Config>,

    /// Rate limiter and quota consumer, wired to `db`.
    pub gate: AccessGate,

    /// HMAC secret for bearer tokens.
    pub jwt_secret: String,
}

impl AppState {
    /// Construct a new `AppState` wrapping the given backend and config.
    pub fn new(db: DuckDbBackend, config: Config, jwt_secret: String) -> Self {
        Self::with_clock(db, config, jwt_secret, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an injected clock (tests).
    pub fn with_clock(
        db: DuckDbBackend,
        config: Config,
        jwt_secret: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let db = Arc::new(db);
        let limiter = RateLimiter::new(config.rate_limit.clone(), db.clone(), clock.clone());
        let consumer = QuotaConsumer::new(
            Arc::new(config.quota.clone()),
            db.clone(),
            db.clone(),
            clock,
        );
        let gate = AccessGate::new(limiter, consumer);
        Self {
            db,
            config: Arc::new(config),
            gate,
            jwt_secret,
        }
    }
}
