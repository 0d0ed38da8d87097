/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `QUOTAGATE_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Timestamps are always bound from the caller's clock; no column defaults to
/// `CURRENT_TIMESTAMP`, so window arithmetic is reproducible in tests.
///
/// NOTE: DuckDB cannot update indexed columns in place (nor assign them in
/// `ON CONFLICT DO UPDATE`). Only immutable columns are indexed: never
/// `grants.remaining_count`, `grants.status` or `subscriptions.status`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SETTINGS
-- ===========================================
-- Keys stored in this table:
--   'jwt_secret'  – HMAC secret for bearer tokens when QUOTAGATE_JWT_SECRET is unset
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- SUBSCRIPTIONS (written by the billing webhook only)
-- ===========================================
CREATE TABLE IF NOT EXISTS subscriptions (
    id                    VARCHAR PRIMARY KEY,
    actor_id              VARCHAR NOT NULL,
    status                VARCHAR NOT NULL,        -- 'active' | 'trialing' | 'past_due' | 'canceled' | 'incomplete'
    plan_code             VARCHAR NOT NULL,        -- e.g. 'pro_monthly'
    current_period_start  TIMESTAMP NOT NULL,      -- stored explicitly; never derived from period_end
    current_period_end    TIMESTAMP NOT NULL,
    created_at            TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_actor
    ON subscriptions(actor_id);

-- ===========================================
-- GRANTS ("tickets")
-- ===========================================
CREATE TABLE IF NOT EXISTS grants (
    id              VARCHAR PRIMARY KEY,
    actor_id        VARCHAR NOT NULL,
    quota_type      VARCHAR NOT NULL,              -- 'plan_generation' | 'travel_info'
    remaining_count INTEGER NOT NULL CHECK (remaining_count >= 0),
    valid_until     TIMESTAMP NOT NULL,
    status          VARCHAR NOT NULL DEFAULT 'active',  -- 'active' | 'revoked'
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_grants_actor_quota
    ON grants(actor_id, quota_type);

-- ===========================================
-- USAGE RECORDS (append-only ledger)
-- ===========================================
CREATE TABLE IF NOT EXISTS usage_records (
    id              VARCHAR PRIMARY KEY,           -- UUID v4
    actor_id        VARCHAR NOT NULL,
    quota_type      VARCHAR NOT NULL,
    source          VARCHAR NOT NULL,              -- 'subscription' | 'ticket' | 'admin'
    occurred_at     TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_usage_records_period
    ON usage_records(actor_id, quota_type, occurred_at);

-- ===========================================
-- ACTIVITY LOG (rate limiter input)
-- Rate limiter: SELECT COUNT(*) WHERE actor_id = ? AND action = ? AND occurred_at > ?
-- ===========================================
CREATE TABLE IF NOT EXISTS activity_log (
    actor_id        VARCHAR NOT NULL,
    action          VARCHAR NOT NULL,              -- 'create_plan' | 'regenerate_plan' | 'travel_info'
    occurred_at     TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activity_log_actor_action_time
    ON activity_log(actor_id, action, occurred_at DESC);

-- ===========================================
-- RESOURCES (last-modified timestamps of gated resources, e.g. saved plans)
-- Touched by the plan persistence layer on every save.
-- ===========================================
CREATE TABLE IF NOT EXISTS resources (
    id              VARCHAR PRIMARY KEY,
    updated_at      TIMESTAMP NOT NULL
);
"#
    )
}
