use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use quotagate_duckdb::DuckDbBackend;
use quotagate_server::{auth::jwt::encode_jwt, config::Config, state::AppState};

/// `quotagate health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$QUOTAGATE_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("QUOTAGATE_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

/// Open the database under `data_dir`, creating the directory if needed.
fn open_db(cfg: &Config) -> Result<DuckDbBackend> {
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/quotagate.db", cfg.data_dir);
    DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)
}

async fn jwt_secret(cfg: &Config, db: &DuckDbBackend) -> Result<String> {
    match &cfg.jwt_secret {
        Some(secret) => Ok(secret.clone()),
        None => db.ensure_jwt_secret().await,
    }
}

/// `quotagate token <actor_id> [email]`: print a 24h bearer token signed
/// with the server's secret, for manual testing against a running instance.
async fn run_issue_token(cfg: &Config, args: &[String]) -> Result<()> {
    let actor_id = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("usage: quotagate token <actor_id> [email]"))?;
    let db = open_db(cfg)?;
    let secret = jwt_secret(cfg, &db).await?;
    let token = encode_jwt(
        &secret,
        actor_id,
        args.get(3).map(String::as_str),
        chrono::Duration::hours(24),
    )?;
    println!("{token}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Initialise structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quotagate=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    if args.get(1).map(|s| s.as_str()) == Some("token") {
        return run_issue_token(&cfg, &args).await;
    }

    let db = open_db(&cfg)?;
    let secret = jwt_secret(&cfg, &db).await?;
    info!(
        admins = cfg.quota.admins.len(),
        rate_limit_disabled = cfg.rate_limit.disabled,
        "Quota configuration loaded"
    );

    let addr = format!("0.0.0.0:{}", cfg.port);
    let state = Arc::new(AppState::new(db, cfg.clone(), secret));
    let app = quotagate_server::app::build_app(state);

    info!(port = cfg.port, "Quotagate listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
