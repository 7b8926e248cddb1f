use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Builder;
use log::{info, LevelFilter};

use portfolio_lens::api::{self, AppState};
use portfolio_lens::auth::AuthState;
use portfolio_lens::config::Config;
use portfolio_lens::db::Database;
use portfolio_lens::market::MarketService;
use portfolio_lens::metrics::MetricsEngine;

#[tokio::main]
async fn main() -> Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = Config::from_env();
    info!("Opening database at {}", config.db_path.display());
    let db = Database::open(&config.db_path)?;

    let state = AppState {
        db,
        auth: AuthState::new(config.jwt_secret.clone(), config.token_expiry_secs),
        market: Arc::new(MarketService::new()?),
        metrics: Arc::new(MetricsEngine::new(config.risk_free_rate)),
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
