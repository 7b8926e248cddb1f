//! HTTP API: router assembly and shared application state.

pub mod auth;
pub mod market;
pub mod portfolios;

use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthState};
use crate::db::Database;
use crate::market::MarketService;
use crate::metrics::MetricsEngine;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub auth: AuthState,
    pub market: Arc<MarketService>,
    pub metrics: Arc<MetricsEngine>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> AuthState {
        state.auth.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route(
            "/api/profile",
            get(portfolios::get_profile).put(portfolios::update_profile),
        )
        .route(
            "/api/preferences",
            get(portfolios::get_preferences).put(portfolios::update_preferences),
        )
        .route(
            "/api/portfolios",
            get(portfolios::list).post(portfolios::create),
        )
        .route(
            "/api/portfolios/:id",
            get(portfolios::get_one)
                .put(portfolios::update)
                .delete(portfolios::delete),
        )
        .route("/api/portfolios/:id/activate", post(portfolios::activate))
        .route(
            "/api/portfolios/:id/instruments",
            post(portfolios::add_instrument),
        )
        .route(
            "/api/portfolios/:id/instruments/:symbol",
            axum::routing::put(portfolios::update_instrument_weight)
                .delete(portfolios::remove_instrument),
        )
        .route("/api/portfolios/:id/import", post(portfolios::import_csv))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/quote", get(market::quotes))
        .route("/api/chart", get(market::chart))
        .route("/api/search", get(market::search))
        .route("/api/news", get(market::news))
        .route("/api/calendar", get(market::calendar))
        .route("/api/metrics", get(market::metrics))
        .route("/api/movers", get(market::movers))
        .route("/api/fear-greed", get(market::fear_greed))
        .route("/api/countries", get(market::countries));

    public
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
