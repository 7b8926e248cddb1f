//! Authenticated endpoints: profile, preferences, portfolio and
//! instrument management, CSV import.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::csv_import::{self, ImportRowError};
use crate::db::PreferencesUpdate;
use crate::error::ApiError;
use crate::models::{Instrument, InstrumentType, Portfolio, UserPreferences, UserProfile};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePortfolioRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePortfolioRequest {
    pub name: Option<String>,
    pub use_custom_weights: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInstrumentRequest {
    pub symbol: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub instrument_type: Option<InstrumentType>,
    pub sector: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWeightRequest {
    pub weight: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportRowError>,
}

/// Load a portfolio and check it belongs to the caller. A foreign
/// portfolio is indistinguishable from a missing one.
fn owned_portfolio(state: &AppState, user_id: &str, id: &str) -> Result<Portfolio, ApiError> {
    state
        .db
        .get_portfolio(id)?
        .filter(|p| p.user_id == user_id)
        .ok_or(ApiError::NotFound("portfolio"))
}

fn validate_weight(weight: Option<f64>) -> Result<(), ApiError> {
    if let Some(w) = weight {
        if !w.is_finite() || w <= 0.0 || w > 100.0 {
            return Err(ApiError::BadRequest(
                "Weight must be in (0, 100]".to_string(),
            ));
        }
    }
    Ok(())
}

// ── Profile & preferences ────────────────────────────────────────────────

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .db
        .get_user(&user.user_id)?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .db
        .update_profile(&user.user_id, req.first_name.as_deref(), req.last_name.as_deref())?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(profile))
}

pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserPreferences>, ApiError> {
    let prefs = state
        .db
        .get_preferences(&user.user_id)?
        .ok_or(ApiError::NotFound("preferences"))?;
    Ok(Json(prefs))
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(update): Json<PreferencesUpdate>,
) -> Result<Json<UserPreferences>, ApiError> {
    let prefs = state
        .db
        .update_preferences(&user.user_id, &update)?
        .ok_or(ApiError::NotFound("preferences"))?;
    Ok(Json(prefs))
}

// ── Portfolios ───────────────────────────────────────────────────────────

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Portfolio>>, ApiError> {
    Ok(Json(state.db.list_portfolios(&user.user_id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreatePortfolioRequest>,
) -> Result<(StatusCode, Json<Portfolio>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Portfolio name required".to_string()));
    }

    // The first portfolio becomes active automatically
    let is_first = state.db.list_portfolios(&user.user_id)?.is_empty();
    let portfolio = state.db.create_portfolio(&user.user_id, name, is_first)?;

    log::info!("Created portfolio {} for user {}", portfolio.id, user.user_id);
    Ok((StatusCode::CREATED, Json(portfolio)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Portfolio>, ApiError> {
    Ok(Json(owned_portfolio(&state, &user.user_id, &id)?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdatePortfolioRequest>,
) -> Result<Json<Portfolio>, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;

    if let Some(name) = req.name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Portfolio name required".to_string()));
        }
    }

    state
        .db
        .update_portfolio(&id, req.name.as_deref().map(str::trim), req.use_custom_weights)?;
    Ok(Json(owned_portfolio(&state, &user.user_id, &id)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;
    state.db.delete_portfolio(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Portfolio>, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;
    state.db.set_active_portfolio(&user.user_id, Some(&id))?;
    Ok(Json(owned_portfolio(&state, &user.user_id, &id)?))
}

// ── Instruments ──────────────────────────────────────────────────────────

pub async fn add_instrument(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<AddInstrumentRequest>,
) -> Result<(StatusCode, Json<Portfolio>), ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;

    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("Symbol required".to_string()));
    }
    validate_weight(req.weight)?;

    let instrument = Instrument {
        name: req.name.unwrap_or_else(|| symbol.clone()),
        symbol,
        instrument_type: req.instrument_type.unwrap_or(InstrumentType::Stock),
        sector: req.sector,
        weight: req.weight,
        added_at: Utc::now(),
    };

    if !state.db.add_instrument(&id, &instrument)? {
        return Err(ApiError::Conflict(format!(
            "{} is already in this portfolio",
            instrument.symbol
        )));
    }

    Ok((
        StatusCode::CREATED,
        Json(owned_portfolio(&state, &user.user_id, &id)?),
    ))
}

pub async fn update_instrument_weight(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, symbol)): Path<(String, String)>,
    Json(req): Json<UpdateWeightRequest>,
) -> Result<Json<Portfolio>, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;
    validate_weight(req.weight)?;

    if !state
        .db
        .update_instrument_weight(&id, &symbol.to_uppercase(), req.weight)?
    {
        return Err(ApiError::NotFound("instrument"));
    }
    Ok(Json(owned_portfolio(&state, &user.user_id, &id)?))
}

pub async fn remove_instrument(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, symbol)): Path<(String, String)>,
) -> Result<Json<Portfolio>, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;

    if !state.db.remove_instrument(&id, &symbol.to_uppercase())? {
        return Err(ApiError::NotFound("instrument"));
    }
    Ok(Json(owned_portfolio(&state, &user.user_id, &id)?))
}

// ── CSV import ───────────────────────────────────────────────────────────

pub async fn import_csv(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<ImportResponse>, ApiError> {
    owned_portfolio(&state, &user.user_id, &id)?;

    let parsed = csv_import::parse_instruments_csv(&body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut imported = 0;
    let mut skipped = 0;
    for row in parsed.instruments {
        let instrument = Instrument {
            name: row.name.unwrap_or_else(|| row.symbol.clone()),
            symbol: row.symbol,
            instrument_type: row.instrument_type.unwrap_or(InstrumentType::Stock),
            sector: None,
            weight: row.weight,
            added_at: Utc::now(),
        };
        if state.db.add_instrument(&id, &instrument)? {
            imported += 1;
        } else {
            skipped += 1;
        }
    }

    log::info!(
        "CSV import into portfolio {}: {} imported, {} skipped, {} bad rows",
        id,
        imported,
        skipped,
        parsed.errors.len()
    );
    Ok(Json(ImportResponse {
        imported,
        skipped,
        errors: parsed.errors,
    }))
}
