//! End-to-end router tests against an in-memory database. Market data
//! endpoints are only exercised up to parameter validation so no network
//! access is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use portfolio_lens::api::{self, AppState};
use portfolio_lens::auth::AuthState;
use portfolio_lens::db::Database;
use portfolio_lens::market::MarketService;
use portfolio_lens::metrics::MetricsEngine;

fn test_app() -> Router {
    let state = AppState {
        db: Database::open_in_memory().unwrap(),
        auth: AuthState::new("test-secret", 3600),
        market: Arc::new(MarketService::new().unwrap()),
        metrics: Arc::new(MetricsEngine::new(0.04)),
    };
    api::router(state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn register(app: &Router, email: &str) -> (String, Value) {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "email": email,
                "password": "correct-horse",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (body["token"].as_str().unwrap().to_string(), body["user"].clone())
}

#[tokio::test]
async fn health_endpoint() {
    let app = test_app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_login_me_flow() {
    let app = test_app();
    let (token, user) = register(&app, "ada@example.com").await;
    assert_eq!(user["email"], "ada@example.com");
    assert!(user.get("passwordHash").is_none());

    // duplicate email
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "email": "ada@example.com",
                "password": "correct-horse",
                "firstName": "Ada",
                "lastName": "Lovelace"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("registered"));

    // login with wrong password
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "ada@example.com", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // me with the register token
    let (status, body) = send(&app, get_auth("/api/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["firstName"], "Ada");
}

#[tokio::test]
async fn weak_password_rejected() {
    let app = test_app();
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({
                "email": "a@b.c",
                "password": "short",
                "firstName": "A",
                "lastName": "B"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_token() {
    let app = test_app();
    let (status, _) = send(&app, get("/api/portfolios")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, get_auth("/api/portfolios", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn portfolio_lifecycle() {
    let app = test_app();
    let (token, _) = register(&app, "ada@example.com").await;

    // first portfolio is active automatically
    let (status, portfolio) = send(
        &app,
        json_request("POST", "/api/portfolios", Some(&token), json!({ "name": "Growth" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(portfolio["isActive"], true);
    let id = portfolio["id"].as_str().unwrap().to_string();

    let (status, second) = send(
        &app,
        json_request("POST", "/api/portfolios", Some(&token), json!({ "name": "Dividends" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["isActive"], false);
    let second_id = second["id"].as_str().unwrap().to_string();

    // add instruments
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/portfolios/{}/instruments", id),
            Some(&token),
            json!({ "symbol": "aapl", "name": "Apple", "type": "stock", "weight": 60.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["instruments"][0]["symbol"], "AAPL");

    // duplicate symbol
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/portfolios/{}/instruments", id),
            Some(&token),
            json!({ "symbol": "AAPL" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // out-of-range weight
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/portfolios/{}/instruments", id),
            Some(&token),
            json!({ "symbol": "MSFT", "weight": 150.0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // activate the second portfolio
    let (status, activated) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/portfolios/{}/activate", second_id),
            Some(&token),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(activated["isActive"], true);

    let (_, portfolios) = send(&app, get_auth("/api/portfolios", &token)).await;
    let active: Vec<_> = portfolios
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["isActive"] == true)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], second_id.as_str());

    // delete
    let (status, _) = send(
        &app,
        json_request("DELETE", &format!("/api/portfolios/{}", id), Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get_auth(&format!("/api/portfolios/{}", id), &token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn portfolios_are_isolated_between_users() {
    let app = test_app();
    let (ada_token, _) = register(&app, "ada@example.com").await;
    let (grace_token, _) = register(&app, "grace@example.com").await;

    let (_, portfolio) = send(
        &app,
        json_request("POST", "/api/portfolios", Some(&ada_token), json!({ "name": "Mine" })),
    )
    .await;
    let id = portfolio["id"].as_str().unwrap();

    // another user sees 404, not 403
    let (status, _) = send(&app, get_auth(&format!("/api/portfolios/{}", id), &grace_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn csv_import_reports_rows() {
    let app = test_app();
    let (token, _) = register(&app, "ada@example.com").await;
    let (_, portfolio) = send(
        &app,
        json_request("POST", "/api/portfolios", Some(&token), json!({ "name": "Imported" })),
    )
    .await;
    let id = portfolio["id"].as_str().unwrap();

    let csv = "symbol,name,type,weight\nAAPL,Apple,stock,50\nAAPL,Apple,stock,50\nMSFT,Microsoft,widget,25\n";
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/portfolios/{}/import", id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(csv))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 1);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn preferences_roundtrip() {
    let app = test_app();
    let (token, _) = register(&app, "ada@example.com").await;

    let (status, prefs) = send(&app, get_auth("/api/preferences", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prefs["language"], "en");

    let (status, prefs) = send(
        &app,
        json_request(
            "PUT",
            "/api/preferences",
            Some(&token),
            json!({ "theme": "dark", "marketIndexes": ["^GSPC"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prefs["theme"], "dark");
    assert_eq!(prefs["language"], "en");
    assert_eq!(prefs["marketIndexes"], json!(["^GSPC"]));
}

#[tokio::test]
async fn market_endpoints_validate_parameters() {
    let app = test_app();

    let (status, body) = send(&app, get("/api/quote")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "symbols parameter required");

    // present but empty list
    let (status, body) = send(&app, get("/api/quote?symbols=")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = send(&app, get("/api/chart?symbols=AAPL&range=2h")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid range parameter");

    let (status, _) = send(&app, get("/api/news")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/metrics?symbols=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // empty search query returns an empty list
    let (status, body) = send(&app, get("/api/search?q=")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}
