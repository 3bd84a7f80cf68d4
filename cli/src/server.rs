use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use macrotrack_core::remote::{
    EntryDocument, GoalsDocument, RemoteEntry, RemoteStore, parse_entry_key,
};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
pub(crate) struct AppState {
    store: Arc<dyn RemoteStore>,
    api_key: Option<String>,
}

impl AppState {
    pub(crate) fn new(store: Arc<dyn RemoteStore>, api_key: Option<String>) -> Self {
        Self { store, api_key }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn check_principal(principal: &str) -> Result<(), ApiError> {
    if principal.is_empty() || principal.contains('/') {
        return Err(ApiError::BadRequest(format!("Invalid principal '{principal}'")));
    }
    Ok(())
}

fn check_entry_id(id: &str) -> Result<(), ApiError> {
    match parse_entry_key(id) {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest(format!("Entry id '{id}' is not a hyphenated UUID"))),
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn get_goals(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> Result<Json<GoalsDocument>, ApiError> {
    check_principal(&principal)?;
    state
        .store
        .get_goals(&principal)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No goals for '{principal}'")))
}

async fn put_goals(
    State(state): State<AppState>,
    Path(principal): Path<String>,
    Json(doc): Json<GoalsDocument>,
) -> Result<StatusCode, ApiError> {
    check_principal(&principal)?;
    state.store.set_goals(&principal, &doc).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_entries(
    State(state): State<AppState>,
    Path(principal): Path<String>,
) -> Result<Json<Vec<RemoteEntry>>, ApiError> {
    check_principal(&principal)?;
    Ok(Json(state.store.list_entries(&principal).await?))
}

async fn put_entry(
    State(state): State<AppState>,
    Path((principal, id)): Path<(String, String)>,
    Json(doc): Json<EntryDocument>,
) -> Result<StatusCode, ApiError> {
    check_principal(&principal)?;
    check_entry_id(&id)?;
    state.store.set_entry(&principal, &id, &doc).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_entry(
    State(state): State<AppState>,
    Path((principal, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_principal(&principal)?;
    check_entry_id(&id)?;
    state.store.delete_entry(&principal, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Router builder ---

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/users/{principal}/data/goals",
            get(get_goals).put(put_goals),
        )
        .route("/v1/users/{principal}/entries", get(list_entries))
        .route(
            "/v1/users/{principal}/entries/{id}",
            put(put_entry).delete(delete_entry),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// First and last four characters of an API key, for display.
fn key_hint(key: &str) -> (String, String) {
    let head = key.chars().take(4).collect();
    let mut tail: Vec<char> = key.chars().rev().take(4).collect();
    tail.reverse();
    (head, tail.into_iter().collect())
}

pub async fn start_server(
    store: Arc<dyn RemoteStore>,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let app = build_router(AppState::new(store, api_key.clone()));

    match api_key {
        Some(ref key) if new_api_key => {
            eprintln!("Generated new API key: {key}");
            eprintln!("Clients connect with: macrotrack remote set http://<host>:{port} --key {key}");
        }
        Some(ref key) if key.chars().count() >= 8 => {
            let (head, tail) = key_hint(key);
            eprintln!("API key: {head}...{tail} (see api_key file in data directory)");
        }
        Some(_) => eprintln!("API key: (see api_key file in data directory)"),
        None => eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone."),
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    info!(bind, port, "document server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use macrotrack_core::remote::MemoryRemote;
    use tower::ServiceExt;

    const ENTRY_ID: &str = "0b6c6a57-4a5d-4d36-9f0a-3c1a8e1f1e2b";

    fn test_app(api_key: Option<String>) -> Router {
        build_router(AppState::new(Arc::new(MemoryRemote::in_memory()), api_key))
    }

    async fn send(app: &Router, request: axum::http::Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn put_json(uri: &str, body: &serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::put(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/alice/entries")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_wrong_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/alice/entries")
                .header("Authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_correct_key_succeeds() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/alice/entries")
                .header("Authorization", "Bearer test-key-abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app(Some("secret".to_string()));

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/alice/data/goals")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn goals_missing_then_stored() {
        let app = test_app(None);
        let uri = "/v1/users/alice/data/goals";

        let response = send(&app, axum::http::Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let goals = serde_json::json!({
            "carbs": 100.0,
            "protein": 80.0,
            "fat": 50.0,
            "updatedAt": "2024-06-15T08:00:00Z"
        });
        let response = send(&app, put_json(uri, &goals)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, axum::http::Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["carbs"], 100.0);
        assert_eq!(json["fat"], 50.0);
    }

    #[tokio::test]
    async fn entries_put_list_delete() {
        let app = test_app(None);
        let uri = format!("/v1/users/alice/entries/{ENTRY_ID}");
        let doc = serde_json::json!({
            "userId": "alice",
            "date": "2024-06-15T00:00:00Z",
            "mealType": "lunch",
            "foodName": "Rice",
            "carbs": 45.0,
            "protein": 4.0,
            "fat": 0.5,
            "createdAt": "2024-06-15T12:00:00Z"
        });

        let response = send(&app, put_json(&uri, &doc)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/alice/entries")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["id"], ENTRY_ID);
        assert_eq!(json[0]["data"]["foodName"], "Rice");

        for _ in 0..2 {
            let response = send(
                &app,
                axum::http::Request::delete(&uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn entries_are_scoped_per_principal() {
        let app = test_app(None);
        let doc = serde_json::json!({ "foodName": "Rice" });
        send(&app, put_json(&format!("/v1/users/alice/entries/{ENTRY_ID}"), &doc)).await;

        let response = send(
            &app,
            axum::http::Request::get("/v1/users/bob/entries")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn non_uuid_entry_id_is_rejected() {
        let app = test_app(None);
        let response = send(
            &app,
            put_json(
                "/v1/users/alice/entries/not-a-uuid",
                &serde_json::json!({ "foodName": "Rice" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("not a hyphenated UUID"));
    }

    #[tokio::test]
    async fn uppercase_entry_id_is_accepted() {
        let app = test_app(None);
        let doc = serde_json::json!({ "foodName": "Rice" });
        let upper = ENTRY_ID.to_uppercase();
        let response = send(&app, put_json(&format!("/v1/users/alice/entries/{upper}"), &doc)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let simple = ENTRY_ID.replace('-', "");
        let response = send(&app, put_json(&format!("/v1/users/alice/entries/{simple}"), &doc)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn key_hint_counts_characters() {
        assert_eq!(
            key_hint("abcd1234wxyz"),
            ("abcd".to_string(), "wxyz".to_string())
        );
        assert_eq!(
            key_hint("ключ-секрет"),
            ("ключ".to_string(), "крет".to_string())
        );
    }

    #[tokio::test]
    async fn encoded_slash_in_principal_is_rejected() {
        let app = test_app(None);
        let response = send(
            &app,
            axum::http::Request::get("/v1/users/a%2Fb/entries")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = test_app(None);
        let response = send(
            &app,
            axum::http::Request::get("/api/meals").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
