//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::UserId;
use crate::http::middleware::{require_auth, require_internal, AuthenticatedUser};
use crate::matchmaking::{MatchmakerStats, MatchmakingError};
use crate::tournament::Tournament;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may hold several comma-separated origins
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    let protected_routes = Router::new()
        .route("/game/create", post(create_game_handler))
        .route("/game/join/:code", post(join_game_handler))
        .route("/game/leave", post(leave_game_handler))
        .route("/game/code", get(game_code_handler))
        .route("/tournament/create", post(create_tournament_handler))
        .route("/tournament/join/:code", post(join_tournament_handler))
        .route("/tournament/leave", post(leave_tournament_handler))
        .route("/tournament/current", get(current_tournament_handler))
        .route("/tournament/:code", get(tournament_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let internal_routes = Router::new()
        .route("/internal/cleanup/:user_id", post(cleanup_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    stats: MatchmakerStats,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        stats: state.matchmaker.stats(),
    })
}

// ============================================================================
// Game endpoints
// ============================================================================

#[derive(Serialize)]
struct CodeResponse {
    code: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn create_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CodeResponse>, AppError> {
    let code = state.matchmaker.create_session(auth.user_id)?;
    Ok(Json(CodeResponse { code }))
}

async fn join_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    state.matchmaker.join_session(&code, auth.user_id)?;
    Ok(Json(StatusResponse { status: "joined" }))
}

async fn leave_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<StatusResponse> {
    state.matchmaker.leave_session(auth.user_id).await;
    Json(StatusResponse { status: "left" })
}

async fn game_code_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CodeResponse>, AppError> {
    let code = state.matchmaker.assigned_code(auth.user_id)?;
    Ok(Json(CodeResponse { code }))
}

// ============================================================================
// Tournament endpoints
// ============================================================================

async fn create_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CodeResponse>, AppError> {
    let code = state.matchmaker.create_tournament(auth.user_id)?;
    Ok(Json(CodeResponse { code }))
}

async fn join_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<Tournament>, AppError> {
    state.matchmaker.join_tournament(&code, auth.user_id)?;
    Ok(Json(state.matchmaker.tournament(&code)?))
}

async fn leave_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<StatusResponse> {
    state.matchmaker.leave_tournament(auth.user_id).await;
    Json(StatusResponse { status: "left" })
}

async fn current_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CodeResponse>, AppError> {
    let code = state.matchmaker.user_tournament(auth.user_id)?;
    Ok(Json(CodeResponse { code }))
}

async fn tournament_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Tournament>, AppError> {
    Ok(Json(state.matchmaker.tournament(&code)?))
}

// ============================================================================
// Internal endpoints
// ============================================================================

async fn cleanup_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<StatusResponse> {
    state.matchmaker.cleanup(user_id).await;
    Json(StatusResponse { status: "ok" })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl From<MatchmakingError> for AppError {
    fn from(e: MatchmakingError) -> Self {
        match e {
            MatchmakingError::NotFound => AppError::NotFound(e.to_string()),
            MatchmakingError::Conflict => AppError::Conflict(e.to_string()),
            MatchmakingError::Forbidden => AppError::Forbidden(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::http::middleware::{sign_token, Claims, INTERNAL_SECRET_HEADER};
    use crate::util::time::unix_millis;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> (AppState, Router) {
        let state = AppState::new(Config::for_tests());
        let router = build_router(state.clone());
        (state, router)
    }

    fn token(state: &AppState, user_id: UserId) -> String {
        let claims = Claims {
            user_id,
            login: format!("user{user_id}"),
            exp: unix_millis() / 1000 + 600,
            iat: unix_millis() / 1000,
        };
        sign_token(&claims, &state.config.jwt_secret)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (_, router) = app();
        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn game_routes_require_token() {
        let (_, router) = app();
        let (status, _) = call(&router, Method::POST, "/game/create", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&router, Method::POST, "/game/create", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn join_status_mapping() {
        let (state, router) = app();
        let (host, guest, third) = (token(&state, 1), token(&state, 2), token(&state, 3));

        let (status, body) = call(&router, Method::POST, "/game/create", Some(&host)).await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap().to_string();

        let (status, _) = call(&router, Method::POST, "/game/create", Some(&host)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&router, Method::POST, "/game/join/ZZZZZZ", Some(&guest)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/game/join/{code}");
        let (status, _) = call(&router, Method::POST, &uri, Some(&guest)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, Method::POST, &uri, Some(&third)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&router, Method::GET, "/game/code", Some(&guest)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], code.as_str());

        let (status, _) = call(&router, Method::POST, "/game/leave", Some(&guest)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, Method::GET, "/game/code", Some(&host)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tournament_routes() {
        let (state, router) = app();
        let creator = token(&state, 1);
        let (status, body) = call(&router, Method::POST, "/tournament/create", Some(&creator)).await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap().to_string();

        let uri = format!("/tournament/{code}");
        let (status, body) = call(&router, Method::GET, &uri, Some(&creator)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");

        let joiner = token(&state, 2);
        let uri = format!("/tournament/join/{}", code.to_lowercase());
        let (status, body) = call(&router, Method::POST, &uri, Some(&joiner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["participants"][1], 2);

        let (status, body) = call(&router, Method::GET, "/tournament/current", Some(&joiner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], code.as_str());

        // Semifinal 1 is full, so its session opens
        let uri = format!("/tournament/{code}");
        let (status, body) = call(&router, Method::GET, &uri, Some(&joiner)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ongoing");
        assert_eq!(body["matches"][0]["status"], "ongoing");

        let (status, _) = call(&router, Method::POST, "/tournament/leave", Some(&joiner)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, Method::GET, "/tournament/current", Some(&joiner)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cleanup_requires_internal_secret() {
        let (state, router) = app();
        state.matchmaker.create_session(7).unwrap();

        let (status, _) = call(&router, Method::POST, "/internal/cleanup/7", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.matchmaker.assigned_code(7).is_ok());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/internal/cleanup/7")
            .header(INTERNAL_SECRET_HEADER, state.config.internal_secret.as_str())
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.matchmaker.assigned_code(7).is_err());

        // Unknown users are fine too
        let request = Request::builder()
            .method(Method::POST)
            .uri("/internal/cleanup/99")
            .header(INTERNAL_SECRET_HEADER, state.config.internal_secret.as_str())
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
