//! Admin REST API for the gateway
//!
//! This module provides HTTP endpoints for:
//! - Health and counters
//! - Learned-key inspection and invalidation
//! - Breaker inspection and reset
//! - Connected sessions
//!
//! The API is built with Axum and shares [`AppState`] with the TCP listener.

pub mod error;
pub mod response;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::net::session::SessionInfo;
use crate::resolver::breaker::OpenBreaker;
use crate::resolver::Identity;
use crate::AppState;

use self::error::ApiError;
use self::response::{
    ApiResponse, HealthResponse, LearnedKeyInfo, PoolStats, SessionStats, StatsResponse,
};

/// API version prefix
pub const API_VERSION: &str = "v1";

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/sessions", get(list_sessions))
        .route("/keys", get(list_keys))
        .route("/keys/:identity", delete(invalidate_key))
        .route("/breakers", get(list_breakers))
        .route("/breaker/:identity", delete(reset_breaker));

    Router::new()
        .nest(&format!("/api/{}", API_VERSION), api_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_identity(raw: &str) -> Result<Identity, ApiError> {
    raw.parse().map_err(ApiError::InvalidInput)
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(
        "OK",
        HealthResponse {
            status: "ok",
            version: crate::VERSION,
            uptime_secs: state.uptime().as_secs(),
            store: state.store.name(),
        },
    ))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatsResponse>> {
    let by_phase: BTreeMap<String, usize> = state
        .session_manager
        .count_by_phase()
        .into_iter()
        .map(|(phase, count)| (phase.name().to_string(), count))
        .collect();

    Json(ApiResponse::success(
        "Gateway statistics",
        StatsResponse {
            sessions: SessionStats {
                active: state.session_manager.count(),
                total_created: state.session_manager.total_created(),
                bishops: state.session_manager.bishop_count(),
                by_phase,
            },
            key_cache: state.key_cache.stats(),
            open_breakers: state.tracker.open_breakers().len(),
            tracked_identities: state.tracker.tracked(),
            pool: PoolStats {
                in_flight: state.pool.in_flight(),
                active: state.pool.active(),
                max_concurrent: state.pool.max_concurrent(),
                closed: state.pool.is_closed(),
            },
        },
    ))
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<SessionInfo>>> {
    let sessions = state.session_manager.snapshot();
    Json(ApiResponse::success(
        format!("{} active sessions", sessions.len()),
        sessions,
    ))
}

async fn list_keys(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<LearnedKeyInfo>>> {
    let keys: Vec<LearnedKeyInfo> = state
        .key_cache
        .snapshot()
        .iter()
        .map(LearnedKeyInfo::from)
        .collect();
    Json(ApiResponse::success(format!("{} learned keys", keys.len()), keys))
}

async fn invalidate_key(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<()> {
    let identity = parse_identity(&raw)?;
    let cache = state.key_cache.clone();
    let target = identity.clone();
    let removed = tokio::task::spawn_blocking(move || cache.invalidate(&target))
        .await
        .map_err(|e| ApiError::InternalError(format!("Key invalidation failed: {}", e)))?;
    if !removed {
        return Err(ApiError::NotFound(format!("Learned key for {}", identity)));
    }
    info!(identity = %identity, "Learned key invalidated via API");
    Ok(Json(ApiResponse::<()>::success_message(format!(
        "Key for {} invalidated",
        identity
    ))))
}

async fn list_breakers(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<OpenBreaker>>> {
    let open = state.tracker.open_breakers();
    Json(ApiResponse::success(format!("{} open breakers", open.len()), open))
}

async fn reset_breaker(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> ApiResult<()> {
    let identity = parse_identity(&raw)?;
    if !state.tracker.reset(&identity) {
        return Err(ApiError::NotFound(format!("Breaker record for {}", identity)));
    }
    info!(identity = %identity, "Breaker reset via API");
    Ok(Json(ApiResponse::<()>::success_message(format!(
        "Breaker for {} reset",
        identity
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::crypto::XorKey;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(AppState::new(GatewayConfig::default(), shutdown_tx).unwrap())
    }

    async fn call(
        state: Arc<AppState>,
        method: Method,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(test_state(), Method::GET, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["store"], "memory");
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let (status, body) = call(test_state(), Method::GET, "/api/v1/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["sessions"]["active"], 0);
        assert_eq!(body["data"]["keyCache"]["entries"], 0);
        assert_eq!(body["data"]["pool"]["maxConcurrent"], 2);
        assert_eq!(body["data"]["trackedIdentities"], 0);
    }

    #[tokio::test]
    async fn test_key_listing_and_invalidation() {
        let state = test_state();
        state
            .key_cache
            .store(Identity::username("tester_3"), XorKey::repeated(0x11));

        let (_, listed) = call(state.clone(), Method::GET, "/api/v1/keys").await;
        assert_eq!(listed["data"][0]["identity"], "user:tester_3");
        assert!(listed["data"][0].get("key").is_none());

        let (status, _) = call(state.clone(), Method::DELETE, "/api/v1/keys/user:tester_3").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.key_cache.is_empty());

        let (status, body) = call(state, Method::DELETE, "/api/v1/keys/user:tester_3").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_bad_identity_is_rejected() {
        let (status, body) = call(test_state(), Method::DELETE, "/api/v1/breaker/nonsense").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_breaker_reset() {
        let state = test_state();
        let identity: Identity = "addr:10.0.0.9".parse().unwrap();
        state.tracker.record_failure(&identity);

        let uri = "/api/v1/breaker/addr:10.0.0.9";
        let (status, _) = call(state.clone(), Method::DELETE, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.tracker.record(&identity).is_none());
    }
}
