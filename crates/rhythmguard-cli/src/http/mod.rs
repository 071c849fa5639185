//! HTTP surface over the session machine.

mod routes;

use std::sync::Arc;

use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rhythmguard_core::{CoreError, Rejection, SessionMachine};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<SessionMachine>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/session/start", post(routes::start))
        .route("/session/complete", post(routes::complete))
        .route("/session/abandon", post(routes::abandon))
        .route("/session/can-start", get(routes::can_start))
        .route("/session/current", get(routes::current))
        .route("/sessions/today", get(routes::today))
        .route("/gate-check", get(routes::gate_check))
        .route("/state", get(routes::state))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
    message: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    InvalidJson(String),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "invalid_json"),
            ApiError::Core(e) => match e {
                CoreError::Rejected(r @ Rejection::AlreadyActive { .. }) => {
                    (StatusCode::CONFLICT, r.code())
                }
                CoreError::Rejected(r) => (StatusCode::BAD_REQUEST, r.code()),
                CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                CoreError::Gate(_) => (StatusCode::BAD_GATEWAY, "gate_error"),
                CoreError::NoActiveSession => (StatusCode::NOT_FOUND, "no_active_session"),
                CoreError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
                CoreError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
                CoreError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "db_error"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::Core(e) if status.is_server_error() => {
                error!(error = %e, code, "request failed");
                "internal error".to_string()
            }
            ApiError::Core(e) => {
                debug!(error = %e, code, "request refused");
                e.to_string()
            }
            ApiError::InvalidJson(message) => message.clone(),
        };

        (
            status,
            Json(ErrResponse {
                ok: false,
                error: code,
                message,
            }),
        )
            .into_response()
    }
}
