use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rhythmguard_core::{Clock, Questionnaire, Session, SessionKind, StartRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};

type ApiResult<T> = Result<T, ApiError>;

/// Empty bodies are accepted where every field is optional.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_required(body)
}

fn parse_required<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidJson(e.to_string()))
}

/// A session plus its derived expiry, for polling clients.
#[derive(Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    session: Session,
    expires_at: DateTime<Utc>,
    remaining_seconds: i64,
}

impl SessionView {
    fn new(session: Session, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: session.expires_at(),
            remaining_seconds: session.remaining_seconds(now),
            session,
        }
    }
}

#[derive(Serialize)]
struct HealthInfo {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthInfo {
        ok: true,
        service: "rhythmguard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn start(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request: StartRequest = parse_required(&body)?;
    let session = state.machine.start(request).await?;
    let now = state.machine.clock().now();
    Ok((StatusCode::CREATED, Json(SessionView::new(session, now))).into_response())
}

pub async fn complete(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let answers: Questionnaire = parse_body(&body)?;
    let result = state.machine.complete_current(answers).await?;
    Ok(Json(result).into_response())
}

#[derive(Serialize)]
struct AbandonResponse {
    ok: bool,
    session_id: String,
}

pub async fn abandon(State(state): State<AppState>) -> ApiResult<Response> {
    let session = state.machine.abandon().await?;
    Ok(Json(AbandonResponse {
        ok: true,
        session_id: session.id,
    })
    .into_response())
}

#[derive(Deserialize)]
pub struct CanStartQuery {
    #[serde(default)]
    kind: Option<String>,
}

pub async fn can_start(
    State(state): State<AppState>,
    Query(query): Query<CanStartQuery>,
) -> ApiResult<Response> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(raw) => Some(
            raw.parse::<SessionKind>()
                .map_err(|e| ApiError::Core(e.into()))?,
        ),
        None => None,
    };
    Ok(Json(state.machine.can_start(kind).await?).into_response())
}

pub async fn current(State(state): State<AppState>) -> ApiResult<Response> {
    let now = state.machine.clock().now();
    let view = state
        .machine
        .current()
        .await?
        .map(|session| SessionView::new(session, now));
    Ok(Json(view).into_response())
}

pub async fn today(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.machine.today().await?).into_response())
}

pub async fn gate_check(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.machine.break_status().await?).into_response())
}

pub async fn state(State(state): State<AppState>) -> ApiResult<Response> {
    Ok(Json(state.machine.app_state().await?).into_response())
}
