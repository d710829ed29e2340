//! HTTP command surface over [`CoreHandle`]: status, keyword edits,
//! manual check and the monitoring switch.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::relevance::split_keyword_list;
use crate::scheduler::CoreHandle;
use crate::status::CoreStatus;

#[derive(Clone)]
pub struct AppState {
    pub core: CoreHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/keywords", get(list_keywords).put(set_keywords))
        .route("/keywords/add", post(add_keywords))
        .route("/keywords/remove", post(remove_keywords))
        .route("/check", post(check_now))
        .route("/monitoring", post(set_monitoring))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize, Deserialize)]
pub struct KeywordEdit {
    pub changed: usize,
    pub keywords: Vec<String>,
}

/// Either `["a", "b"]` or `"a, b"`.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum KeywordInput {
    List(Vec<String>),
    Text(String),
}

impl KeywordInput {
    fn into_items(self) -> Vec<String> {
        match self {
            KeywordInput::List(v) => v,
            KeywordInput::Text(s) => split_keyword_list(&s),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct MonitoringReq {
    pub enabled: bool,
}

async fn status(State(state): State<AppState>) -> Json<CoreStatus> {
    Json(state.core.status())
}

async fn list_keywords(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.core.list_keywords())
}

async fn set_keywords(
    State(state): State<AppState>,
    Json(items): Json<Vec<String>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.core.set_keywords(&items)?))
}

async fn add_keywords(
    State(state): State<AppState>,
    Json(input): Json<KeywordInput>,
) -> Result<Json<KeywordEdit>, ApiError> {
    let (changed, keywords) = state.core.add_keywords(&input.into_items())?;
    Ok(Json(KeywordEdit { changed, keywords }))
}

async fn remove_keywords(
    State(state): State<AppState>,
    Json(input): Json<KeywordInput>,
) -> Result<Json<KeywordEdit>, ApiError> {
    let (changed, keywords) = state.core.remove_keywords(&input.into_items())?;
    Ok(Json(KeywordEdit { changed, keywords }))
}

async fn check_now(State(state): State<AppState>) -> StatusCode {
    state.core.request_check();
    StatusCode::ACCEPTED
}

async fn set_monitoring(
    State(state): State<AppState>,
    Json(req): Json<MonitoringReq>,
) -> Json<MonitoringReq> {
    state.core.set_monitoring(req.enabled);
    Json(MonitoringReq {
        enabled: state.core.monitoring(),
    })
}

/// Keyword persistence failures; the body carries a short message only.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(target: "api", "request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist keywords".to_string(),
        )
            .into_response()
    }
}
