//! Admin REST API handlers.
//!
//! CRUD for bridges and masquerades, settings (which restart the bridge),
//! and the recent log feed read by the dashboard.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::models::{
    Bridge, BridgePatch, LogEntry, LogLevel, Masquerade, MasqueradePatch, NewBridge,
    NewMasquerade, Settings, SettingsPatch,
};
use crate::error::RelayError;
use crate::state::AppState;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Error response for admin endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed to parse or validate. 400.
    Validation(String),
    /// Anything else. 500 with the error message.
    Internal(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": { "name": "ValidationError", "message": message }
                })),
            )
                .into_response(),
            Self::Internal(message) => {
                tracing::error!(error = message.as_str(), "[Bridge] Admin request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": message })),
                )
                    .into_response()
            }
        }
    }
}

/// JSON body whose rejections use the validation error shape.
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

/// All `/api` routes plus `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/bridges", get(list_bridges).post(create_bridge))
        .route(
            "/api/bridges/:id",
            get(get_bridge).patch(update_bridge).delete(delete_bridge),
        )
        .route("/api/bridges/:id/masquerades", get(list_masquerades))
        .route("/api/masquerades", post(create_masquerade))
        .route(
            "/api/masquerades/:id",
            get(get_masquerade)
                .patch(update_masquerade)
                .delete(delete_masquerade),
        )
        .route("/api/settings", get(get_settings).patch(update_settings))
        .route("/api/logs", get(list_logs))
        .route("/health", get(health))
        .with_state(state)
}

// ── Bridges ──────────────────────────────────────────────────────────────────

/// GET /api/bridges
pub async fn list_bridges(State(state): State<AppState>) -> Json<Vec<Bridge>> {
    Json(state.store.list_bridges())
}

/// POST /api/bridges
pub async fn create_bridge(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<NewBridge>,
) -> Json<Bridge> {
    Json(state.store.create_bridge(body))
}

/// GET /api/bridges/:id
pub async fn get_bridge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Bridge>, ApiError> {
    let bridge = state
        .store
        .get_bridge(id)
        .ok_or(RelayError::NotFound("Bridge"))?;
    Ok(Json(bridge))
}

/// PATCH /api/bridges/:id
pub async fn update_bridge(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(body): ValidJson<BridgePatch>,
) -> Result<Json<Bridge>, ApiError> {
    Ok(Json(state.store.update_bridge(id, body)?))
}

/// DELETE /api/bridges/:id
pub async fn delete_bridge(State(state): State<AppState>, Path(id): Path<i64>) -> StatusCode {
    state.store.delete_bridge(id);
    StatusCode::NO_CONTENT
}

// ── Masquerades ─────────────────────────────────────────────────────────────

/// GET /api/bridges/:id/masquerades
pub async fn list_masquerades(
    State(state): State<AppState>,
    Path(bridge_id): Path<i64>,
) -> Json<Vec<Masquerade>> {
    Json(state.store.masquerades_for_bridge(bridge_id))
}

/// POST /api/masquerades
pub async fn create_masquerade(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<NewMasquerade>,
) -> Json<Masquerade> {
    Json(state.store.create_masquerade(body))
}

/// GET /api/masquerades/:id
pub async fn get_masquerade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Masquerade>, ApiError> {
    let masquerade = state
        .store
        .get_masquerade(id)
        .ok_or(RelayError::NotFound("Masquerade"))?;
    Ok(Json(masquerade))
}

/// PATCH /api/masquerades/:id
pub async fn update_masquerade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(body): ValidJson<MasqueradePatch>,
) -> Result<Json<Masquerade>, ApiError> {
    Ok(Json(state.store.update_masquerade(id, body)?))
}

/// DELETE /api/masquerades/:id
pub async fn delete_masquerade(State(state): State<AppState>, Path(id): Path<i64>) -> StatusCode {
    state.store.delete_masquerade(id);
    StatusCode::NO_CONTENT
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.store.settings())
}

/// PATCH /api/settings. Responds once the bridge has been re-initialized.
pub async fn update_settings(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<SettingsPatch>,
) -> Json<Settings> {
    state.store.log(
        LogLevel::Info,
        "Updating settings and reinitializing bridge",
        Some(json!({
            "discordTokenPresent": body.discord_token.as_deref().is_some_and(|t| !t.is_empty()),
            "revoltTokenPresent": body.revolt_token.as_deref().is_some_and(|t| !t.is_empty()),
        })),
    );
    let settings = state.store.update_settings(body);
    let outcome = state.supervisor.initialize().await;
    tracing::info!(?outcome, "[Bridge] Re-initialized after settings change");
    Json(settings)
}

// ── Logs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/logs?limit=N
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(state.store.logs(query.limit))
}

// ── Health ───────────────────────────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let bridge = match state.supervisor.status().await {
        Some(status) => json!({
            "running": true,
            "discordReady": status.discord_ready,
            "revoltReady": status.revolt_ready,
        }),
        None => json!({ "running": false }),
    };
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "bridge": bridge,
    }))
}
