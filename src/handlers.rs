use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, State};
use axum::{Extension, Form, Json};
use validator::Validate;

use crate::client_ip::{ClientIp, ClientIpResolver};
use crate::error::{ApiError, ApiResult};
use crate::health::{HealthChecker, HealthStatus};
use crate::notes::NoteService;
use crate::rate_limiter::RateLimiter;
use crate::record::Record;
use crate::response::{ApiResponse, NoteStatus};
use crate::validation::{validate_note_id, NoteForm, VerifyForm};

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub notes: Arc<NoteService>,
    pub health: Arc<HealthChecker>,
    /// Gate for note lookups and verification.
    pub read_limiter: RateLimiter,
    /// Gate for note creation.
    pub write_limiter: RateLimiter,
    pub resolver: Arc<ClientIpResolver>,
}

/// `POST /api/note`
pub async fn post_note(
    State(state): State<AppState>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    form: Result<Form<NoteForm>, FormRejection>,
) -> ApiResult<Json<ApiResponse<Vec<String>>>> {
    let Form(form) = form.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    let request = form.into_request()?;

    tracing::info!(client_ip = %client_ip, links = request.num_links, "post_note called");

    let ids = state.notes.create(&request).await?;
    Ok(Json(ApiResponse::success("Note created!", ids)))
}

/// `GET /api/note/:id`: metadata only, never the ciphertext.
pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<NoteStatus>>> {
    validate_note_id(&id)?;

    let status = state.notes.status(&id).await?;
    Ok(Json(ApiResponse::success("Found note", status)))
}

/// `POST /api/note/:id/verify`: release the note to a client that proves
/// it knows the passphrase.
pub async fn verify_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    form: Result<Form<VerifyForm>, FormRejection>,
) -> ApiResult<Json<ApiResponse<Record>>> {
    validate_note_id(&id)?;
    let Form(form) = form.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    form.validate()?;

    tracing::info!(id = %id, client_ip = %client_ip, "verify_note called");

    let record = state.notes.open(&id, &client_ip, &form.verify_hash).await?;
    Ok(Json(ApiResponse::success("Found note", record)))
}

/// `GET /api/health`
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let status = state.health.check_health().await;
    Json(ApiResponse::success("Alive", status))
}
