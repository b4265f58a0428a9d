use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::profile::models::{CandidateProfile, ProfileTrigger};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub trigger: ProfileTrigger,
    /// `false` starts the update and returns 202; poll the latest profile afterwards.
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

#[derive(Serialize)]
pub struct ProfileAccepted {
    pub candidate_id: Uuid,
    pub stage: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ProfileHistoryResponse {
    pub candidate_id: Uuid,
    pub versions: Vec<CandidateProfile>,
}

/// POST /api/v1/candidates/:id/profile/updates
pub async fn handle_request_update(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Response, AppError> {
    if !req.wait {
        let stage = req.trigger.stage().to_string();
        state.profiles.spawn_profile_update(candidate_id, req.trigger)?;
        let accepted = ProfileAccepted {
            candidate_id,
            stage,
            status: "accepted",
        };
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    let profile = state
        .profiles
        .request_profile_update(candidate_id, req.trigger)
        .await?;
    Ok(Json(CandidateProfile::clone(&profile)).into_response())
}

/// GET /api/v1/candidates/:id/profile
pub async fn handle_get_latest(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<CandidateProfile>, AppError> {
    Ok(Json(state.profiles.latest(candidate_id).await?))
}

/// GET /api/v1/candidates/:id/profile/history
pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<ProfileHistoryResponse>, AppError> {
    let versions = state.profiles.history(candidate_id).await?;
    Ok(Json(ProfileHistoryResponse {
        candidate_id,
        versions,
    }))
}
