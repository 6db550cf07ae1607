//! Dispute endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::auth::Actor;
use crate::api::AppState;
use crate::database::dispute_repository::{AdminDecision, Dispute};
use crate::error::AppResult;
use crate::services::dispute_resolution::OpenDispute;

#[derive(Debug, Deserialize)]
pub struct OpenDisputeRequest {
    pub booking_id: Uuid,
    pub reason: String,
    pub requested_resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: AdminDecision,
    pub note: Option<String>,
}

pub async fn open_dispute(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<OpenDisputeRequest>,
) -> AppResult<(StatusCode, Json<Dispute>)> {
    let dispute = state
        .disputes
        .open_dispute(
            &actor,
            OpenDispute {
                booking_id: body.booking_id,
                reason: body.reason,
                requested_resolution: body.requested_resolution,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(dispute)))
}

pub async fn list_disputes(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<Dispute>>> {
    let disputes = state.disputes.list_disputes(&actor).await?;
    Ok(Json(disputes))
}

pub async fn get_dispute(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Dispute>> {
    let dispute = state.disputes.get_dispute(&actor, id).await?;
    Ok(Json(dispute))
}

pub async fn move_to_review(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Dispute>> {
    let dispute = state.disputes.move_to_review(&actor, id).await?;
    Ok(Json(dispute))
}

pub async fn admin_decision(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionRequest>,
) -> AppResult<Json<Dispute>> {
    let dispute = state
        .disputes
        .admin_decision(&actor, id, body.decision, body.note)
        .await?;
    Ok(Json(dispute))
}
