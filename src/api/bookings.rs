//! Booking endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::Actor;
use crate::api::AppState;
use crate::database::booking_repository::{Booking, BookingStatus, BookingStatusEvent};
use crate::error::AppResult;
use crate::services::booking_lifecycle::CreateBooking;
use crate::services::payment_flow::{InitializePayment, PaymentInitialization, VerifiedPayment};

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: Uuid,
    pub availability_slot_id: Option<Uuid>,
    pub requested_language: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Booking plus derived flags the clients need.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    #[serde(flatten)]
    pub booking: Booking,
    pub can_open_chat: bool,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        let can_open_chat = booking.can_open_chat();
        Self {
            booking,
            can_open_chat,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: BookingStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct InitializePaymentRequest {
    pub payment_method: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct VerifyPaymentRequest {
    pub order_tracking_id: Option<String>,
    pub merchant_reference: Option<String>,
}

pub async fn create_booking(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateBookingRequest>,
) -> AppResult<(StatusCode, Json<BookingResponse>)> {
    let booking = state
        .lifecycle
        .create_booking(
            &actor,
            CreateBooking {
                service_id: body.service_id,
                availability_slot_id: body.availability_slot_id,
                requested_language: body.requested_language,
                travel_date: body.travel_date,
                notes: body.notes,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<Json<Vec<BookingResponse>>> {
    let bookings = state.lifecycle.list_bookings(&actor).await?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

pub async fn get_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state.lifecycle.get_booking(&actor, id).await?;
    Ok(Json(booking.into()))
}

pub async fn list_status_events(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<BookingStatusEvent>>> {
    let events = state.lifecycle.list_status_events(&actor, id).await?;
    Ok(Json(events))
}

pub async fn update_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusRequest>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state
        .lifecycle
        .update_status(&actor, id, body.status, body.note)
        .await?;
    Ok(Json(booking.into()))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state.lifecycle.cancel_booking(&actor, id, body.reason).await?;
    Ok(Json(booking.into()))
}

pub async fn release_escrow(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state.lifecycle.release_escrow(&actor, id).await?;
    Ok(Json(booking.into()))
}

pub async fn admin_refund(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundRequest>,
) -> AppResult<Json<BookingResponse>> {
    let booking = state.lifecycle.admin_refund(&actor, id, body.note).await?;
    Ok(Json(booking.into()))
}

pub async fn initialize_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<InitializePaymentRequest>,
) -> AppResult<Json<PaymentInitialization>> {
    let initialization = state
        .payments
        .initialize_payment(
            &actor,
            id,
            InitializePayment {
                payment_method: body.payment_method,
                callback_url: body.callback_url,
            },
        )
        .await?;
    Ok(Json(initialization))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<VerifyPaymentRequest>,
) -> AppResult<Json<VerifiedPayment>> {
    let verified = state
        .payments
        .verify_payment(&actor, id, body.order_tracking_id, body.merchant_reference)
        .await?;
    Ok(Json(verified))
}
