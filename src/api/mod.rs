pub mod auth;
pub mod bookings;
pub mod disputes;
pub mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::health;
use crate::services::booking_lifecycle::BookingLifecycleService;
use crate::services::dispute_resolution::DisputeResolutionService;
use crate::services::payment_flow::PaymentFlowService;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<BookingLifecycleService>,
    pub payments: Arc<PaymentFlowService>,
    pub disputes: Arc<DisputeResolutionService>,
    pub pool: PgPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route(
            "/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/bookings/{id}", get(bookings::get_booking))
        .route("/bookings/{id}/events", get(bookings::list_status_events))
        .route("/bookings/{id}/status", post(bookings::update_status))
        .route("/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route(
            "/bookings/{id}/release-escrow",
            post(bookings::release_escrow),
        )
        .route("/bookings/{id}/refund", post(bookings::admin_refund))
        .route(
            "/bookings/{id}/payments/initialize",
            post(bookings::initialize_payment),
        )
        .route(
            "/bookings/{id}/payments/verify",
            post(bookings::verify_payment),
        )
        .route(
            "/webhooks/payments",
            get(webhooks::payment_webhook_get).post(webhooks::payment_webhook_post),
        )
        .route(
            "/disputes",
            post(disputes::open_dispute).get(disputes::list_disputes),
        )
        .route("/disputes/{id}", get(disputes::get_dispute))
        .route("/disputes/{id}/review", post(disputes::move_to_review))
        .route("/disputes/{id}/decision", post(disputes::admin_decision))
        .with_state(state)
}
