//! Dispute intake and admin resolution.
//!
//! A booking carries at most one dispute for its lifetime; the unique
//! constraint on `disputes.booking_id` is the enforcement point and its
//! violation surfaces as a conflict. Escrow side effects of a decision run in
//! the same transaction as the dispute update.

use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::Actor;
use crate::database::booking_repository::{
    Booking, BookingRepository, BookingStatus, EscrowStatus,
};
use crate::database::dispute_repository::{
    AdminDecision, Dispute, DisputeRepository, DisputeStatus, RequestedResolution,
};
use crate::database::error::DatabaseError;
use crate::database::marketplace_repository::MarketplaceRepository;
use crate::database::slot_repository::SlotRepository;
use crate::error::{AppError, AppResult, DomainError, PermissionError, ValidationError};
use crate::services::notification::NotificationService;

#[derive(Debug, Clone)]
pub struct OpenDispute {
    pub booking_id: Uuid,
    pub reason: String,
    pub requested_resolution: Option<String>,
}

pub struct DisputeResolutionService {
    pool: PgPool,
    disputes: Arc<DisputeRepository>,
    bookings: Arc<BookingRepository>,
    slots: Arc<SlotRepository>,
    marketplace: Arc<MarketplaceRepository>,
    notifications: Arc<NotificationService>,
}

impl DisputeResolutionService {
    pub fn new(
        pool: PgPool,
        disputes: Arc<DisputeRepository>,
        bookings: Arc<BookingRepository>,
        slots: Arc<SlotRepository>,
        marketplace: Arc<MarketplaceRepository>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            pool,
            disputes,
            bookings,
            slots,
            marketplace,
            notifications,
        }
    }

    /// Open a dispute on a booking the actor participates in. Disputes are
    /// not allowed before the provider has acted on the request.
    pub async fn open_dispute(&self, actor: &Actor, input: OpenDispute) -> AppResult<Dispute> {
        let booking = self.find_booking(input.booking_id).await?;
        self.ensure_participant(actor, &booking).await?;

        if booking.status == BookingStatus::Requested {
            return Err(AppError::domain(DomainError::DisputeTooEarly));
        }
        if input.reason.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reason".to_string(),
            }));
        }

        let requested_resolution = match input.requested_resolution.as_deref() {
            None | Some("") => RequestedResolution::Other,
            Some(raw) => raw.to_uppercase().parse().map_err(|_| {
                AppError::validation(ValidationError::InvalidValue {
                    field: "requested_resolution".to_string(),
                    reason: format!("'{}' is not a known resolution", raw),
                })
            })?,
        };

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let dispute = self
            .disputes
            .insert(
                &mut tx,
                booking.id,
                actor.user_id,
                input.reason.trim(),
                requested_resolution,
            )
            .await
            .map_err(|err| {
                if err.is_unique_violation() {
                    AppError::domain(DomainError::DisputeAlreadyOpen {
                        booking_id: booking.id,
                    })
                } else {
                    err.into()
                }
            })?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(
            dispute_id = %dispute.id,
            booking_id = %booking.id,
            opened_by = %actor.user_id,
            "dispute opened"
        );
        self.notifications
            .notify_booking_participants(&booking, "dispute_opened")
            .await;

        Ok(dispute)
    }

    pub async fn get_dispute(&self, actor: &Actor, dispute_id: Uuid) -> AppResult<Dispute> {
        let dispute = self.find_dispute(dispute_id).await?;
        if !actor.is_admin() {
            let booking = self.find_booking(dispute.booking_id).await?;
            self.ensure_participant(actor, &booking).await?;
        }
        Ok(dispute)
    }

    pub async fn list_disputes(&self, actor: &Actor) -> AppResult<Vec<Dispute>> {
        let disputes = if actor.is_admin() {
            self.disputes.list_all().await?
        } else {
            self.disputes.list_for_participant(actor.user_id).await?
        };
        Ok(disputes)
    }

    /// Move an open dispute into admin review.
    pub async fn move_to_review(&self, actor: &Actor, dispute_id: Uuid) -> AppResult<Dispute> {
        if !actor.is_admin() {
            return Err(AppError::permission(PermissionError::AdminOnly {
                action: "review disputes".to_string(),
            }));
        }

        let dispute = self.find_dispute(dispute_id).await?;
        if dispute.status != DisputeStatus::Open {
            return Err(AppError::validation(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("dispute is {} and cannot enter review", dispute.status),
            }));
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let dispute = self
            .disputes
            .set_status(&mut tx, dispute.id, DisputeStatus::UnderReview)
            .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(dispute_id = %dispute.id, reviewer = %actor.user_id, "dispute under review");
        let booking = self.find_booking(dispute.booking_id).await?;
        self.notifications
            .notify_booking_participants(&booking, "dispute_under_review")
            .await;

        Ok(dispute)
    }

    /// Apply the admin's ruling. Refund approvals force escrow to REFUNDED
    /// and cancel the booking unless it already completed; release approvals
    /// force escrow to RELEASED.
    pub async fn admin_decision(
        &self,
        actor: &Actor,
        dispute_id: Uuid,
        decision: AdminDecision,
        note: Option<String>,
    ) -> AppResult<Dispute> {
        if !actor.is_admin() {
            return Err(AppError::permission(PermissionError::AdminOnly {
                action: "decide disputes".to_string(),
            }));
        }

        let outcome = decision.outcome().ok_or_else(|| {
            AppError::validation(ValidationError::InvalidValue {
                field: "decision".to_string(),
                reason: "PENDING is not a decision".to_string(),
            })
        })?;

        let dispute = self.find_dispute(dispute_id).await?;
        if dispute.status.is_closed() {
            return Err(AppError::validation(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("dispute is already {}", dispute.status),
            }));
        }

        // Dispute decisions are overrides: a release or refund is forced
        // regardless of the current escrow state.
        let booking = self.find_booking(dispute.booking_id).await?;
        let note = note.unwrap_or_default();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated_booking = match decision {
            AdminDecision::ApproveRefund => {
                Some(self.apply_refund(&mut tx, &booking, actor).await?)
            }
            AdminDecision::ApproveRelease => Some(
                self.bookings
                    .set_escrow_status(&mut tx, booking.id, EscrowStatus::Released)
                    .await?,
            ),
            AdminDecision::PartialRemedy | AdminDecision::RejectClaim => None,
            // Pending is rejected above
            AdminDecision::Pending => None,
        };

        let dispute = self
            .disputes
            .mark_resolved(&mut tx, dispute.id, outcome, decision, &note, actor.user_id)
            .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(
            dispute_id = %dispute.id,
            decision = %decision,
            outcome = %dispute.status,
            decided_by = %actor.user_id,
            "dispute decided"
        );
        let booking = updated_booking.unwrap_or(booking);
        self.notifications
            .notify_booking_participants(&booking, "dispute_decided")
            .await;

        Ok(dispute)
    }

    async fn apply_refund(
        &self,
        conn: &mut sqlx::PgConnection,
        booking: &Booking,
        actor: &Actor,
    ) -> AppResult<Booking> {
        let cancels = !matches!(
            booking.status,
            BookingStatus::Completed | BookingStatus::Cancelled
        );
        let updated = if cancels {
            let updated = self
                .bookings
                .mark_cancelled(
                    conn,
                    booking.id,
                    "Dispute resolved with refund",
                    Some(actor.user_id),
                    EscrowStatus::Refunded,
                )
                .await?;
            self.bookings
                .insert_status_event(
                    conn,
                    booking.id,
                    booking.status,
                    BookingStatus::Cancelled,
                    Some(actor.user_id),
                    "Dispute resolved with refund",
                )
                .await?;
            updated
        } else {
            self.bookings
                .set_escrow_status(conn, booking.id, EscrowStatus::Refunded)
                .await?
        };
        // A refund always frees the slot, even for completed bookings.
        if let Some(slot_id) = booking.availability_slot_id {
            self.slots.release(conn, slot_id, booking.id).await?;
        }
        Ok(updated)
    }

    async fn find_dispute(&self, dispute_id: Uuid) -> AppResult<Dispute> {
        self.disputes
            .find_by_id(dispute_id)
            .await?
            .ok_or_else(|| AppError::domain(DomainError::DisputeNotFound { dispute_id }))
    }

    async fn find_booking(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::BookingNotFound {
                    booking_id: booking_id.to_string(),
                })
            })
    }

    async fn ensure_participant(&self, actor: &Actor, booking: &Booking) -> AppResult<()> {
        if actor.is_admin() || booking.customer_id == actor.user_id {
            return Ok(());
        }
        let provider = self
            .marketplace
            .find_provider(booking.provider_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::ProviderNotFound {
                    provider_id: booking.provider_id,
                })
            })?;
        if provider.user_id == actor.user_id {
            Ok(())
        } else {
            Err(AppError::permission(PermissionError::NotParticipant))
        }
    }
}
