//! Booking lifecycle: creation, status transitions, cancellation, and manual
//! escrow actions.
//!
//! Every mutation runs in one transaction so a booking row, its audit event,
//! and the slot hold can never disagree. Notifications go out after commit.

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::{Actor, Role};
use crate::database::booking_repository::{
    Booking, BookingRepository, BookingStatus, BookingStatusEvent, EscrowStatus, NewBooking,
};
use crate::database::error::DatabaseError;
use crate::database::marketplace_repository::MarketplaceRepository;
use crate::database::slot_repository::SlotRepository;
use crate::error::{AppError, AppResult, DomainError, PermissionError, ValidationError};
use crate::services::fees::price_booking;
use crate::services::notification::NotificationService;

/// Service-level input for booking creation; amounts are never accepted from
/// the caller.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub service_id: Uuid,
    pub availability_slot_id: Option<Uuid>,
    pub requested_language: Option<String>,
    pub travel_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub struct BookingLifecycleService {
    pool: PgPool,
    bookings: Arc<BookingRepository>,
    slots: Arc<SlotRepository>,
    marketplace: Arc<MarketplaceRepository>,
    notifications: Arc<NotificationService>,
}

impl BookingLifecycleService {
    pub fn new(
        pool: PgPool,
        bookings: Arc<BookingRepository>,
        slots: Arc<SlotRepository>,
        marketplace: Arc<MarketplaceRepository>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            pool,
            bookings,
            slots,
            marketplace,
            notifications,
        }
    }

    pub async fn create_booking(&self, actor: &Actor, input: CreateBooking) -> AppResult<Booking> {
        let service = self
            .marketplace
            .find_service(input.service_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::ServiceNotFound {
                    service_id: input.service_id,
                })
            })?;
        if !service.is_active {
            return Err(AppError::validation(ValidationError::ServiceInactive));
        }

        let provider = self
            .marketplace
            .find_provider(service.provider_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::ProviderNotFound {
                    provider_id: service.provider_id,
                })
            })?;
        if !provider.is_approved() {
            return Err(AppError::validation(ValidationError::ProviderNotApproved));
        }
        if !provider.is_accepting_bookings {
            return Err(AppError::validation(
                ValidationError::ProviderNotAcceptingBookings,
            ));
        }

        let slot = match input.availability_slot_id {
            Some(slot_id) => {
                let slot = self.slots.find_by_id(slot_id).await?.ok_or_else(|| {
                    AppError::domain(DomainError::SlotNotFound { slot_id })
                })?;
                if slot.provider_id != service.provider_id {
                    return Err(AppError::validation(ValidationError::SlotProviderMismatch));
                }
                if slot.service_type != service.service_type {
                    return Err(AppError::validation(
                        ValidationError::SlotServiceTypeMismatch,
                    ));
                }
                if !slot.is_available || slot.held_by.is_some() {
                    return Err(AppError::domain(DomainError::SlotUnavailable { slot_id }));
                }
                if slot.start_at <= Utc::now() {
                    return Err(AppError::validation(ValidationError::SlotInPast));
                }
                Some(slot)
            }
            None => None,
        };

        // Travel date defaults to the slot's start date when not given.
        let travel_date = input
            .travel_date
            .or_else(|| slot.as_ref().map(|s| s.start_at.date_naive()));

        let price = price_booking(service.price_amount);
        let new_booking = NewBooking {
            reference: Uuid::new_v4(),
            customer_id: actor.user_id,
            provider_id: service.provider_id,
            service_id: service.id,
            availability_slot_id: slot.as_ref().map(|s| s.id),
            requested_language: input.requested_language.unwrap_or_default(),
            travel_date,
            notes: input.notes.unwrap_or_default(),
            subtotal_amount: price.subtotal,
            platform_fee: price.platform_fee,
            total_amount: price.total,
        };

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let booking = self.bookings.insert(&mut tx, &new_booking).await?;

        if let Some(slot) = &slot {
            // Conditional claim settles the race; losing it aborts the insert.
            let claimed = self.slots.claim(&mut tx, slot.id, booking.id).await?;
            if !claimed {
                return Err(AppError::domain(DomainError::SlotUnavailable {
                    slot_id: slot.id,
                }));
            }
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(
            booking_id = %booking.id,
            reference = %booking.reference,
            customer_id = %booking.customer_id,
            total = %booking.total_amount,
            "booking created"
        );
        self.notifications
            .notify_booking_participants(&booking, "booking_requested")
            .await;

        Ok(booking)
    }

    pub async fn get_booking(&self, actor: &Actor, booking_id: Uuid) -> AppResult<Booking> {
        let booking = self.find_booking(booking_id).await?;
        self.ensure_participant(actor, &booking).await?;
        Ok(booking)
    }

    /// Bookings visible to this actor: admins see everything, providers see
    /// their profile's bookings, customers see their own.
    pub async fn list_bookings(&self, actor: &Actor) -> AppResult<Vec<Booking>> {
        let bookings = match actor.role {
            Role::Admin => self.bookings.list_all().await?,
            Role::Provider => self.bookings.list_for_provider_user(actor.user_id).await?,
            Role::Customer => self.bookings.list_for_customer(actor.user_id).await?,
        };
        Ok(bookings)
    }

    pub async fn list_status_events(
        &self,
        actor: &Actor,
        booking_id: Uuid,
    ) -> AppResult<Vec<BookingStatusEvent>> {
        let booking = self.find_booking(booking_id).await?;
        self.ensure_participant(actor, &booking).await?;
        Ok(self.bookings.list_status_events(booking_id).await?)
    }

    /// Apply a workflow transition. Customers are excluded entirely; they use
    /// [`cancel_booking`](Self::cancel_booking) instead.
    pub async fn update_status(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        to: BookingStatus,
        note: Option<String>,
    ) -> AppResult<Booking> {
        let booking = self.find_booking(booking_id).await?;

        if actor.role == Role::Customer {
            return Err(AppError::permission(
                PermissionError::OperationalStatusForbidden,
            ));
        }
        if actor.role == Role::Provider {
            self.ensure_booking_provider(actor, &booking).await?;
        }

        if !booking.status.can_transition_to(to) {
            return Err(AppError::domain(DomainError::InvalidTransition {
                from: booking.status,
                to,
            }));
        }

        let note = note.unwrap_or_default();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let updated = if to == BookingStatus::Cancelled {
            let escrow = refund_escrow_on_cancel(booking.escrow_status);
            self.bookings
                .mark_cancelled(&mut tx, booking.id, &note, Some(actor.user_id), escrow)
                .await?
        } else {
            self.bookings.update_status(&mut tx, booking.id, to).await?
        };
        self.bookings
            .insert_status_event(&mut tx, booking.id, booking.status, to, Some(actor.user_id), &note)
            .await?;

        if to.releases_slot() {
            if let Some(slot_id) = booking.availability_slot_id {
                self.slots.release(&mut tx, slot_id, booking.id).await?;
            }
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(
            booking_id = %updated.id,
            from = %booking.status,
            to = %updated.status,
            changed_by = %actor.user_id,
            "booking status changed"
        );
        self.notifications
            .notify_booking_participants(&updated, "booking_status_changed")
            .await;

        Ok(updated)
    }

    /// Cancel a non-terminal booking. Captured funds flip to REFUNDED and the
    /// slot is released in the same transaction.
    pub async fn cancel_booking(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let booking = self.find_booking(booking_id).await?;
        self.ensure_participant(actor, &booking).await?;

        if booking.status.is_terminal() {
            return Err(AppError::domain(DomainError::NotCancellable {
                status: booking.status,
            }));
        }

        let reason = reason.unwrap_or_default();
        let escrow = refund_escrow_on_cancel(booking.escrow_status);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let updated = self
            .bookings
            .mark_cancelled(&mut tx, booking.id, &reason, Some(actor.user_id), escrow)
            .await?;
        self.bookings
            .insert_status_event(
                &mut tx,
                booking.id,
                booking.status,
                BookingStatus::Cancelled,
                Some(actor.user_id),
                &reason,
            )
            .await?;
        if let Some(slot_id) = booking.availability_slot_id {
            self.slots.release(&mut tx, slot_id, booking.id).await?;
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(
            booking_id = %updated.id,
            cancelled_by = %actor.user_id,
            escrow_status = %updated.escrow_status,
            "booking cancelled"
        );
        self.notifications
            .notify_booking_participants(&updated, "booking_cancelled")
            .await;

        Ok(updated)
    }

    /// Manual escrow release: admin-only, and only for a completed booking
    /// whose funds the platform still holds.
    pub async fn release_escrow(&self, actor: &Actor, booking_id: Uuid) -> AppResult<Booking> {
        if !actor.is_admin() {
            return Err(AppError::permission(PermissionError::AdminOnly {
                action: "release escrow".to_string(),
            }));
        }

        let booking = self.find_booking(booking_id).await?;
        if booking.status != BookingStatus::Completed || !booking.escrow_status.holds_funds() {
            return Err(AppError::domain(DomainError::EscrowNotReleasable {
                status: booking.status,
                escrow_status: booking.escrow_status,
            }));
        }

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let updated = self
            .bookings
            .set_escrow_status(&mut tx, booking.id, EscrowStatus::Released)
            .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(booking_id = %updated.id, released_by = %actor.user_id, "escrow released");
        self.notifications
            .notify_booking_participants(&updated, "escrow_released")
            .await;

        Ok(updated)
    }

    /// Manual admin refund: always flips escrow to REFUNDED, and cancels the
    /// booking unless it already reached COMPLETED or CANCELLED.
    pub async fn admin_refund(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        note: Option<String>,
    ) -> AppResult<Booking> {
        if !actor.is_admin() {
            return Err(AppError::permission(PermissionError::AdminOnly {
                action: "refund a booking".to_string(),
            }));
        }

        let booking = self.find_booking(booking_id).await?;
        let note = note.unwrap_or_else(|| "Manual admin refund".to_string());
        let cancels = !matches!(
            booking.status,
            BookingStatus::Completed | BookingStatus::Cancelled
        );

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let updated = if cancels {
            let updated = self
                .bookings
                .mark_cancelled(
                    &mut tx,
                    booking.id,
                    &note,
                    Some(actor.user_id),
                    EscrowStatus::Refunded,
                )
                .await?;
            self.bookings
                .insert_status_event(
                    &mut tx,
                    booking.id,
                    booking.status,
                    BookingStatus::Cancelled,
                    Some(actor.user_id),
                    &note,
                )
                .await?;
            updated
        } else {
            self.bookings
                .set_escrow_status(&mut tx, booking.id, EscrowStatus::Refunded)
                .await?
        };
        // A refund always frees the slot, even for completed bookings.
        if let Some(slot_id) = booking.availability_slot_id {
            self.slots.release(&mut tx, slot_id, booking.id).await?;
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        info!(booking_id = %updated.id, refunded_by = %actor.user_id, "manual refund applied");
        self.notifications
            .notify_booking_participants(&updated, "booking_refunded")
            .await;

        Ok(updated)
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

    /// Participants are the booking customer, the user behind the provider
    /// profile, and admins.
    pub(crate) async fn ensure_participant(
        &self,
        actor: &Actor,
        booking: &Booking,
    ) -> AppResult<()> {
        if actor.is_admin() || booking.customer_id == actor.user_id {
            return Ok(());
        }
        self.ensure_booking_provider(actor, booking).await
    }

    async fn ensure_booking_provider(&self, actor: &Actor, booking: &Booking) -> AppResult<()> {
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

/// Escrow effect of a cancellation: captured funds flip to REFUNDED, anything
/// else keeps its current state.
fn refund_escrow_on_cancel(current: EscrowStatus) -> EscrowStatus {
    if current.holds_funds() {
        EscrowStatus::Refunded
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_refunds_captured_funds_only() {
        assert_eq!(
            refund_escrow_on_cancel(EscrowStatus::Paid),
            EscrowStatus::Refunded
        );
        assert_eq!(
            refund_escrow_on_cancel(EscrowStatus::Held),
            EscrowStatus::Refunded
        );
        assert_eq!(
            refund_escrow_on_cancel(EscrowStatus::Unpaid),
            EscrowStatus::Unpaid
        );
        assert_eq!(
            refund_escrow_on_cancel(EscrowStatus::Released),
            EscrowStatus::Released
        );
        assert_eq!(
            refund_escrow_on_cancel(EscrowStatus::Failed),
            EscrowStatus::Failed
        );
    }
}
