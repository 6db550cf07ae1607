//! Participant notifications.
//!
//! Delivery is structured-log only for now; an email/SMS transport can hang
//! off the same call sites later. Notification failures never fail the
//! booking operation that triggered them.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::booking_repository::Booking;
use crate::database::marketplace_repository::MarketplaceRepository;

pub struct NotificationService {
    marketplace: Arc<MarketplaceRepository>,
}

impl NotificationService {
    pub fn new(marketplace: Arc<MarketplaceRepository>) -> Self {
        Self { marketplace }
    }

    /// Notify both sides of a booking about an event. Best-effort: lookup
    /// failures are logged and swallowed.
    pub async fn notify_booking_participants(&self, booking: &Booking, event: &str) {
        self.notify_user(booking.customer_id, booking, event, "customer")
            .await;

        match self.marketplace.find_provider(booking.provider_id).await {
            Ok(Some(provider)) => {
                self.notify_user(provider.user_id, booking, event, "provider")
                    .await;
            }
            Ok(None) => {
                warn!(
                    booking_id = %booking.id,
                    provider_id = %booking.provider_id,
                    "notification skipped: provider profile missing"
                );
            }
            Err(err) => {
                warn!(
                    booking_id = %booking.id,
                    error = %err,
                    "notification skipped: provider lookup failed"
                );
            }
        }
    }

    async fn notify_user(&self, user_id: Uuid, booking: &Booking, event: &str, role: &str) {
        let contact = match self.marketplace.find_user_contact(user_id).await {
            Ok(contact) => contact,
            Err(err) => {
                warn!(%user_id, error = %err, "notification skipped: contact lookup failed");
                return;
            }
        };

        match contact {
            Some(contact) => {
                info!(
                    booking_id = %booking.id,
                    booking_reference = %booking.reference,
                    recipient = %contact.email,
                    role,
                    event,
                    status = %booking.status,
                    escrow_status = %booking.escrow_status,
                    "booking notification"
                );
            }
            None => {
                warn!(%user_id, role, "notification skipped: user not found");
            }
        }
    }
}
