//! Payment initialization, verification, and gateway-notification
//! reconciliation.
//!
//! Reconciliation is driven entirely by a fresh `GetTransactionStatus` lookup;
//! notification payloads are never trusted for money state. Each applied
//! notification writes an audit event, flips escrow, and marks the event
//! processed in one transaction.

use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::Actor;
use crate::config::PesapalConfig;
use crate::database::booking_repository::{
    Booking, BookingRepository, BookingStatus, EscrowStatus,
};
use crate::database::error::DatabaseError;
use crate::database::marketplace_repository::MarketplaceRepository;
use crate::database::payment_event_repository::{PaymentEventRepository, PaymentEventType};
use crate::database::slot_repository::SlotRepository;
use crate::error::{AppError, AppResult, DomainError, PermissionError, ValidationError};
use crate::payments::gateway::{BillingDetails, OrderRequest, PaymentGateway};
use crate::services::notification::NotificationService;

/// Accepted checkout payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    ApplePay,
    Mpesa,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::ApplePay => "APPLE_PAY",
            PaymentMethod::Mpesa => "MPESA",
        }
    }

    /// Parse the optional request field; absent or empty defaults to CARD.
    pub fn parse_or_default(value: Option<&str>) -> Result<Self, ValidationError> {
        match value.map(str::trim) {
            None | Some("") => Ok(PaymentMethod::Card),
            Some(raw) => raw.to_uppercase().parse().map_err(|_| {
                ValidationError::InvalidPaymentMethod {
                    value: raw.to_string(),
                }
            }),
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CARD" => Ok(PaymentMethod::Card),
            "APPLE_PAY" => Ok(PaymentMethod::ApplePay),
            "MPESA" => Ok(PaymentMethod::Mpesa),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitializePayment {
    pub payment_method: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitialization {
    pub booking_id: Uuid,
    pub provider: &'static str,
    pub merchant_reference: String,
    pub order_tracking_id: String,
    pub redirect_url: String,
    pub payment_method: PaymentMethod,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedPayment {
    pub payment_status: String,
    pub event_type: Option<PaymentEventType>,
    pub booking: Booking,
}

/// Outcome of one gateway notification, surfaced in the webhook ack.
#[derive(Debug, Clone)]
pub struct ProcessedNotification {
    pub booking_found: bool,
    pub payment_status: String,
    pub event_type: Option<PaymentEventType>,
}

pub struct PaymentFlowService {
    pool: PgPool,
    bookings: Arc<BookingRepository>,
    slots: Arc<SlotRepository>,
    marketplace: Arc<MarketplaceRepository>,
    payment_events: Arc<PaymentEventRepository>,
    notifications: Arc<NotificationService>,
    gateway: Arc<dyn PaymentGateway>,
    config: PesapalConfig,
}

impl PaymentFlowService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        bookings: Arc<BookingRepository>,
        slots: Arc<SlotRepository>,
        marketplace: Arc<MarketplaceRepository>,
        payment_events: Arc<PaymentEventRepository>,
        notifications: Arc<NotificationService>,
        gateway: Arc<dyn PaymentGateway>,
        config: PesapalConfig,
    ) -> Self {
        Self {
            pool,
            bookings,
            slots,
            marketplace,
            payment_events,
            notifications,
            gateway,
            config,
        }
    }

    /// Start a checkout for a booking. Only the booking's customer (or an
    /// admin) may pay.
    pub async fn initialize_payment(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        input: InitializePayment,
    ) -> AppResult<PaymentInitialization> {
        let booking = self.find_booking(booking_id).await?;
        if !actor.is_admin() && booking.customer_id != actor.user_id {
            return Err(AppError::permission(PermissionError::CustomerOnly {
                action: "pay for this booking".to_string(),
            }));
        }

        if matches!(
            booking.status,
            BookingStatus::Cancelled | BookingStatus::Rejected
        ) {
            return Err(AppError::domain(DomainError::BookingNotPayable {
                status: booking.status,
            }));
        }
        if booking.escrow_status.is_settled() {
            return Err(AppError::domain(DomainError::AlreadyPaid {
                escrow_status: booking.escrow_status,
            }));
        }

        let payment_method = PaymentMethod::parse_or_default(input.payment_method.as_deref())
            .map_err(AppError::validation)?;

        // Browser return URL: explicit value, then config, then the IPN URL.
        let callback_url = input
            .callback_url
            .or_else(|| self.config.callback_url.clone())
            .or_else(|| self.config.ipn_url.clone())
            .ok_or_else(|| {
                AppError::validation(ValidationError::MissingField {
                    field: "callback_url".to_string(),
                })
            })?;
        if !is_public_https(&callback_url) {
            return Err(AppError::validation(ValidationError::InsecureCallbackUrl {
                url: callback_url,
            }));
        }

        let token = self.gateway.request_access_token().await?;
        let notification_id = self.resolve_notification_id(&token).await?;

        let billing = self.billing_for_customer(booking.customer_id).await;
        let currency = match self.marketplace.find_service(booking.service_id).await? {
            Some(service) => service.currency,
            None => "SAR".to_string(),
        };

        let order = OrderRequest {
            merchant_reference: booking.reference,
            amount: booking.total_amount,
            currency: currency.clone(),
            description: format!("Umrah Link booking {}", booking.reference),
            callback_url,
            notification_id,
            billing,
        };
        let submitted = self.gateway.submit_order(&token, &order).await?;

        let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
        self.bookings
            .set_payment_reference(&mut conn, booking.id, &submitted.order_tracking_id)
            .await?;

        info!(
            booking_id = %booking.id,
            order_tracking_id = %submitted.order_tracking_id,
            method = %payment_method.as_str(),
            "payment initialized"
        );

        Ok(PaymentInitialization {
            booking_id: booking.id,
            provider: "PESAPAL",
            merchant_reference: submitted.merchant_reference,
            order_tracking_id: submitted.order_tracking_id,
            redirect_url: submitted.redirect_url,
            payment_method,
            amount: booking.total_amount,
            currency,
            webhook_url: self.config.ipn_url.clone(),
        })
    }

    /// On-demand status check, defaulting to the stored tracking reference.
    /// Applies the same escrow effects as a gateway notification.
    pub async fn verify_payment(
        &self,
        actor: &Actor,
        booking_id: Uuid,
        order_tracking_id: Option<String>,
        merchant_reference: Option<String>,
    ) -> AppResult<VerifiedPayment> {
        let booking = self.find_booking(booking_id).await?;
        self.ensure_participant(actor, &booking).await?;

        if !reference_claim_matches(booking.reference, merchant_reference.as_deref()) {
            return Err(AppError::domain(DomainError::PaymentReferenceMismatch));
        }

        let tracking_id = order_tracking_id
            .filter(|s| !s.is_empty())
            .or_else(|| {
                if booking.payment_reference.is_empty() {
                    None
                } else {
                    Some(booking.payment_reference.clone())
                }
            })
            .ok_or_else(|| {
                AppError::validation(ValidationError::MissingField {
                    field: "order_tracking_id".to_string(),
                })
            })?;

        let token = self.gateway.request_access_token().await?;
        let status = self.gateway.transaction_status(&token, &tracking_id).await?;

        if !reference_claim_matches(booking.reference, status.merchant_reference.as_deref()) {
            return Err(AppError::domain(DomainError::PaymentReferenceMismatch));
        }

        let event_type = map_gateway_status(&status.payment_status);
        self.record_and_apply(Some(&booking), &tracking_id, event_type, &status.payload)
            .await?;

        let booking = self.find_booking(booking_id).await?;
        Ok(VerifiedPayment {
            payment_status: status.payment_status,
            event_type,
            booking,
        })
    }

    /// Reconcile one gateway notification identified by tracking id. Called
    /// from the unauthenticated webhook; all money state comes from a fresh
    /// status lookup, never from the notification itself.
    pub async fn process_tracking(
        &self,
        order_tracking_id: &str,
        merchant_reference_hint: Option<&str>,
    ) -> AppResult<ProcessedNotification> {
        let token = self.gateway.request_access_token().await?;
        let status = self
            .gateway
            .transaction_status(&token, order_tracking_id)
            .await?;

        let booking = self
            .resolve_booking(order_tracking_id, status.merchant_reference.as_deref(), merchant_reference_hint)
            .await?;

        if booking.is_none() {
            warn!(%order_tracking_id, "notification did not match any booking");
        }

        if let Some(booking) = &booking {
            if booking.payment_reference != order_tracking_id {
                let mut conn = self.pool.acquire().await.map_err(DatabaseError::from_sqlx)?;
                self.bookings
                    .set_payment_reference(&mut conn, booking.id, order_tracking_id)
                    .await?;
            }
        }

        let event_type = map_gateway_status(&status.payment_status);
        self.record_and_apply(
            booking.as_ref(),
            order_tracking_id,
            event_type,
            &status.payload,
        )
        .await?;

        Ok(ProcessedNotification {
            booking_found: booking.is_some(),
            payment_status: status.payment_status,
            event_type,
        })
    }

    /// Apply a pre-normalized event delivered by a trusted internal caller,
    /// bypassing the gateway status lookup.
    pub async fn process_internal_event(
        &self,
        event_type: PaymentEventType,
        reference: &str,
        payload: &JsonValue,
    ) -> AppResult<ProcessedNotification> {
        let booking = self.resolve_booking(reference, None, Some(reference)).await?;
        if booking.is_none() {
            warn!(%reference, "internal payment event did not match any booking");
        }

        self.record_and_apply(booking.as_ref(), reference, Some(event_type), payload)
            .await?;

        Ok(ProcessedNotification {
            booking_found: booking.is_some(),
            payment_status: event_type.as_str().to_string(),
            event_type: Some(event_type),
        })
    }

    /// Resolution order: the caller-supplied merchant reference, then the
    /// stored tracking reference, then the reference the gateway echoes back.
    async fn resolve_booking(
        &self,
        order_tracking_id: &str,
        gateway_reference: Option<&str>,
        caller_reference: Option<&str>,
    ) -> AppResult<Option<Booking>> {
        if let Some(booking) = self.find_by_reference_str(caller_reference).await? {
            return Ok(Some(booking));
        }
        if let Some(booking) = self
            .bookings
            .find_by_payment_reference(order_tracking_id)
            .await?
        {
            return Ok(Some(booking));
        }
        self.find_by_reference_str(gateway_reference).await
    }

    async fn find_by_reference_str(&self, reference: Option<&str>) -> AppResult<Option<Booking>> {
        match reference.and_then(|r| Uuid::parse_str(r).ok()) {
            Some(reference) => Ok(self.bookings.find_by_reference(reference).await?),
            None => Ok(None),
        }
    }

    /// Record the audit event and apply escrow/booking effects in one
    /// transaction, then notify. Pending statuses record nothing.
    async fn record_and_apply(
        &self,
        booking: Option<&Booking>,
        external_reference: &str,
        event_type: Option<PaymentEventType>,
        payload: &JsonValue,
    ) -> AppResult<()> {
        let Some(event_type) = event_type else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let event = self
            .payment_events
            .insert(
                &mut tx,
                booking.map(|b| b.id),
                external_reference,
                event_type,
                payload,
            )
            .await?;

        let updated = match booking {
            Some(booking) => Some(self.apply_event_effects(&mut tx, booking, event_type).await?),
            None => None,
        };

        self.payment_events.mark_processed(&mut tx, event.id).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        if let Some(updated) = updated {
            info!(
                booking_id = %updated.id,
                event = %event_type,
                escrow_status = %updated.escrow_status,
                "payment event applied"
            );
            let label = match event_type {
                PaymentEventType::PaymentSucceeded => "payment_succeeded",
                PaymentEventType::PaymentFailed => "payment_failed",
                PaymentEventType::PaymentRefunded => "payment_refunded",
            };
            self.notifications
                .notify_booking_participants(&updated, label)
                .await;
        }

        Ok(())
    }

    async fn apply_event_effects(
        &self,
        conn: &mut sqlx::PgConnection,
        booking: &Booking,
        event_type: PaymentEventType,
    ) -> AppResult<Booking> {
        if event_type == PaymentEventType::PaymentRefunded {
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
                        "Payment refunded",
                        None,
                        EscrowStatus::Refunded,
                    )
                    .await?;
                self.bookings
                    .insert_status_event(
                        conn,
                        booking.id,
                        booking.status,
                        BookingStatus::Cancelled,
                        None,
                        "Payment refunded",
                    )
                    .await?;
                updated
            } else if booking.escrow_status != EscrowStatus::Refunded {
                self.bookings
                    .set_escrow_status(conn, booking.id, EscrowStatus::Refunded)
                    .await?
            } else {
                booking.clone()
            };
            // A refund always frees the slot, whatever the booking ended as.
            if let Some(slot_id) = booking.availability_slot_id {
                self.slots.release(conn, slot_id, booking.id).await?;
            }
            return Ok(updated);
        }

        match next_escrow(event_type, booking.escrow_status) {
            Some(next) => Ok(self
                .bookings
                .set_escrow_status(conn, booking.id, next)
                .await?),
            None => Ok(booking.clone()),
        }
    }

    async fn resolve_notification_id(&self, token: &str) -> AppResult<String> {
        if let Some(ipn_id) = &self.config.ipn_id {
            return Ok(ipn_id.clone());
        }

        let ipn_url = self.config.ipn_url.as_ref().ok_or_else(|| {
            AppError::new(crate::error::AppErrorKind::Gateway(
                crate::error::GatewayError::Configuration {
                    message: "No Pesapal IPN configured: set PESAPAL_IPN_ID or PESAPAL_IPN_URL"
                        .to_string(),
                },
            ))
        })?;
        if !is_public_https(ipn_url) {
            return Err(AppError::validation(ValidationError::InsecureCallbackUrl {
                url: ipn_url.clone(),
            }));
        }

        let registered = self.gateway.register_ipn(token, ipn_url).await?;
        Ok(registered.ipn_id)
    }

    async fn billing_for_customer(&self, customer_id: Uuid) -> BillingDetails {
        match self.marketplace.find_user_contact(customer_id).await {
            Ok(Some(contact)) => BillingDetails {
                email_address: if contact.email.is_empty() {
                    BillingDetails::default().email_address
                } else {
                    contact.email
                },
                phone_number: contact.phone_number,
                first_name: contact.first_name,
                last_name: contact.last_name,
                ..BillingDetails::default()
            },
            _ => BillingDetails::default(),
        }
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

/// Normalize the gateway status vocabulary into the canonical event types.
/// Anything unrecognized is treated as still pending.
pub fn map_gateway_status(raw: &str) -> Option<PaymentEventType> {
    match raw.to_uppercase().as_str() {
        "COMPLETED" | "SUCCEEDED" | "SUCCESS" => Some(PaymentEventType::PaymentSucceeded),
        "FAILED" | "INVALID" | "DECLINED" => Some(PaymentEventType::PaymentFailed),
        "REFUNDED" | "REVERSED" | "CANCELLED" => Some(PaymentEventType::PaymentRefunded),
        _ => None,
    }
}

/// Escrow effect of a succeeded/failed event; refunds are handled separately
/// because they also cancel the booking. Returns None when nothing changes.
pub fn next_escrow(event_type: PaymentEventType, current: EscrowStatus) -> Option<EscrowStatus> {
    match event_type {
        // A success re-holds from any state except HELD itself, so a capture
        // notification arriving after a release or refund is re-held and left
        // for manual review rather than silently dropped.
        PaymentEventType::PaymentSucceeded => {
            if current == EscrowStatus::Held {
                None
            } else {
                Some(EscrowStatus::Held)
            }
        }
        PaymentEventType::PaymentFailed => {
            if current.survives_failure_event() || current == EscrowStatus::Failed {
                None
            } else {
                Some(EscrowStatus::Failed)
            }
        }
        PaymentEventType::PaymentRefunded => {
            if current == EscrowStatus::Refunded {
                None
            } else {
                Some(EscrowStatus::Refunded)
            }
        }
    }
}

/// A caller- or gateway-supplied merchant reference must either be absent or
/// name this booking.
pub fn reference_claim_matches(booking_reference: Uuid, claim: Option<&str>) -> bool {
    match claim.map(str::trim).filter(|c| !c.is_empty()) {
        None => true,
        Some(claim) => Uuid::parse_str(claim)
            .map(|c| c == booking_reference)
            .unwrap_or(false),
    }
}

/// Gateway callback URLs must be HTTPS and reachable from the public
/// internet; loopback and RFC 1918 hosts are rejected.
pub fn is_public_https(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("");
    if host.is_empty() {
        return false;
    }

    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".local") || lowered == "0.0.0.0" {
        return false;
    }
    if lowered.starts_with("127.") || lowered.starts_with("10.") || lowered.starts_with("192.168.")
    {
        return false;
    }
    if let Some(second) = lowered.strip_prefix("172.") {
        if let Some(octet) = second.split('.').next().and_then(|o| o.parse::<u8>().ok()) {
            if (16..=31).contains(&octet) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_vocabulary_maps_to_events() {
        assert_eq!(
            map_gateway_status("COMPLETED"),
            Some(PaymentEventType::PaymentSucceeded)
        );
        assert_eq!(
            map_gateway_status("success"),
            Some(PaymentEventType::PaymentSucceeded)
        );
        assert_eq!(
            map_gateway_status("FAILED"),
            Some(PaymentEventType::PaymentFailed)
        );
        assert_eq!(
            map_gateway_status("Declined"),
            Some(PaymentEventType::PaymentFailed)
        );
        assert_eq!(
            map_gateway_status("REVERSED"),
            Some(PaymentEventType::PaymentRefunded)
        );
        assert_eq!(map_gateway_status("PENDING"), None);
        assert_eq!(map_gateway_status(""), None);
        assert_eq!(map_gateway_status("SOMETHING_NEW"), None);
    }

    #[test]
    fn success_holds_funds_unless_already_held() {
        let succeeded = PaymentEventType::PaymentSucceeded;
        for current in [
            EscrowStatus::Unpaid,
            EscrowStatus::Paid,
            EscrowStatus::Failed,
            EscrowStatus::Released,
            EscrowStatus::Refunded,
        ] {
            assert_eq!(
                next_escrow(succeeded, current),
                Some(EscrowStatus::Held),
                "from {current}"
            );
        }
        assert_eq!(next_escrow(succeeded, EscrowStatus::Held), None);
    }

    #[test]
    fn failure_never_regresses_held_funds() {
        let failed = PaymentEventType::PaymentFailed;
        assert_eq!(
            next_escrow(failed, EscrowStatus::Unpaid),
            Some(EscrowStatus::Failed)
        );
        assert_eq!(
            next_escrow(failed, EscrowStatus::Paid),
            Some(EscrowStatus::Failed)
        );
        assert_eq!(next_escrow(failed, EscrowStatus::Held), None);
        assert_eq!(next_escrow(failed, EscrowStatus::Released), None);
        assert_eq!(next_escrow(failed, EscrowStatus::Refunded), None);
        assert_eq!(next_escrow(failed, EscrowStatus::Failed), None);
    }

    #[test]
    fn payment_method_parsing() {
        assert_eq!(
            PaymentMethod::parse_or_default(None).ok(),
            Some(PaymentMethod::Card)
        );
        assert_eq!(
            PaymentMethod::parse_or_default(Some("")).ok(),
            Some(PaymentMethod::Card)
        );
        assert_eq!(
            PaymentMethod::parse_or_default(Some("mpesa")).ok(),
            Some(PaymentMethod::Mpesa)
        );
        assert_eq!(
            PaymentMethod::parse_or_default(Some("APPLE_PAY")).ok(),
            Some(PaymentMethod::ApplePay)
        );
        assert!(PaymentMethod::parse_or_default(Some("BITCOIN")).is_err());
    }

    #[test]
    fn reference_claims_must_name_the_booking() {
        let reference = Uuid::new_v4();
        assert!(reference_claim_matches(reference, None));
        assert!(reference_claim_matches(reference, Some("")));
        assert!(reference_claim_matches(reference, Some("   ")));
        assert!(reference_claim_matches(
            reference,
            Some(reference.to_string().as_str())
        ));
        assert!(!reference_claim_matches(
            reference,
            Some(Uuid::new_v4().to_string().as_str())
        ));
        assert!(!reference_claim_matches(reference, Some("not-a-uuid")));
    }

    #[test]
    fn callback_urls_must_be_public_https() {
        assert!(is_public_https("https://app.example.com/return"));
        assert!(is_public_https("https://pay.example.com:8443/cb?x=1"));

        assert!(!is_public_https("http://app.example.com/return"));
        assert!(!is_public_https("https://localhost/cb"));
        assert!(!is_public_https("https://127.0.0.1:8000/cb"));
        assert!(!is_public_https("https://10.1.2.3/cb"));
        assert!(!is_public_https("https://192.168.1.5/cb"));
        assert!(!is_public_https("https://172.20.0.1/cb"));
        assert!(!is_public_https("https://myhost.local/cb"));
        assert!(!is_public_https("ftp://example.com"));
        assert!(!is_public_https("https://"));
    }

    #[test]
    fn public_172_ranges_are_allowed() {
        assert!(is_public_https("https://172.15.0.1/cb"));
        assert!(is_public_https("https://172.32.0.1/cb"));
    }
}
