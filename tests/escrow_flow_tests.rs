//! End-to-end escrow scenarios driven through the services with a scripted
//! gateway. These need a migrated Postgres at DATABASE_URL and are ignored by
//! default.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use umrahlink_backend::api::auth::{Actor, Role};
use umrahlink_backend::config::PesapalConfig;
use umrahlink_backend::database::booking_repository::{
    Booking, BookingRepository, BookingStatus, EscrowStatus,
};
use umrahlink_backend::database::dispute_repository::{AdminDecision, DisputeRepository, DisputeStatus};
use umrahlink_backend::database::marketplace_repository::MarketplaceRepository;
use umrahlink_backend::database::payment_event_repository::{
    PaymentEventRepository, PaymentEventType,
};
use umrahlink_backend::database::slot_repository::SlotRepository;
use umrahlink_backend::payments::error::PesapalError;
use umrahlink_backend::payments::gateway::{
    GatewayTransactionStatus, OrderRequest, PaymentGateway, RegisteredIpn, SubmittedOrder,
};
use umrahlink_backend::services::booking_lifecycle::{BookingLifecycleService, CreateBooking};
use umrahlink_backend::services::dispute_resolution::{DisputeResolutionService, OpenDispute};
use umrahlink_backend::services::notification::NotificationService;
use umrahlink_backend::services::payment_flow::{InitializePayment, PaymentFlowService};

/// Gateway double that hands out one tracking id and answers status lookups
/// with whatever the test scripted.
struct ScriptedGateway {
    tracking_id: String,
    payment_status: Mutex<String>,
}

impl ScriptedGateway {
    fn new(initial_status: &str) -> Self {
        Self {
            tracking_id: format!("trk-{}", Uuid::new_v4()),
            payment_status: Mutex::new(initial_status.to_string()),
        }
    }

    fn set_status(&self, status: &str) {
        *self.payment_status.lock().unwrap() = status.to_string();
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn request_access_token(&self) -> Result<String, PesapalError> {
        Ok("scripted-token".to_string())
    }

    async fn register_ipn(
        &self,
        _token: &str,
        _ipn_url: &str,
    ) -> Result<RegisteredIpn, PesapalError> {
        Ok(RegisteredIpn {
            ipn_id: "scripted-ipn".to_string(),
        })
    }

    async fn submit_order(
        &self,
        _token: &str,
        order: &OrderRequest,
    ) -> Result<SubmittedOrder, PesapalError> {
        Ok(SubmittedOrder {
            order_tracking_id: self.tracking_id.clone(),
            redirect_url: "https://pay.example.test/checkout".to_string(),
            merchant_reference: order.merchant_reference.to_string(),
        })
    }

    async fn transaction_status(
        &self,
        _token: &str,
        order_tracking_id: &str,
    ) -> Result<GatewayTransactionStatus, PesapalError> {
        let status = self.payment_status.lock().unwrap().clone();
        Ok(GatewayTransactionStatus {
            payment_status: status.clone(),
            merchant_reference: None,
            payload: json!({
                "order_tracking_id": order_tracking_id,
                "payment_status_description": status,
            }),
        })
    }
}

struct Harness {
    pool: PgPool,
    bookings: Arc<BookingRepository>,
    slots: Arc<SlotRepository>,
    payment_events: Arc<PaymentEventRepository>,
    payments: PaymentFlowService,
    lifecycle: BookingLifecycleService,
    disputes: DisputeResolutionService,
    gateway: Arc<ScriptedGateway>,
    customer: Actor,
    admin: Actor,
    service_id: Uuid,
    slot_id: Uuid,
}

async fn harness(initial_status: &str) -> Harness {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for db tests");
    let pool = PgPool::connect(&url).await.expect("connect to test database");

    let bookings = Arc::new(BookingRepository::new(pool.clone()));
    let slots = Arc::new(SlotRepository::new(pool.clone()));
    let marketplace = Arc::new(MarketplaceRepository::new(pool.clone()));
    let payment_events = Arc::new(PaymentEventRepository::new(pool.clone()));
    let dispute_repo = Arc::new(DisputeRepository::new(pool.clone()));
    let notifications = Arc::new(NotificationService::new(marketplace.clone()));
    let gateway = Arc::new(ScriptedGateway::new(initial_status));
    let gateway_seam: Arc<dyn PaymentGateway> = gateway.clone();

    let config = PesapalConfig {
        consumer_key: "test-key".to_string(),
        consumer_secret: "test-secret".to_string(),
        environment: "sandbox".to_string(),
        ipn_id: Some("scripted-ipn".to_string()),
        callback_url: Some("https://umrahlink.app/payments/return".to_string()),
        timeout_secs: 5,
        ..Default::default()
    };

    let payments = PaymentFlowService::new(
        pool.clone(),
        bookings.clone(),
        slots.clone(),
        marketplace.clone(),
        payment_events.clone(),
        notifications.clone(),
        gateway_seam,
        config,
    );
    let lifecycle = BookingLifecycleService::new(
        pool.clone(),
        bookings.clone(),
        slots.clone(),
        marketplace.clone(),
        notifications.clone(),
    );
    let disputes = DisputeResolutionService::new(
        pool.clone(),
        dispute_repo,
        bookings.clone(),
        slots.clone(),
        marketplace.clone(),
        notifications.clone(),
    );

    let customer_id = seed_user(&pool, "CUSTOMER").await;
    let admin_id = seed_user(&pool, "ADMIN").await;
    let provider_user_id = seed_user(&pool, "PROVIDER").await;

    let provider_id: Uuid = sqlx::query_scalar(
        "INSERT INTO provider_profiles (user_id, verification_status) \
         VALUES ($1, 'APPROVED') RETURNING id",
    )
    .bind(provider_user_id)
    .fetch_one(&pool)
    .await
    .expect("seed provider");

    let service_id: Uuid = sqlx::query_scalar(
        "INSERT INTO services (provider_id, service_type, title, price_amount) \
         VALUES ($1, 'GUIDE', 'Haram guided visit', 450.00) RETURNING id",
    )
    .bind(provider_id)
    .fetch_one(&pool)
    .await
    .expect("seed service");

    let slot_id: Uuid = sqlx::query_scalar(
        "INSERT INTO availability_slots (provider_id, service_type, city_scope, start_at, end_at) \
         VALUES ($1, 'GUIDE', 'MAKKAH', NOW() + interval '7 days', NOW() + interval '7 days 4 hours') \
         RETURNING id",
    )
    .bind(provider_id)
    .fetch_one(&pool)
    .await
    .expect("seed slot");

    Harness {
        pool,
        bookings,
        slots,
        payment_events,
        payments,
        lifecycle,
        disputes,
        gateway,
        customer: Actor {
            user_id: customer_id,
            role: Role::Customer,
        },
        admin: Actor {
            user_id: admin_id,
            role: Role::Admin,
        },
        service_id,
        slot_id,
    }
}

async fn seed_user(pool: &PgPool, role: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO users (email, role) VALUES ($1, $2) RETURNING id")
        .bind(format!("{}@test.umrahlink.app", Uuid::new_v4()))
        .bind(role)
        .fetch_one(pool)
        .await
        .expect("seed user")
}

impl Harness {
    async fn create_booking(&self) -> Booking {
        self.lifecycle
            .create_booking(
                &self.customer,
                CreateBooking {
                    service_id: self.service_id,
                    availability_slot_id: Some(self.slot_id),
                    requested_language: None,
                    travel_date: None,
                    notes: None,
                },
            )
            .await
            .expect("create booking")
    }

    /// Capture funds for a booking through the internal event path.
    async fn capture(&self, booking: &Booking) {
        self.payments
            .process_internal_event(
                PaymentEventType::PaymentSucceeded,
                &booking.reference.to_string(),
                &json!({"source": "capture"}),
            )
            .await
            .expect("capture payment");
    }

    async fn force_status(&self, booking_id: Uuid, status: &str) {
        sqlx::query("UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(booking_id)
            .bind(status)
            .execute(&self.pool)
            .await
            .expect("force booking status");
    }

    async fn reload(&self, booking_id: Uuid) -> Booking {
        self.bookings
            .find_by_id(booking_id)
            .await
            .expect("reload booking")
            .expect("booking exists")
    }
}

#[tokio::test]
#[ignore] // Requires database running
async fn checkout_then_verify_captures_into_escrow() {
    let h = harness("PENDING").await;
    let booking = h.create_booking().await;
    assert_eq!(booking.escrow_status, EscrowStatus::Unpaid);

    let init = h
        .payments
        .initialize_payment(&h.customer, booking.id, InitializePayment::default())
        .await
        .expect("initialize payment");
    assert_eq!(init.order_tracking_id, h.gateway.tracking_id);

    h.gateway.set_status("COMPLETED");
    let verified = h
        .payments
        .verify_payment(
            &h.customer,
            booking.id,
            None,
            Some(booking.reference.to_string()),
        )
        .await
        .expect("verify payment");
    assert_eq!(verified.payment_status, "COMPLETED");
    assert_eq!(verified.booking.escrow_status, EscrowStatus::Held);
}

#[tokio::test]
#[ignore] // Requires database running
async fn verify_rejects_a_foreign_merchant_reference() {
    let h = harness("COMPLETED").await;
    let booking = h.create_booking().await;
    h.payments
        .initialize_payment(&h.customer, booking.id, InitializePayment::default())
        .await
        .expect("initialize payment");

    let result = h
        .payments
        .verify_payment(
            &h.customer,
            booking.id,
            None,
            Some(Uuid::new_v4().to_string()),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(h.reload(booking.id).await.escrow_status, EscrowStatus::Unpaid);
}

#[tokio::test]
#[ignore] // Requires database running
async fn repeated_reconciliation_is_recorded_but_moves_nothing() {
    let h = harness("COMPLETED").await;
    let booking = h.create_booking().await;
    h.payments
        .initialize_payment(&h.customer, booking.id, InitializePayment::default())
        .await
        .expect("initialize payment");

    for _ in 0..3 {
        let outcome = h
            .payments
            .process_tracking(&h.gateway.tracking_id, None)
            .await
            .expect("process notification");
        assert!(outcome.booking_found);
    }

    assert_eq!(h.reload(booking.id).await.escrow_status, EscrowStatus::Held);
    let events = h
        .payment_events
        .list_for_booking(booking.id)
        .await
        .expect("list events");
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.processed));
}

#[tokio::test]
#[ignore] // Requires database running
async fn escrow_release_is_single_shot() {
    let h = harness("PENDING").await;
    let booking = h.create_booking().await;
    h.capture(&booking).await;
    h.force_status(booking.id, "COMPLETED").await;

    let released = h
        .lifecycle
        .release_escrow(&h.admin, booking.id)
        .await
        .expect("first release");
    assert_eq!(released.escrow_status, EscrowStatus::Released);

    let second = h.lifecycle.release_escrow(&h.admin, booking.id).await;
    assert!(second.is_err());
    assert_eq!(
        h.reload(booking.id).await.escrow_status,
        EscrowStatus::Released
    );
}

#[tokio::test]
#[ignore] // Requires database running
async fn refund_decision_cancels_booking_and_frees_the_slot() {
    let h = harness("PENDING").await;
    let booking = h.create_booking().await;
    h.capture(&booking).await;
    h.force_status(booking.id, "ACCEPTED").await;

    let dispute = h
        .disputes
        .open_dispute(
            &h.customer,
            OpenDispute {
                booking_id: booking.id,
                reason: "Guide never showed up".to_string(),
                requested_resolution: Some("REFUND".to_string()),
            },
        )
        .await
        .expect("open dispute");

    let reviewed = h
        .disputes
        .move_to_review(&h.admin, dispute.id)
        .await
        .expect("move to review");
    assert_eq!(reviewed.status, DisputeStatus::UnderReview);

    let decided = h
        .disputes
        .admin_decision(&h.admin, dispute.id, AdminDecision::ApproveRefund, None)
        .await
        .expect("decide dispute");
    assert_eq!(decided.status, DisputeStatus::Resolved);

    let booking = h.reload(booking.id).await;
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.escrow_status, EscrowStatus::Refunded);

    let slot = h
        .slots
        .find_by_id(h.slot_id)
        .await
        .expect("lookup slot")
        .expect("slot exists");
    assert!(slot.is_available);
    assert_eq!(slot.held_by, None);
}

#[tokio::test]
#[ignore] // Requires database running
async fn release_decision_overrides_unpaid_escrow() {
    let h = harness("PENDING").await;
    let booking = h.create_booking().await;
    h.force_status(booking.id, "ACCEPTED").await;

    let dispute = h
        .disputes
        .open_dispute(
            &h.customer,
            OpenDispute {
                booking_id: booking.id,
                reason: "Service was delivered, pay the provider".to_string(),
                requested_resolution: Some("RELEASE".to_string()),
            },
        )
        .await
        .expect("open dispute");

    h.disputes
        .admin_decision(&h.admin, dispute.id, AdminDecision::ApproveRelease, None)
        .await
        .expect("decide dispute");

    assert_eq!(
        h.reload(booking.id).await.escrow_status,
        EscrowStatus::Released
    );
}

#[tokio::test]
#[ignore] // Requires database running
async fn gateway_refund_frees_slot_of_completed_booking() {
    let h = harness("PENDING").await;
    let booking = h.create_booking().await;
    h.payments
        .initialize_payment(&h.customer, booking.id, InitializePayment::default())
        .await
        .expect("initialize payment");
    h.capture(&booking).await;
    h.force_status(booking.id, "COMPLETED").await;

    h.gateway.set_status("REVERSED");
    h.payments
        .process_tracking(&h.gateway.tracking_id, None)
        .await
        .expect("process refund notification");

    let booking = h.reload(booking.id).await;
    // A completed booking stays completed, but the money and the slot go back.
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.escrow_status, EscrowStatus::Refunded);

    let slot = h
        .slots
        .find_by_id(h.slot_id)
        .await
        .expect("lookup slot")
        .expect("slot exists");
    assert!(slot.is_available);
    assert_eq!(slot.held_by, None);
}

#[tokio::test]
#[ignore] // Requires database running
async fn caller_reference_outranks_stored_tracking_reference() {
    let h = harness("COMPLETED").await;
    let booking_a = h.create_booking().await;

    // Second slot so a second booking can be created.
    let other = harness("PENDING").await;
    let booking_b = other.create_booking().await;

    let mut conn = h.pool.acquire().await.expect("acquire");
    h.bookings
        .set_payment_reference(&mut conn, booking_a.id, &h.gateway.tracking_id)
        .await
        .expect("store tracking reference");
    drop(conn);

    // The hint names booking B even though A holds the tracking reference.
    let outcome = h
        .payments
        .process_tracking(
            &h.gateway.tracking_id,
            Some(&booking_b.reference.to_string()),
        )
        .await
        .expect("process notification");
    assert!(outcome.booking_found);

    assert_eq!(h.reload(booking_b.id).await.escrow_status, EscrowStatus::Held);
    assert_eq!(
        h.reload(booking_a.id).await.escrow_status,
        EscrowStatus::Unpaid
    );
}
