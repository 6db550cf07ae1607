//! Database-backed scenarios. These need a migrated Postgres at
//! DATABASE_URL and are ignored by default.

use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use umrahlink_backend::database::booking_repository::{BookingRepository, NewBooking};
use umrahlink_backend::database::slot_repository::SlotRepository;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for db tests");
    PgPool::connect(&url).await.expect("connect to test database")
}

async fn seed_provider_with_slot(pool: &PgPool) -> (Uuid, Uuid, Uuid, Uuid) {
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email) VALUES ($1) RETURNING id",
    )
    .bind(format!("{}@test.umrahlink.app", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("seed user");

    let provider_id: Uuid = sqlx::query_scalar(
        "INSERT INTO provider_profiles (user_id, verification_status) \
         VALUES ($1, 'APPROVED') RETURNING id",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("seed provider");

    let service_id: Uuid = sqlx::query_scalar(
        "INSERT INTO services (provider_id, service_type, title, price_amount) \
         VALUES ($1, 'GUIDE', 'Haram guided visit', 450.00) RETURNING id",
    )
    .bind(provider_id)
    .fetch_one(pool)
    .await
    .expect("seed service");

    let slot_id: Uuid = sqlx::query_scalar(
        "INSERT INTO availability_slots (provider_id, service_type, city_scope, start_at, end_at) \
         VALUES ($1, 'GUIDE', 'MAKKAH', NOW() + interval '7 days', NOW() + interval '7 days 4 hours') \
         RETURNING id",
    )
    .bind(provider_id)
    .fetch_one(pool)
    .await
    .expect("seed slot");

    (user_id, provider_id, service_id, slot_id)
}

fn booking_fixture(customer_id: Uuid, provider_id: Uuid, service_id: Uuid, slot_id: Uuid) -> NewBooking {
    NewBooking {
        reference: Uuid::new_v4(),
        customer_id,
        provider_id,
        service_id,
        availability_slot_id: Some(slot_id),
        requested_language: "en".to_string(),
        travel_date: None,
        notes: String::new(),
        subtotal_amount: dec!(450.00),
        platform_fee: dec!(36.00),
        total_amount: dec!(486.00),
    }
}

#[tokio::test]
#[ignore] // Requires database running
async fn slot_claim_is_exclusive_and_idempotent() {
    let pool = test_pool().await;
    let slots = SlotRepository::new(pool.clone());
    let (_, provider_id, _, slot_id) = seed_provider_with_slot(&pool).await;
    let _ = provider_id;

    let booking_a = Uuid::new_v4();
    let booking_b = Uuid::new_v4();

    let mut conn = pool.acquire().await.expect("acquire");
    assert!(slots.claim(&mut conn, slot_id, booking_a).await.expect("claim a"));
    // Same booking may re-claim; a different booking may not.
    assert!(slots.claim(&mut conn, slot_id, booking_a).await.expect("re-claim a"));
    assert!(!slots.claim(&mut conn, slot_id, booking_b).await.expect("claim b"));

    // Release by the non-holder is a no-op; by the holder frees the slot.
    assert!(!slots.release(&mut conn, slot_id, booking_b).await.expect("release b"));
    assert!(slots.release(&mut conn, slot_id, booking_a).await.expect("release a"));
    assert!(slots.claim(&mut conn, slot_id, booking_b).await.expect("claim after release"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn slot_lookup_carries_city_scope_and_rejects_inverted_windows() {
    let pool = test_pool().await;
    let slots = SlotRepository::new(pool.clone());
    let (_, provider_id, _, slot_id) = seed_provider_with_slot(&pool).await;

    let slot = slots
        .find_by_id(slot_id)
        .await
        .expect("lookup")
        .expect("slot exists");
    assert_eq!(slot.city_scope, "MAKKAH");
    assert!(slot.end_at > slot.start_at);

    // A window that ends before it starts must not be storable.
    let inverted = sqlx::query(
        "INSERT INTO availability_slots (provider_id, service_type, city_scope, start_at, end_at) \
         VALUES ($1, 'GUIDE', 'MAKKAH', NOW() + interval '2 days', NOW() + interval '1 day')",
    )
    .bind(provider_id)
    .execute(&pool)
    .await;
    assert!(inverted.is_err());
}

#[tokio::test]
#[ignore] // Requires database running
async fn booking_insert_and_lookup_round_trip() {
    let pool = test_pool().await;
    let bookings = BookingRepository::new(pool.clone());
    let (customer_id, provider_id, service_id, slot_id) = seed_provider_with_slot(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let inserted = bookings
        .insert(
            &mut tx,
            &booking_fixture(customer_id, provider_id, service_id, slot_id),
        )
        .await
        .expect("insert booking");
    tx.commit().await.expect("commit");

    let fetched = bookings
        .find_by_reference(inserted.reference)
        .await
        .expect("lookup")
        .expect("booking exists");
    assert_eq!(fetched.id, inserted.id);
    assert_eq!(fetched.total_amount, dec!(486.00));
    assert_eq!(fetched.status.as_str(), "REQUESTED");
    assert_eq!(fetched.escrow_status.as_str(), "UNPAID");
}
