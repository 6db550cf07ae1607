use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// A bookable time window published by a provider.
///
/// `held_by` carries the id of the booking currently occupying the slot.
/// Claim and release are single conditional UPDATEs so that two concurrent
/// bookings can never both take the same slot.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub service_type: String,
    pub city_scope: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_available: bool,
    pub held_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub struct SlotRepository {
    pool: PgPool,
}

impl SlotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, DatabaseError> {
        sqlx::query_as::<_, AvailabilitySlot>(
            "SELECT id, provider_id, service_type, city_scope, start_at, end_at, is_available, held_by, created_at \
             FROM availability_slots WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Atomically claim a slot for a booking. Returns false when the slot is
    /// already taken by a different booking. Re-claiming for the same booking
    /// succeeds, which makes the operation idempotent under retries.
    pub async fn claim(
        &self,
        conn: &mut PgConnection,
        slot_id: Uuid,
        booking_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE availability_slots \
             SET is_available = false, held_by = $2 \
             WHERE id = $1 \
               AND (held_by = $2 OR (is_available AND held_by IS NULL))",
        )
        .bind(slot_id)
        .bind(booking_id)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a slot held by the given booking. A no-op when the slot is
    /// held by someone else or already free.
    pub async fn release(
        &self,
        conn: &mut PgConnection,
        slot_id: Uuid,
        booking_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE availability_slots \
             SET is_available = true, held_by = NULL \
             WHERE id = $1 AND held_by = $2",
        )
        .bind(slot_id)
        .bind(booking_id)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}
