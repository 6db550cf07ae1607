use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Canonical payment event vocabulary after gateway-status normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEventType {
    PaymentSucceeded,
    PaymentFailed,
    PaymentRefunded,
}

impl PaymentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventType::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            PaymentEventType::PaymentFailed => "PAYMENT_FAILED",
            PaymentEventType::PaymentRefunded => "PAYMENT_REFUNDED",
        }
    }
}

impl fmt::Display for PaymentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentEventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PAYMENT_SUCCEEDED" => Ok(PaymentEventType::PaymentSucceeded),
            "PAYMENT_FAILED" => Ok(PaymentEventType::PaymentFailed),
            "PAYMENT_REFUNDED" => Ok(PaymentEventType::PaymentRefunded),
            _ => Err(ParseEventTypeError {
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PaymentEventType {
    type Error = ParseEventTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Error)]
#[error("unrecognized payment event type '{value}'")]
pub struct ParseEventTypeError {
    pub value: String,
}

/// Audit record of a gateway notification. Stored before effects are applied,
/// marked processed in the same transaction as the effects.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentEvent {
    pub id: Uuid,
    pub booking_id: Option<Uuid>,
    pub external_reference: String,
    #[sqlx(try_from = "String")]
    pub event_type: PaymentEventType,
    pub payload: JsonValue,
    pub processed: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub struct PaymentEventRepository {
    pool: PgPool,
}

impl PaymentEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a payment event as unprocessed. `booking_id` is None when the
    /// notification could not be matched to any booking.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        booking_id: Option<Uuid>,
        external_reference: &str,
        event_type: PaymentEventType,
        payload: &JsonValue,
    ) -> Result<PaymentEvent, DatabaseError> {
        sqlx::query_as::<_, PaymentEvent>(
            "INSERT INTO payment_events (booking_id, external_reference, event_type, payload) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, booking_id, external_reference, event_type, payload, processed, \
                       received_at, processed_at",
        )
        .bind(booking_id)
        .bind(external_reference)
        .bind(event_type.as_str())
        .bind(payload)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processed(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<PaymentEvent, DatabaseError> {
        sqlx::query_as::<_, PaymentEvent>(
            "UPDATE payment_events SET processed = true, processed_at = NOW() \
             WHERE id = $1 \
             RETURNING id, booking_id, external_reference, event_type, payload, processed, \
                       received_at, processed_at",
        )
        .bind(id)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentEvent>, DatabaseError> {
        sqlx::query_as::<_, PaymentEvent>(
            "SELECT id, booking_id, external_reference, event_type, payload, processed, \
                    received_at, processed_at \
             FROM payment_events \
             WHERE booking_id = $1 ORDER BY received_at DESC",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
