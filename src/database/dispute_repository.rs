use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Rejected,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "OPEN",
            DisputeStatus::UnderReview => "UNDER_REVIEW",
            DisputeStatus::Resolved => "RESOLVED",
            DisputeStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DisputeStatus::Resolved | DisputeStatus::Rejected)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisputeStatus {
    type Err = ParseDisputeFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(DisputeStatus::Open),
            "UNDER_REVIEW" => Ok(DisputeStatus::UnderReview),
            "RESOLVED" => Ok(DisputeStatus::Resolved),
            "REJECTED" => Ok(DisputeStatus::Rejected),
            _ => Err(ParseDisputeFieldError {
                field: "dispute status",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for DisputeStatus {
    type Error = ParseDisputeFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What the dispute opener is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestedResolution {
    Refund,
    Release,
    Partial,
    Other,
}

impl RequestedResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestedResolution::Refund => "REFUND",
            RequestedResolution::Release => "RELEASE",
            RequestedResolution::Partial => "PARTIAL",
            RequestedResolution::Other => "OTHER",
        }
    }
}

impl fmt::Display for RequestedResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestedResolution {
    type Err = ParseDisputeFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REFUND" => Ok(RequestedResolution::Refund),
            "RELEASE" => Ok(RequestedResolution::Release),
            "PARTIAL" => Ok(RequestedResolution::Partial),
            "OTHER" => Ok(RequestedResolution::Other),
            _ => Err(ParseDisputeFieldError {
                field: "requested resolution",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RequestedResolution {
    type Error = ParseDisputeFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The admin's ruling on a dispute. Each non-pending decision maps to a
/// dispute outcome and, for refund/release, an escrow effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminDecision {
    Pending,
    ApproveRefund,
    ApproveRelease,
    PartialRemedy,
    RejectClaim,
}

impl AdminDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminDecision::Pending => "PENDING",
            AdminDecision::ApproveRefund => "APPROVE_REFUND",
            AdminDecision::ApproveRelease => "APPROVE_RELEASE",
            AdminDecision::PartialRemedy => "PARTIAL_REMEDY",
            AdminDecision::RejectClaim => "REJECT_CLAIM",
        }
    }

    /// Dispute status a decision settles into.
    pub fn outcome(&self) -> Option<DisputeStatus> {
        match self {
            AdminDecision::Pending => None,
            AdminDecision::RejectClaim => Some(DisputeStatus::Rejected),
            AdminDecision::ApproveRefund
            | AdminDecision::ApproveRelease
            | AdminDecision::PartialRemedy => Some(DisputeStatus::Resolved),
        }
    }
}

impl fmt::Display for AdminDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminDecision {
    type Err = ParseDisputeFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AdminDecision::Pending),
            "APPROVE_REFUND" => Ok(AdminDecision::ApproveRefund),
            "APPROVE_RELEASE" => Ok(AdminDecision::ApproveRelease),
            "PARTIAL_REMEDY" => Ok(AdminDecision::PartialRemedy),
            "REJECT_CLAIM" => Ok(AdminDecision::RejectClaim),
            _ => Err(ParseDisputeFieldError {
                field: "admin decision",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for AdminDecision {
    type Error = ParseDisputeFieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Error)]
#[error("unrecognized {field} value '{value}'")]
pub struct ParseDisputeFieldError {
    pub field: &'static str,
    pub value: String,
}

/// One dispute per booking, ever; enforced by a unique constraint on
/// `booking_id`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Dispute {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub opened_by: Uuid,
    pub reason: String,
    #[sqlx(try_from = "String")]
    pub requested_resolution: RequestedResolution,
    #[sqlx(try_from = "String")]
    pub status: DisputeStatus,
    #[sqlx(try_from = "String")]
    pub admin_decision: AdminDecision,
    pub decision_note: String,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const DISPUTE_COLUMNS: &str = "id, booking_id, opened_by, reason, requested_resolution, status, \
     admin_decision, decision_note, resolved_by, resolved_at, created_at, updated_at";

pub struct DisputeRepository {
    pool: PgPool,
}

impl DisputeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A unique violation here means a dispute already exists for the booking;
    /// the caller translates it to a domain conflict.
    pub async fn insert(
        &self,
        conn: &mut PgConnection,
        booking_id: Uuid,
        opened_by: Uuid,
        reason: &str,
        requested_resolution: RequestedResolution,
    ) -> Result<Dispute, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "INSERT INTO disputes (booking_id, opened_by, reason, requested_resolution) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {DISPUTE_COLUMNS}"
        ))
        .bind(booking_id)
        .bind(opened_by)
        .bind(reason)
        .bind(requested_resolution.as_str())
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Dispute>, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_booking(&self, booking_id: Uuid) -> Result<Option<Dispute>, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_all(&self) -> Result<Vec<Dispute>, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {DISPUTE_COLUMNS} FROM disputes ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Disputes on bookings the user participates in, as customer or as the
    /// user behind the provider profile.
    pub async fn list_for_participant(&self, user_id: Uuid) -> Result<Vec<Dispute>, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT d.{} FROM disputes d \
             JOIN bookings b ON b.id = d.booking_id \
             LEFT JOIN provider_profiles p ON p.id = b.provider_id \
             WHERE b.customer_id = $1 OR p.user_id = $1 \
             ORDER BY d.created_at DESC",
            DISPUTE_COLUMNS.replace(", ", ", d.")
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn set_status(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        status: DisputeStatus,
    ) -> Result<Dispute, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "UPDATE disputes SET status = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {DISPUTE_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_resolved(
        &self,
        conn: &mut PgConnection,
        id: Uuid,
        status: DisputeStatus,
        decision: AdminDecision,
        decision_note: &str,
        resolved_by: Uuid,
    ) -> Result<Dispute, DatabaseError> {
        sqlx::query_as::<_, Dispute>(&format!(
            "UPDATE disputes \
             SET status = $2, admin_decision = $3, decision_note = $4, \
                 resolved_by = $5, resolved_at = NOW(), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {DISPUTE_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(decision.as_str())
        .bind(decision_note)
        .bind(resolved_by)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_outcomes() {
        assert_eq!(AdminDecision::Pending.outcome(), None);
        assert_eq!(
            AdminDecision::RejectClaim.outcome(),
            Some(DisputeStatus::Rejected)
        );
        assert_eq!(
            AdminDecision::ApproveRefund.outcome(),
            Some(DisputeStatus::Resolved)
        );
        assert_eq!(
            AdminDecision::ApproveRelease.outcome(),
            Some(DisputeStatus::Resolved)
        );
        assert_eq!(
            AdminDecision::PartialRemedy.outcome(),
            Some(DisputeStatus::Resolved)
        );
    }

    #[test]
    fn dispute_fields_round_trip() {
        for status in ["OPEN", "UNDER_REVIEW", "RESOLVED", "REJECTED"] {
            let parsed: DisputeStatus = status.parse().expect("valid status");
            assert_eq!(parsed.as_str(), status);
        }
        for resolution in ["REFUND", "RELEASE", "PARTIAL", "OTHER"] {
            let parsed: RequestedResolution = resolution.parse().expect("valid resolution");
            assert_eq!(parsed.as_str(), resolution);
        }
        assert!("ESCALATED".parse::<DisputeStatus>().is_err());
    }
}
