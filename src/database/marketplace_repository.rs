use crate::database::error::DatabaseError;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A purchasable service listing.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Service {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub service_type: String,
    pub city_scope: String,
    pub title: String,
    pub price_amount: Decimal,
    pub currency: String,
    pub is_active: bool,
}

/// Provider business profile. `user_id` links the profile to the account
/// that acts on its behalf.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub verification_status: String,
    pub is_accepting_bookings: bool,
}

impl ProviderProfile {
    pub fn is_approved(&self) -> bool {
        self.verification_status == "APPROVED"
    }
}

/// Contact fields needed for participant notifications.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserContact {
    pub id: Uuid,
    pub email: String,
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
}

/// Read-only lookups into the marketplace catalog. Bookings reference these
/// rows but never mutate them, except for slot holds which live in
/// `SlotRepository`.
pub struct MarketplaceRepository {
    pool: PgPool,
}

impl MarketplaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_service(&self, id: Uuid) -> Result<Option<Service>, DatabaseError> {
        sqlx::query_as::<_, Service>(
            "SELECT id, provider_id, service_type, city_scope, title, price_amount, currency, is_active \
             FROM services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_provider(&self, id: Uuid) -> Result<Option<ProviderProfile>, DatabaseError> {
        sqlx::query_as::<_, ProviderProfile>(
            "SELECT id, user_id, verification_status, is_accepting_bookings \
             FROM provider_profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_user_contact(&self, id: Uuid) -> Result<Option<UserContact>, DatabaseError> {
        sqlx::query_as::<_, UserContact>(
            "SELECT id, email, phone_number, first_name, last_name \
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
