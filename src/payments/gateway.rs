use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::payments::error::PesapalError;

/// Checkout order submitted to the gateway. `merchant_reference` is the
/// booking's public reference and is how notifications find their way back.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub merchant_reference: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub callback_url: String,
    pub notification_id: String,
    pub billing: BillingDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct BillingDetails {
    pub email_address: String,
    pub phone_number: String,
    pub first_name: String,
    pub last_name: String,
    pub country_code: String,
}

impl Default for BillingDetails {
    fn default() -> Self {
        Self {
            email_address: "customer@umrahlink.app".to_string(),
            phone_number: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            country_code: "SA".to_string(),
        }
    }
}

/// Result of a successful order submission.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub order_tracking_id: String,
    pub redirect_url: String,
    pub merchant_reference: String,
}

#[derive(Debug, Clone)]
pub struct RegisteredIpn {
    pub ipn_id: String,
}

/// Normalized transaction status lookup result. `payment_status` is the raw
/// gateway vocabulary uppercased; mapping to escrow effects happens in the
/// payment flow service.
#[derive(Debug, Clone)]
pub struct GatewayTransactionStatus {
    pub payment_status: String,
    pub merchant_reference: Option<String>,
    pub payload: JsonValue,
}

/// Seam between payment flows and the concrete gateway, mockable in tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_access_token(&self) -> Result<String, PesapalError>;

    /// Register the notification URL; returns the IPN id to attach to orders.
    async fn register_ipn(&self, token: &str, ipn_url: &str) -> Result<RegisteredIpn, PesapalError>;

    async fn submit_order(
        &self,
        token: &str,
        order: &OrderRequest,
    ) -> Result<SubmittedOrder, PesapalError>;

    async fn transaction_status(
        &self,
        token: &str,
        order_tracking_id: &str,
    ) -> Result<GatewayTransactionStatus, PesapalError>;
}
