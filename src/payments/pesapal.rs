//! Pesapal API v3 client.
//!
//! Every call authenticates with a fresh bearer token; Pesapal tokens are
//! short-lived and the call volume here does not justify caching. Error
//! envelopes are sniffed out of 200-responses because the gateway reports
//! many failures with an HTTP success status.

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::config::PesapalConfig;
use crate::payments::error::PesapalError;
use crate::payments::gateway::{
    GatewayTransactionStatus, OrderRequest, PaymentGateway, RegisteredIpn, SubmittedOrder,
};

const MAX_DESCRIPTION_CHARS: usize = 100;

pub struct PesapalClient {
    config: PesapalConfig,
    http: reqwest::Client,
}

impl PesapalClient {
    /// Constructs even without credentials; each API call re-checks
    /// configuration so local development without keys still boots.
    pub fn new(config: PesapalConfig) -> Result<Self, PesapalError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, http })
    }

    fn require_configuration(&self) -> Result<(), PesapalError> {
        if !self.config.is_configured() {
            return Err(PesapalError::Configuration {
                message: "Pesapal credentials are not configured".to_string(),
            });
        }
        Ok(())
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, PesapalError> {
        self.require_configuration()?;

        let url = format!("{}/{}", self.config.resolve_base_url(), path);
        debug!(%url, "pesapal request");

        let mut request = self
            .http
            .request(method, &url)
            .header("Accept", "application/json");

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let http_status = response.status().as_u16();
        let payload: JsonValue = response.json().await.map_err(|e| PesapalError::Api {
            message: format!("invalid JSON from gateway: {}", e),
        })?;

        if let Err(message) = check_envelope(http_status, &payload) {
            warn!(%url, http_status, %message, "pesapal call failed");
            return Err(PesapalError::api(message));
        }

        Ok(payload)
    }
}

/// Decide whether a gateway response is an error, regardless of HTTP status.
/// Returns the extracted message on failure.
pub fn check_envelope(http_status: u16, payload: &JsonValue) -> Result<(), String> {
    if http_status >= 400 {
        return Err(extract_message(payload));
    }

    // Pesapal sometimes reports failure inside a 200 body.
    let status_field = payload.get("status");
    let status_is_error = match status_field {
        Some(JsonValue::Number(n)) => n.as_u64().map(|v| v >= 400).unwrap_or(false),
        Some(JsonValue::String(s)) => {
            s.parse::<u16>().map(|v| v >= 400).unwrap_or_else(|_| {
                matches!(
                    s.to_ascii_lowercase().as_str(),
                    "failed" | "failure" | "error" | "invalid"
                )
            })
        }
        _ => false,
    };
    if status_is_error {
        return Err(extract_message(payload));
    }

    match payload.get("error") {
        Some(JsonValue::String(s)) if !s.is_empty() => Err(extract_message(payload)),
        Some(JsonValue::Object(o)) if !o.is_empty() => Err(extract_message(payload)),
        _ => Ok(()),
    }
}

fn extract_message(payload: &JsonValue) -> String {
    if let Some(message) = payload
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(JsonValue::as_str)
    {
        return message.to_string();
    }
    if let Some(message) = payload.get("message").and_then(JsonValue::as_str) {
        return message.to_string();
    }
    if let Some(message) = payload.get("error").and_then(JsonValue::as_str) {
        return message.to_string();
    }
    "gateway request failed".to_string()
}

fn string_field(payload: &JsonValue, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    async fn request_access_token(&self) -> Result<String, PesapalError> {
        let body = json!({
            "consumer_key": &self.config.consumer_key,
            "consumer_secret": &self.config.consumer_secret,
        });

        let payload = self
            .request_json(Method::POST, "Auth/RequestToken", None, Some(&body))
            .await?;

        string_field(&payload, "token")
            .ok_or_else(|| PesapalError::api("token missing from auth response"))
    }

    async fn register_ipn(&self, token: &str, ipn_url: &str) -> Result<RegisteredIpn, PesapalError> {
        let body = json!({
            "url": ipn_url,
            "ipn_notification_type": "POST",
        });

        let payload = self
            .request_json(Method::POST, "URLSetup/RegisterIPN", Some(token), Some(&body))
            .await?;

        let ipn_id = string_field(&payload, "ipn_id")
            .ok_or_else(|| PesapalError::api("ipn_id missing from IPN registration response"))?;

        Ok(RegisteredIpn { ipn_id })
    }

    async fn submit_order(
        &self,
        token: &str,
        order: &OrderRequest,
    ) -> Result<SubmittedOrder, PesapalError> {
        let amount = order
            .amount
            .to_f64()
            .ok_or_else(|| PesapalError::api("order amount is not representable"))?;
        let description: String = order.description.chars().take(MAX_DESCRIPTION_CHARS).collect();

        let body = json!({
            "id": order.merchant_reference.to_string(),
            "currency": order.currency.to_uppercase(),
            "amount": amount,
            "description": description,
            "callback_url": &order.callback_url,
            "notification_id": &order.notification_id,
            "billing_address": &order.billing,
        });

        let payload = self
            .request_json(
                Method::POST,
                "Transactions/SubmitOrderRequest",
                Some(token),
                Some(&body),
            )
            .await?;

        let order_tracking_id = string_field(&payload, "order_tracking_id")
            .ok_or_else(|| PesapalError::api("order_tracking_id missing from order response"))?;
        let redirect_url = string_field(&payload, "redirect_url")
            .ok_or_else(|| PesapalError::api("redirect_url missing from order response"))?;
        let merchant_reference = string_field(&payload, "merchant_reference")
            .unwrap_or_else(|| order.merchant_reference.to_string());

        Ok(SubmittedOrder {
            order_tracking_id,
            redirect_url,
            merchant_reference,
        })
    }

    async fn transaction_status(
        &self,
        token: &str,
        order_tracking_id: &str,
    ) -> Result<GatewayTransactionStatus, PesapalError> {
        let path = format!(
            "Transactions/GetTransactionStatus?orderTrackingId={}",
            order_tracking_id
        );

        let payload = self
            .request_json(Method::GET, &path, Some(token), None)
            .await?;

        // Prefer the human-readable status description, which carries the
        // COMPLETED/FAILED/REVERSED vocabulary.
        let payment_status = string_field(&payload, "payment_status_description")
            .or_else(|| string_field(&payload, "payment_status"))
            .or_else(|| string_field(&payload, "status"))
            .unwrap_or_else(|| "PENDING".to_string())
            .to_uppercase();

        let merchant_reference = string_field(&payload, "merchant_reference");

        Ok(GatewayTransactionStatus {
            payment_status,
            merchant_reference,
            payload,
        })
    }
}
