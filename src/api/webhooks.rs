//! Payment notification endpoints.
//!
//! Pesapal delivers IPNs as either GET query parameters or a POST JSON body,
//! and field casing differs between the two, so extraction checks the query
//! string first and falls back to the body. A separate internal shape
//! (`event_type` + `reference`) lets trusted tooling inject pre-normalized
//! events.
//!
//! The endpoint is unauthenticated by design: it never trusts the payload for
//! money state, every effect is driven by a fresh status lookup against the
//! gateway.

use axum::extract::{Query, State};
use axum::Json;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use tracing::info;

use crate::api::AppState;
use crate::error::{AppError, AppResult, ValidationError};
use crate::services::payment_flow::ProcessedNotification;

const DEFAULT_NOTIFICATION_TYPE: &str = "IPNCHANGE";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WebhookParams {
    pub order_tracking_id: Option<String>,
    pub merchant_reference: Option<String>,
    pub notification_type: String,
    pub event_type: Option<String>,
    pub reference: Option<String>,
}

/// Pull notification fields from the query string, then the JSON body.
pub fn extract_params(
    query: &HashMap<String, String>,
    body: Option<&JsonValue>,
) -> WebhookParams {
    let field = |names: &[&str]| -> Option<String> {
        for name in names {
            if let Some(value) = query.get(*name).filter(|v| !v.is_empty()) {
                return Some(value.clone());
            }
        }
        if let Some(body) = body {
            for name in names {
                if let Some(value) = body
                    .get(name)
                    .and_then(JsonValue::as_str)
                    .filter(|v| !v.is_empty())
                {
                    return Some(value.to_string());
                }
            }
        }
        None
    };

    WebhookParams {
        order_tracking_id: field(&["OrderTrackingId", "order_tracking_id"]),
        merchant_reference: field(&[
            "OrderMerchantReference",
            "order_merchant_reference",
            "merchant_reference",
        ]),
        notification_type: field(&["OrderNotificationType", "order_notification_type"])
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_TYPE.to_string()),
        event_type: field(&["event_type"]),
        reference: field(&["reference", "booking_reference"]),
    }
}

pub async fn payment_webhook_get(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> AppResult<Json<JsonValue>> {
    let params = extract_params(&query, None);
    handle_notification(&state, params, json!({})).await
}

pub async fn payment_webhook_post(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Option<Json<JsonValue>>,
) -> AppResult<Json<JsonValue>> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let params = extract_params(&query, Some(&body));
    handle_notification(&state, params, body).await
}

async fn handle_notification(
    state: &AppState,
    params: WebhookParams,
    body: JsonValue,
) -> AppResult<Json<JsonValue>> {
    info!(
        order_tracking_id = params.order_tracking_id.as_deref().unwrap_or(""),
        merchant_reference = params.merchant_reference.as_deref().unwrap_or(""),
        notification_type = %params.notification_type,
        internal = params.event_type.is_some(),
        "payment notification received"
    );

    let outcome = match &params.event_type {
        Some(raw) => {
            let event_type = raw.to_uppercase().parse().map_err(|_| {
                AppError::validation(ValidationError::InvalidValue {
                    field: "event_type".to_string(),
                    reason: format!("'{}' is not a known payment event", raw),
                })
            })?;
            let reference = params
                .reference
                .as_deref()
                .or(params.merchant_reference.as_deref())
                .ok_or_else(|| {
                    AppError::validation(ValidationError::MissingField {
                        field: "reference".to_string(),
                    })
                })?;
            state
                .payments
                .process_internal_event(event_type, reference, &body)
                .await?
        }
        None => {
            let tracking_id = params.order_tracking_id.as_deref().ok_or_else(|| {
                AppError::validation(ValidationError::MissingField {
                    field: "OrderTrackingId".to_string(),
                })
            })?;
            state
                .payments
                .process_tracking(tracking_id, params.merchant_reference.as_deref())
                .await?
        }
    };

    Ok(Json(ack(&params, &outcome)))
}

/// Pesapal expects its own field names echoed back with status 200; the extra
/// fields are for our own observability.
fn ack(params: &WebhookParams, outcome: &ProcessedNotification) -> JsonValue {
    json!({
        "orderNotificationType": &params.notification_type,
        "orderTrackingId": &params.order_tracking_id,
        "orderMerchantReference": &params.merchant_reference,
        "status": 200,
        "provider": "PESAPAL",
        "payment_status": &outcome.payment_status,
        "event_type": outcome.event_type,
        "booking_found": outcome.booking_found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_fields_win_over_body() {
        let mut query = HashMap::new();
        query.insert("OrderTrackingId".to_string(), "track-1".to_string());
        let body = json!({"OrderTrackingId": "track-2", "OrderMerchantReference": "ref-1"});

        let params = extract_params(&query, Some(&body));
        assert_eq!(params.order_tracking_id.as_deref(), Some("track-1"));
        assert_eq!(params.merchant_reference.as_deref(), Some("ref-1"));
    }

    #[test]
    fn snake_case_body_fields_are_accepted() {
        let query = HashMap::new();
        let body = json!({
            "order_tracking_id": "track-9",
            "merchant_reference": "ref-9",
        });

        let params = extract_params(&query, Some(&body));
        assert_eq!(params.order_tracking_id.as_deref(), Some("track-9"));
        assert_eq!(params.merchant_reference.as_deref(), Some("ref-9"));
    }

    #[test]
    fn notification_type_defaults_to_ipnchange() {
        let params = extract_params(&HashMap::new(), None);
        assert_eq!(params.notification_type, DEFAULT_NOTIFICATION_TYPE);
        assert_eq!(params.order_tracking_id, None);
    }

    #[test]
    fn internal_event_fields_are_extracted() {
        let query = HashMap::new();
        let body = json!({
            "event_type": "PAYMENT_SUCCEEDED",
            "reference": "11111111-2222-3333-4444-555555555555",
        });

        let params = extract_params(&query, Some(&body));
        assert_eq!(params.event_type.as_deref(), Some("PAYMENT_SUCCEEDED"));
        assert_eq!(
            params.reference.as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
    }

    #[test]
    fn empty_values_are_treated_as_missing() {
        let mut query = HashMap::new();
        query.insert("OrderTrackingId".to_string(), String::new());
        let body = json!({"OrderTrackingId": "track-3"});

        let params = extract_params(&query, Some(&body));
        assert_eq!(params.order_tracking_id.as_deref(), Some("track-3"));
    }
}
