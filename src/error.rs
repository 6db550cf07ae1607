//! Unified error handling for the Umrah Link backend.
//!
//! Layer-specific errors (database, gateway) convert into one `AppError`
//! with HTTP status mapping, machine-readable codes, and user-facing messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::database::booking_repository::{BookingStatus, EscrowStatus};

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INVALID_TRANSITION")]
    InvalidTransition,
    #[serde(rename = "SLOT_UNAVAILABLE")]
    SlotUnavailable,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "DISPUTE_ALREADY_OPEN")]
    DisputeAlreadyOpen,
    #[serde(rename = "BOOKING_STATE_ERROR")]
    BookingStateError,

    // Authorization
    #[serde(rename = "UNAUTHENTICATED")]
    Unauthenticated,
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // Payment gateway
    #[serde(rename = "GATEWAY_CONFIGURATION_ERROR")]
    GatewayConfigurationError,
    #[serde(rename = "GATEWAY_API_ERROR")]
    GatewayApiError,
    #[serde(rename = "GATEWAY_UNREACHABLE")]
    GatewayUnreachable,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Booking-domain business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Requested status change is not in the transition table
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Availability slot is claimed by another booking (or lost a claim race)
    SlotUnavailable { slot_id: Uuid },
    BookingNotFound { booking_id: String },
    SlotNotFound { slot_id: Uuid },
    ServiceNotFound { service_id: Uuid },
    ProviderNotFound { provider_id: Uuid },
    DisputeNotFound { dispute_id: Uuid },
    /// A booking may carry at most one dispute for its lifetime
    DisputeAlreadyOpen { booking_id: Uuid },
    /// Disputes cannot be opened before the provider has acted on the booking
    DisputeTooEarly,
    /// Booking is in a terminal state and cannot be cancelled
    NotCancellable { status: BookingStatus },
    /// Manual escrow release requires a completed booking holding funds
    EscrowNotReleasable {
        status: BookingStatus,
        escrow_status: EscrowStatus,
    },
    /// Payment cannot be initialized for this booking state
    BookingNotPayable { status: BookingStatus },
    /// Funds already captured for this booking
    AlreadyPaid { escrow_status: EscrowStatus },
    /// Gateway resolved the tracking id to a different booking
    PaymentReferenceMismatch,
}

/// Authenticated-but-not-authorized errors
#[derive(Debug, Clone)]
pub enum PermissionError {
    /// Identity headers missing or malformed
    Unauthenticated,
    /// Caller is neither the booking customer, the provider, nor an admin
    NotParticipant,
    AdminOnly { action: String },
    CustomerOnly { action: String },
    /// Customers may only cancel; operational statuses belong to providers/admins
    OperationalStatusForbidden,
}

/// Input validation / booking-creation rule errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    ServiceInactive,
    ProviderNotApproved,
    ProviderNotAcceptingBookings,
    SlotProviderMismatch,
    SlotServiceTypeMismatch,
    SlotInPast,
    InvalidPaymentMethod { value: String },
    /// Gateway callbacks require a public HTTPS URL
    InsecureCallbackUrl { url: String },
    MissingField { field: String },
    InvalidValue { field: String, reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Payment gateway errors, normalized at the client boundary
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Credentials missing or invalid; not the caller's fault, not retryable as-is
    Configuration { message: String },
    /// The gateway rejected or failed the call; carries the remote message
    Api { message: String },
    /// Network failure or timeout reaching the gateway
    Unreachable { message: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Permission(PermissionError),
    Validation(ValidationError),
    Infrastructure(InfrastructureError),
    Gateway(GatewayError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn permission(err: PermissionError) -> Self {
        Self::new(AppErrorKind::Permission(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { .. } => 409,
                DomainError::SlotUnavailable { .. } => 409,
                DomainError::DisputeAlreadyOpen { .. } => 409,
                DomainError::BookingNotFound { .. }
                | DomainError::SlotNotFound { .. }
                | DomainError::ServiceNotFound { .. }
                | DomainError::ProviderNotFound { .. }
                | DomainError::DisputeNotFound { .. } => 404,
                DomainError::DisputeTooEarly
                | DomainError::NotCancellable { .. }
                | DomainError::EscrowNotReleasable { .. }
                | DomainError::BookingNotPayable { .. }
                | DomainError::AlreadyPaid { .. }
                | DomainError::PaymentReferenceMismatch => 422,
            },
            AppErrorKind::Permission(err) => match err {
                PermissionError::Unauthenticated => 401,
                _ => 403,
            },
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::Gateway(err) => match err {
                GatewayError::Configuration { .. } => 503,
                // Remote rejections typically stem from a bad request state
                GatewayError::Api { .. } => 400,
                GatewayError::Unreachable { .. } => 502,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::SlotUnavailable { .. } => ErrorCode::SlotUnavailable,
                DomainError::DisputeAlreadyOpen { .. } => ErrorCode::DisputeAlreadyOpen,
                DomainError::BookingNotFound { .. }
                | DomainError::SlotNotFound { .. }
                | DomainError::ServiceNotFound { .. }
                | DomainError::ProviderNotFound { .. }
                | DomainError::DisputeNotFound { .. } => ErrorCode::NotFound,
                _ => ErrorCode::BookingStateError,
            },
            AppErrorKind::Permission(err) => match err {
                PermissionError::Unauthenticated => ErrorCode::Unauthenticated,
                _ => ErrorCode::PermissionDenied,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Gateway(err) => match err {
                GatewayError::Configuration { .. } => ErrorCode::GatewayConfigurationError,
                GatewayError::Api { .. } => ErrorCode::GatewayApiError,
                GatewayError::Unreachable { .. } => ErrorCode::GatewayUnreachable,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InvalidTransition { from, to } => {
                    format!("Invalid transition from {} to {}", from, to)
                }
                DomainError::SlotUnavailable { .. } => {
                    "Availability slot is already booked".to_string()
                }
                DomainError::BookingNotFound { booking_id } => {
                    format!("Booking '{}' not found", booking_id)
                }
                DomainError::SlotNotFound { slot_id } => {
                    format!("Availability slot '{}' not found", slot_id)
                }
                DomainError::ServiceNotFound { service_id } => {
                    format!("Service '{}' not found", service_id)
                }
                DomainError::ProviderNotFound { provider_id } => {
                    format!("Provider '{}' not found", provider_id)
                }
                DomainError::DisputeNotFound { dispute_id } => {
                    format!("Dispute '{}' not found", dispute_id)
                }
                DomainError::DisputeAlreadyOpen { .. } => {
                    "A dispute is already open for this booking".to_string()
                }
                DomainError::DisputeTooEarly => {
                    "Dispute cannot be opened before the booking is accepted".to_string()
                }
                DomainError::NotCancellable { status } => {
                    format!("Booking cannot be cancelled while {}", status)
                }
                DomainError::EscrowNotReleasable {
                    status,
                    escrow_status,
                } => {
                    format!(
                        "Escrow cannot be released: booking is {} with escrow {}",
                        status, escrow_status
                    )
                }
                DomainError::BookingNotPayable { status } => {
                    format!("Cannot initialize payment for a {} booking", status)
                }
                DomainError::AlreadyPaid { .. } => "Booking is already paid".to_string(),
                DomainError::PaymentReferenceMismatch => {
                    "Payment reference does not match this booking".to_string()
                }
            },
            AppErrorKind::Permission(err) => match err {
                PermissionError::Unauthenticated => "Authentication required".to_string(),
                PermissionError::NotParticipant => {
                    "Only booking participants or platform admins may perform this action"
                        .to_string()
                }
                PermissionError::AdminOnly { action } => {
                    format!("Only platform admins can {}", action)
                }
                PermissionError::CustomerOnly { action } => {
                    format!("Only customers can {}", action)
                }
                PermissionError::OperationalStatusForbidden => {
                    "Customers cannot set operational booking statuses".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::ServiceInactive => "Service is inactive".to_string(),
                ValidationError::ProviderNotApproved => "Provider is not approved".to_string(),
                ValidationError::ProviderNotAcceptingBookings => {
                    "Provider is not accepting bookings right now".to_string()
                }
                ValidationError::SlotProviderMismatch => {
                    "Availability slot does not belong to this provider".to_string()
                }
                ValidationError::SlotServiceTypeMismatch => {
                    "Availability slot service type does not match selected service".to_string()
                }
                ValidationError::SlotInPast => {
                    "Availability slot must be in the future".to_string()
                }
                ValidationError::InvalidPaymentMethod { value } => {
                    format!(
                        "Invalid payment method '{}'. Use CARD, APPLE_PAY, or MPESA",
                        value
                    )
                }
                ValidationError::InsecureCallbackUrl { url } => {
                    format!("Callback URL '{}' must be a public HTTPS URL", url)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Gateway(err) => match err {
                GatewayError::Configuration { message } => message.clone(),
                GatewayError::Api { message } => {
                    format!("Payment gateway error: {}", message)
                }
                GatewayError::Unreachable { message } => {
                    format!("Unable to reach payment gateway: {}", message)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_)
            | AppErrorKind::Permission(_)
            | AppErrorKind::Validation(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::Gateway(err) => match err {
                GatewayError::Configuration { .. } => false,
                GatewayError::Api { .. } => false,
                GatewayError::Unreachable { .. } => true,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and From<PesapalError>
// in payments/error.rs, next to the source types.

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let error = AppError::domain(DomainError::InvalidTransition {
            from: BookingStatus::Completed,
            to: BookingStatus::Accepted,
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::InvalidTransition);
        assert!(error
            .user_message()
            .contains("Invalid transition from COMPLETED to ACCEPTED"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn slot_unavailable_maps_to_conflict() {
        let error = AppError::domain(DomainError::SlotUnavailable {
            slot_id: Uuid::nil(),
        });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::SlotUnavailable);
    }

    #[test]
    fn gateway_configuration_maps_to_service_unavailable() {
        let error = AppError::new(AppErrorKind::Gateway(GatewayError::Configuration {
            message: "credentials missing".to_string(),
        }));

        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), ErrorCode::GatewayConfigurationError);
        assert!(!error.is_retryable());
    }

    #[test]
    fn gateway_api_error_is_client_class() {
        let error = AppError::new(AppErrorKind::Gateway(GatewayError::Api {
            message: "invalid order".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::GatewayApiError);
    }

    #[test]
    fn permission_errors_are_distinct_from_validation() {
        let permission = AppError::permission(PermissionError::NotParticipant);
        let validation = AppError::validation(ValidationError::ServiceInactive);

        assert_eq!(permission.status_code(), 403);
        assert_eq!(validation.status_code(), 400);
        assert_ne!(permission.error_code(), validation.error_code());
    }
}
