use thiserror::Error;

/// Errors produced by the Pesapal client, normalized into three buckets the
/// rest of the application cares about.
#[derive(Debug, Clone, Error)]
pub enum PesapalError {
    /// Credentials or endpoint configuration missing
    #[error("{message}")]
    Configuration { message: String },

    /// The gateway answered with an error envelope or unusable payload
    #[error("Pesapal API error: {message}")]
    Api { message: String },

    /// Could not reach the gateway at all
    #[error("Pesapal unreachable: {message}")]
    Network { message: String },
}

impl PesapalError {
    pub fn api(message: impl Into<String>) -> Self {
        PesapalError::Api {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for PesapalError {
    fn from(err: reqwest::Error) -> Self {
        PesapalError::Network {
            message: err.to_string(),
        }
    }
}

impl From<PesapalError> for crate::error::AppError {
    fn from(err: PesapalError) -> Self {
        use crate::error::{AppError, AppErrorKind, GatewayError};

        let kind = match err {
            PesapalError::Configuration { message } => GatewayError::Configuration { message },
            PesapalError::Api { message } => GatewayError::Api { message },
            PesapalError::Network { message } => GatewayError::Unreachable { message },
        };
        AppError::new(AppErrorKind::Gateway(kind))
    }
}
