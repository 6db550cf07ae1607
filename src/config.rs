//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

pub const PESAPAL_SANDBOX_BASE_URL: &str = "https://cybqa.pesapal.com/pesapalv3/api";
pub const PESAPAL_LIVE_BASE_URL: &str = "https://pay.pesapal.com/v3/api";

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pesapal: PesapalConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Pesapal payment gateway configuration.
///
/// Credentials may legitimately be absent in local development; calls into the
/// gateway client fail with a configuration error at that point rather than at
/// startup.
#[derive(Debug, Clone, Default)]
pub struct PesapalConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// "sandbox" or "live"; picks the default base URL.
    pub environment: String,
    /// Explicit base URL override, takes precedence over `environment`.
    pub base_url: Option<String>,
    /// Pre-registered IPN id. When set, IPN registration is skipped entirely.
    pub ipn_id: Option<String>,
    /// Public URL the gateway should deliver IPN callbacks to.
    pub ipn_url: Option<String>,
    /// Default browser return URL after checkout.
    pub callback_url: Option<String>,
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            pesapal: PesapalConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.pesapal.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl PesapalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PesapalConfig {
            consumer_key: env::var("PESAPAL_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: env::var("PESAPAL_CONSUMER_SECRET").unwrap_or_default(),
            environment: env::var("PESAPAL_ENV").unwrap_or_else(|_| "sandbox".to_string()),
            base_url: env::var("PESAPAL_BASE_URL").ok().filter(|v| !v.is_empty()),
            ipn_id: env::var("PESAPAL_IPN_ID").ok().filter(|v| !v.is_empty()),
            ipn_url: env::var("PESAPAL_IPN_URL").ok().filter(|v| !v.is_empty()),
            callback_url: env::var("PESAPAL_CALLBACK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            timeout_secs: env::var("PESAPAL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "25".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PESAPAL_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.consumer_key.is_empty() && !self.consumer_secret.is_empty()
    }

    /// Effective API base URL: explicit override wins, then the environment.
    pub fn resolve_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        if self.environment == "live" {
            return PESAPAL_LIVE_BASE_URL.to_string();
        }
        PESAPAL_SANDBOX_BASE_URL.to_string()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_environments = ["sandbox", "live"];
        if !valid_environments.contains(&self.environment.as_str()) {
            return Err(ConfigError::InvalidValue("PESAPAL_ENV".to_string()));
        }

        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(
                    "PESAPAL_BASE_URL must be a valid URL".to_string(),
                ));
            }
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PESAPAL_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
