use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub authorization_service_url: String,
    pub secondary_data_service_url: String,
    pub notification_service_url: String,
    /// Bearer key presented to the internal services (optional in development)
    pub service_api_key: Option<String>,
    /// Page the confirmation mail links to; request id and token are appended
    pub merge_confirm_base_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "identity-platform".to_string()),
            authorization_service_url: env::var("AUTHORIZATION_SERVICE_URL")
                .context("AUTHORIZATION_SERVICE_URL must be set")?,
            secondary_data_service_url: env::var("SECONDARY_DATA_SERVICE_URL")
                .context("SECONDARY_DATA_SERVICE_URL must be set")?,
            notification_service_url: env::var("NOTIFICATION_SERVICE_URL")
                .context("NOTIFICATION_SERVICE_URL must be set")?,
            service_api_key: env::var("SERVICE_API_KEY").ok(),
            merge_confirm_base_url: env::var("MERGE_CONFIRM_BASE_URL").unwrap_or_else(|_| {
                "http://localhost:3000/account/merge/confirm".to_string()
            }),
        })
    }
}
