//! Application configuration loaded from environment variables.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub kv_url: String,
    pub port: u16,
    pub jwks_url: String,
    pub token_issuer: String,
    pub token_audience: String,
    pub webhook_shared_secret: String,
    pub allowed_origins: Vec<String>,
    pub default_channel_types: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            kv_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            jwks_url: env::var("JWKS_URL").context("JWKS_URL must be set")?,
            token_issuer: env::var("TOKEN_ISSUER").context("TOKEN_ISSUER must be set")?,
            token_audience: env::var("TOKEN_AUDIENCE").context("TOKEN_AUDIENCE must be set")?,
            webhook_shared_secret: env::var("WEBHOOK_SHARED_SECRET")
                .context("WEBHOOK_SHARED_SECRET must be set")?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            default_channel_types: env::var("DEFAULT_CHANNEL_TYPES")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }
}
