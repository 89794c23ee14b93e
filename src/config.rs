use anyhow::Context;
use serde::Deserialize;

/// Tokens live for seven days unless `JWT_TTL_MINUTES` says otherwise.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 7;
/// One year; keeps the expiry arithmetic far from overflow.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        anyhow::ensure!(!secret.trim().is_empty(), "JWT_SECRET must not be empty");

        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "clinic".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "clinic-staff".into()),
            ttl_minutes: token_ttl_minutes(std::env::var("JWT_TTL_MINUTES").ok().as_deref()),
        };
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            max_connections,
            jwt,
        })
    }
}

/// Unset, unparsable or non-positive values fall back to the default; large ones are capped.
fn token_ttl_minutes(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v.min(MAX_TOKEN_TTL_MINUTES))
        .unwrap_or(DEFAULT_TOKEN_TTL_MINUTES)
}
