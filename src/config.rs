use std::str::FromStr;
use std::time::Duration;

use crate::platform::graph::PlatformConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub max_connection_pooling: u32,
    pub port: u16,
    pub log_file: String,
    pub home_country: String,
    pub platform: PlatformConfig,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match dotenv::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

fn optional(key: &'static str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = optional(key, default);
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn country_code(value: String) -> Result<String, ConfigError> {
    let code = value.trim().to_uppercase();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ConfigError::InvalidValue {
            key: "HOME_COUNTRY",
            value,
        });
    }
    Ok(code)
}

impl AppConfig {
    /// Reads the process environment, with `.env` as a fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        // mandatory fields
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;
        let access_token = required("PLATFORM_ACCESS_TOKEN")?;
        let ad_account_id = required("PLATFORM_AD_ACCOUNT_ID")?;

        // optional fields
        let max_connection_pooling = parsed("MAX_CONNECTION_POOLING", "5")?;
        let port = parsed("PORT", "3000")?;
        let log_file = optional("LOG_FILE", "app.log");
        let home_country = country_code(optional("HOME_COUNTRY", "LY"))?;
        let timeout_secs: u64 = parsed("PLATFORM_TIMEOUT_SECS", "60")?;

        let platform = PlatformConfig {
            access_token,
            ad_account_id: ad_account_id.trim().trim_start_matches("act_").to_string(),
            base_url: optional("PLATFORM_API_BASE", "https://graph.facebook.com"),
            api_version: optional("PLATFORM_API_VERSION", "v19.0"),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            database_url,
            jwt_secret,
            max_connection_pooling,
            port,
            log_file,
            home_country,
            platform,
        })
    }
}
