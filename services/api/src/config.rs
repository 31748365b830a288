//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use attendance_core::DEFAULT_SESSION_VALIDITY_MINUTES;
use chrono::FixedOffset;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials for the administrator created on first start.
#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub log_level: Level,
    /// Validity window shared by every attendance session.
    pub session_validity: chrono::Duration,
    /// Offset used when rendering session times for people (report headers).
    pub display_offset: FixedOffset,
    pub countdown_tick: std::time::Duration,
    pub cors_origin: String,
    pub auth_session_ttl: chrono::Duration,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Attendance Protocol Settings ---
        let validity_minutes = parse_positive(
            &lookup,
            "SESSION_VALIDITY_MINUTES",
            DEFAULT_SESSION_VALIDITY_MINUTES,
        )?;
        let display_offset_str = lookup("DISPLAY_UTC_OFFSET").unwrap_or_else(|| "+08:00".to_string());
        let display_offset = parse_utc_offset(&display_offset_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "DISPLAY_UTC_OFFSET".to_string(),
                format!("'{}' is not an offset like +08:00", display_offset_str),
            )
        })?;
        let countdown_seconds = parse_positive(&lookup, "COUNTDOWN_TICK_SECONDS", 30)?;

        // --- Web and Auth Settings ---
        let cors_origin = lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:8081".to_string());
        let auth_session_days = parse_positive(&lookup, "AUTH_SESSION_DAYS", 30)?;

        let bootstrap_admin = match (lookup("BOOTSTRAP_ADMIN_EMAIL"), lookup("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (Some(_), None) => return Err(ConfigError::MissingVar("BOOTSTRAP_ADMIN_PASSWORD".to_string())),
            _ => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            session_validity: chrono::Duration::minutes(validity_minutes),
            display_offset,
            countdown_tick: std::time::Duration::from_secs(countdown_seconds as u64),
            cors_origin,
            auth_session_ttl: chrono::Duration::days(auth_session_days),
            bootstrap_admin,
        })
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("'{}' is not a positive integer", raw),
        )),
    }
}

/// Parses `+08:00`, `-05:30`, `+8` or `Z`.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
