use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub db_path: String,
    pub broadcast_queue_size: usize,
    pub sweep_queue_size: usize,
    pub poll_interval_secs: u64,
    /// Advisory candidate radius in km; 0 disables the proximity filter.
    pub broadcast_radius_km: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "dispatch.redb".to_string()),
            broadcast_queue_size: parse_or_default("BROADCAST_QUEUE_SIZE", 1024)?,
            sweep_queue_size: parse_or_default("SWEEP_QUEUE_SIZE", 1024)?,
            poll_interval_secs: parse_or_default("POLL_INTERVAL_SECS", 30)?,
            broadcast_radius_km: parse_or_default("BROADCAST_RADIUS_KM", 0.0)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
