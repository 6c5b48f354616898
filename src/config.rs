use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use std::env;

use crate::utils::filename::DEFAULT_MAX_NAME_LENGTH;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_address: String,
    pub data_root: String,
    pub dav_user: String,
    pub maintenance: bool,
    pub installed_version: Option<String>,
    pub log_app_name: String,
    pub instance_id: String,
    pub quota_bytes: Option<u64>,
    pub chunk_session_ttl_seconds: u64,
    pub max_filename_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_address: "0.0.0.0:8080".to_string(),
            data_root: "./data".to_string(),
            dav_user: "admin".to_string(),
            maintenance: false,
            installed_version: None,
            log_app_name: "webdav".to_string(),
            instance_id: "davfiles".to_string(),
            quota_bytes: None,
            chunk_session_ttl_seconds: 86_400,
            max_filename_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let config = Config {
            server_address: env::var("SERVER_ADDRESS").unwrap_or(defaults.server_address),
            data_root: env::var("DATA_ROOT").unwrap_or(defaults.data_root),
            dav_user: env::var("DAV_USER").unwrap_or(defaults.dav_user),
            maintenance: env::var("MAINTENANCE")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.maintenance),
            installed_version: env::var("INSTALLED_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_app_name: env::var("LOG_APP_NAME").unwrap_or(defaults.log_app_name),
            instance_id: env::var("INSTANCE_ID").unwrap_or(defaults.instance_id),
            quota_bytes: match env::var("QUOTA_BYTES") {
                Ok(v) => Some(v.parse().context("QUOTA_BYTES must be a byte count")?),
                Err(_) => None,
            },
            chunk_session_ttl_seconds: match env::var("CHUNK_SESSION_TTL_SECONDS") {
                Ok(v) => v.parse().context("CHUNK_SESSION_TTL_SECONDS must be a number")?,
                Err(_) => defaults.chunk_session_ttl_seconds,
            },
            max_filename_length: env::var("MAX_FILENAME_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_filename_length),
        };
        config.chunk_session_ttl()?;
        Ok(config)
    }

    /// How long an unfinished chunked upload is kept
    pub fn chunk_session_ttl(&self) -> Result<Duration> {
        i64::try_from(self.chunk_session_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                anyhow!(
                    "CHUNK_SESSION_TTL_SECONDS out of range: {}",
                    self.chunk_session_ttl_seconds
                )
            })
    }

    /// An upgrade is pending when the data was last touched by another
    /// version of this server
    pub fn upgrade_pending(&self) -> bool {
        match &self.installed_version {
            Some(installed) => installed != env!("CARGO_PKG_VERSION"),
            None => false,
        }
    }
}
