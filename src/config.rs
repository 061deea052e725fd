//! Runtime configuration.
//!
//! Loaded from environment variables (and a `.env` file when present) with
//! defaults suitable for a development device.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote store, e.g. `https://project.example.co`.
    pub remote_url: String,
    /// Anonymous/service key sent as `apikey` and bearer token.
    pub api_key: Option<String>,
    /// LMDB environment name; the directory is `<db_path>.lmdb`.
    pub db_path: PathBuf,
    /// LMDB map size in bytes.
    pub map_size: usize,
    /// Per-request timeout for remote calls.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: "http://127.0.0.1:54321".to_string(),
            api_key: None,
            db_path: PathBuf::from("./field_sync"),
            map_size: 64 * 1024 * 1024,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let remote_url = env::var("FIELD_SYNC_REMOTE_URL").unwrap_or(defaults.remote_url);
        let api_key = env::var("FIELD_SYNC_API_KEY").ok().filter(|k| !k.is_empty());
        let db_path = env::var("FIELD_SYNC_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let map_size = match env::var("FIELD_SYNC_MAP_SIZE_MB") {
            Ok(raw) => parse_number::<usize>("FIELD_SYNC_MAP_SIZE_MB", &raw)? * 1024 * 1024,
            Err(_) => defaults.map_size,
        };

        let request_timeout = match env::var("FIELD_SYNC_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_number("FIELD_SYNC_TIMEOUT_SECS", &raw)?),
            Err(_) => defaults.request_timeout,
        };

        Ok(Self {
            remote_url: remote_url.trim_end_matches('/').to_string(),
            api_key,
            db_path,
            map_size,
            request_timeout,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{name} must be a positive integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so everything touching them lives in one test.
    #[test]
    fn test_config_from_env() {
        env::remove_var("FIELD_SYNC_REMOTE_URL");
        env::remove_var("FIELD_SYNC_API_KEY");
        env::remove_var("FIELD_SYNC_DB_PATH");
        env::remove_var("FIELD_SYNC_MAP_SIZE_MB");
        env::remove_var("FIELD_SYNC_TIMEOUT_SECS");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.remote_url, "http://127.0.0.1:54321");
        assert!(config.api_key.is_none());
        assert_eq!(config.map_size, 64 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(15));

        env::set_var("FIELD_SYNC_REMOTE_URL", "https://remote.example/");
        env::set_var("FIELD_SYNC_MAP_SIZE_MB", "8");
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.remote_url, "https://remote.example");
        assert_eq!(config.map_size, 8 * 1024 * 1024);

        env::set_var("FIELD_SYNC_TIMEOUT_SECS", "soon");
        assert!(matches!(SyncConfig::from_env(), Err(AppError::Config(_))));

        env::remove_var("FIELD_SYNC_REMOTE_URL");
        env::remove_var("FIELD_SYNC_MAP_SIZE_MB");
        env::remove_var("FIELD_SYNC_TIMEOUT_SECS");
    }
}
