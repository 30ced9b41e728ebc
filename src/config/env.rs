//! Environment variable loading.
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::ServerConfig;
use crate::core::chunking::DEFAULT_CHUNK_SIZE;
use crate::core::dispatch::DEFAULT_MAX_CONCURRENT_GENERATIONS;

pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 9000;
pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
pub(crate) const DEFAULT_MODEL: &str = "edge";
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
pub(crate) const DEFAULT_HEARTBEAT_GRACE_MS: u64 = 1000;
pub(crate) const DEFAULT_CHUNK_DELAY_MS: u64 = 10;
pub(crate) const DEFAULT_REFERENCE_AUDIO_DIR: &str = "reference_audio";
pub(crate) const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub(crate) const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
pub(crate) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Non-empty value of `key`
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse `key` as `T`, or `None` when unset
fn parse_var<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: {raw:?} ({e})").into()),
        None => Ok(None),
    }
}

/// Split a comma-separated list, dropping blank items
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load configuration from environment variables with defaults.
pub(crate) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    Ok(ServerConfig {
        host: var("TTS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: parse_var("TTS_PORT")?.unwrap_or(DEFAULT_PORT),
        log_level: var("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),

        default_model: var("TTS_DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        preload_models: var("TTS_PRELOAD_MODELS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default(),
        reference_audio_dir: var("TTS_REFERENCE_AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REFERENCE_AUDIO_DIR)),
        max_concurrent_generations: parse_var("TTS_MAX_CONCURRENT_GENERATIONS")?
            .unwrap_or(DEFAULT_MAX_CONCURRENT_GENERATIONS),

        chunk_size_bytes: parse_var("TTS_CHUNK_SIZE_BYTES")?.unwrap_or(DEFAULT_CHUNK_SIZE),
        chunk_delay_ms: parse_var("TTS_CHUNK_DELAY_MS")?.unwrap_or(DEFAULT_CHUNK_DELAY_MS),
        heartbeat_interval_secs: parse_var("TTS_HEARTBEAT_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        heartbeat_grace_ms: parse_var("TTS_HEARTBEAT_GRACE_MS")?
            .unwrap_or(DEFAULT_HEARTBEAT_GRACE_MS),

        cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
        rate_limit_requests_per_second: parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")?
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: parse_var("RATE_LIMIT_BURST_SIZE")?
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: parse_var("MAX_WEBSOCKET_CONNECTIONS")?,
        max_connections_per_ip: parse_var("MAX_CONNECTIONS_PER_IP")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}

/// Every variable read by [`load_from_env`]
#[cfg(test)]
pub(crate) const ENV_KEYS: &[&str] = &[
    "TTS_HOST",
    "TTS_PORT",
    "LOG_LEVEL",
    "TTS_DEFAULT_MODEL",
    "TTS_PRELOAD_MODELS",
    "TTS_REFERENCE_AUDIO_DIR",
    "TTS_MAX_CONCURRENT_GENERATIONS",
    "TTS_CHUNK_SIZE_BYTES",
    "TTS_CHUNK_DELAY_MS",
    "TTS_HEARTBEAT_INTERVAL_SECS",
    "TTS_HEARTBEAT_GRACE_MS",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_env_vars() {
        for key in ENV_KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_env_vars();

        let config = load_from_env().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.default_model, "edge");
        assert!(config.preload_models.is_empty());
        assert_eq!(config.chunk_size_bytes, 800_000);
        assert_eq!(config.chunk_delay_ms, 10);
        assert_eq!(config.heartbeat_interval_secs, 15);
        assert_eq!(config.heartbeat_grace_ms, 1000);
        assert_eq!(config.max_concurrent_generations, 4);
        assert_eq!(config.max_websocket_connections, None);
        assert_eq!(config.max_connections_per_ip, 100);
        assert_eq!(config.cors_allowed_origins, None);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TTS_PORT", "8123");
            env::set_var("TTS_DEFAULT_MODEL", "zonos");
            env::set_var("TTS_PRELOAD_MODELS", " edge, ,sesame ");
            env::set_var("TTS_CHUNK_SIZE_BYTES", "4096");
            env::set_var("MAX_WEBSOCKET_CONNECTIONS", "12");
        }

        let config = load_from_env().unwrap();

        assert_eq!(config.port, 8123);
        assert_eq!(config.default_model, "zonos");
        assert_eq!(config.preload_models, vec!["edge", "sesame"]);
        assert_eq!(config.chunk_size_bytes, 4096);
        assert_eq!(config.max_websocket_connections, Some(12));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_an_error() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TTS_PORT", "ninety");
        }

        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("TTS_PORT"));

        cleanup_env_vars();
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("a,b"), vec!["a", "b"]);
        assert!(parse_list(" , ").is_empty());
    }
}
