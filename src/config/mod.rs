//! Configuration module for the speech gateway
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use speech_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::backend::BackendSettings;
use crate::core::chunking::{ChunkFramer, DEFAULT_CHUNK_SIZE};
use crate::core::dispatch::DEFAULT_MAX_CONCURRENT_GENERATIONS;
use crate::core::keepalive::KeepAliveSupervisor;

pub use yaml::YamlConfig;

/// Server configuration
///
/// Contains everything needed to run the speech gateway:
/// - Server settings (host, port, log level)
/// - Model selection, preloading and generation concurrency
/// - Audio streaming and keep-alive tuning
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    // Models
    /// Model used when a request names none
    pub default_model: String,
    /// Models loaded at startup, before the first request
    pub preload_models: Vec<String>,
    /// Directory holding reference clips for voice cloning
    pub reference_audio_dir: PathBuf,
    pub max_concurrent_generations: usize,

    // Streaming
    /// Largest binary frame sent to clients
    pub chunk_size_bytes: usize,
    pub chunk_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
    /// How long to wait for a heartbeat loop to stop
    pub heartbeat_grace_ms: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::DEFAULT_HOST.to_string(),
            port: env::DEFAULT_PORT,
            log_level: env::DEFAULT_LOG_LEVEL.to_string(),
            default_model: env::DEFAULT_MODEL.to_string(),
            preload_models: Vec::new(),
            reference_audio_dir: PathBuf::from(env::DEFAULT_REFERENCE_AUDIO_DIR),
            max_concurrent_generations: DEFAULT_MAX_CONCURRENT_GENERATIONS,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: env::DEFAULT_CHUNK_DELAY_MS,
            heartbeat_interval_secs: env::DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_grace_ms: env::DEFAULT_HEARTBEAT_GRACE_MS,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: env::DEFAULT_RATE_LIMIT_RPS,
            rate_limit_burst_size: env::DEFAULT_RATE_LIMIT_BURST,
            max_websocket_connections: None,
            max_connections_per_ip: env::DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in `main` before this is called, so its values
    /// appear as environment variables here.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_server_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_server_config(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn keepalive(&self) -> KeepAliveSupervisor {
        KeepAliveSupervisor::new(
            self.heartbeat_interval(),
            Duration::from_millis(self.heartbeat_grace_ms),
        )
    }

    pub fn framer(&self) -> ChunkFramer {
        ChunkFramer::new(
            self.chunk_size_bytes,
            Duration::from_millis(self.chunk_delay_ms),
        )
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            reference_audio_dir: self.reference_audio_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        for key in env::ENV_KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_address() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9100,
            ..Default::default()
        };
        assert_eq!(config.address(), "127.0.0.1:9100");
    }

    #[test]
    fn test_derived_components() {
        let config = ServerConfig {
            chunk_size_bytes: 1024,
            heartbeat_interval_secs: 3,
            reference_audio_dir: PathBuf::from("/srv/clips"),
            ..Default::default()
        };

        assert_eq!(config.framer().ceiling(), 1024);
        assert_eq!(config.keepalive().interval(), Duration::from_secs(3));
        assert_eq!(
            config.backend_settings().reference_audio_dir,
            PathBuf::from("/srv/clips")
        );
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.address(), "0.0.0.0:9000");
        assert_eq!(config.default_model, "edge");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_default_model() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("TTS_DEFAULT_MODEL", "tacotron");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("tacotron"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

models:
  default: "zonos"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            std::env::set_var("TTS_HOST", "10.0.0.1");
            std::env::set_var("TTS_DEFAULT_MODEL", "sesame");
            std::env::set_var("TTS_CHUNK_SIZE_BYTES", "2048");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.default_model, "zonos");
        // YAML value
        assert_eq!(config.port, 8080);
        // ENV value survives where YAML is silent
        assert_eq!(config.chunk_size_bytes, 2048);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_values() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
streaming:
  chunk_size_bytes: 0
"#,
        )
        .unwrap();

        let result = ServerConfig::from_file(&config_path);
        assert!(result.unwrap_err().to_string().contains("chunk_size_bytes"));
    }

    #[test]
    #[serial]
    fn test_from_file_preload_list() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
models:
  preload: ["edge-tts", "csm"]
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&config_path).unwrap();
        assert_eq!(config.preload_models, vec!["edge-tts", "csm"]);
    }
}
