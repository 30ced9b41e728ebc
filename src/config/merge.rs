use std::path::PathBuf;

use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Environment configuration with YAML values layered on top.
///
/// Any field present in the YAML replaces the environment value; absent
/// fields keep it.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(log_level) = server.log_level {
            config.log_level = log_level;
        }
    }

    if let Some(models) = yaml.models {
        if let Some(default) = models.default {
            config.default_model = default;
        }
        if let Some(preload) = models.preload {
            config.preload_models = preload;
        }
        if let Some(dir) = models.reference_audio_dir {
            config.reference_audio_dir = PathBuf::from(dir);
        }
        if let Some(max) = models.max_concurrent_generations {
            config.max_concurrent_generations = max;
        }
    }

    if let Some(streaming) = yaml.streaming {
        if let Some(size) = streaming.chunk_size_bytes {
            config.chunk_size_bytes = size;
        }
        if let Some(delay) = streaming.chunk_delay_ms {
            config.chunk_delay_ms = delay;
        }
        if let Some(interval) = streaming.heartbeat_interval_secs {
            config.heartbeat_interval_secs = interval;
        }
        if let Some(grace) = streaming.heartbeat_grace_ms {
            config.heartbeat_grace_ms = grace;
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::ENV_KEYS;
    use crate::config::yaml::{ModelsYaml, SecurityYaml};
    use serial_test::serial;

    fn cleanup_env_vars() {
        for key in ENV_KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_merge_without_yaml_is_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("TTS_DEFAULT_MODEL", "sesame");
        }

        let config = merge_config(None).unwrap();
        assert_eq!(config.default_model, "sesame");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_only_present_fields() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("TTS_DEFAULT_MODEL", "sesame");
            std::env::set_var("MAX_CONNECTIONS_PER_IP", "7");
        }

        let yaml = YamlConfig {
            models: Some(ModelsYaml {
                preload: Some(vec!["zonos".to_string()]),
                ..Default::default()
            }),
            security: Some(SecurityYaml {
                max_websocket_connections: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = merge_config(Some(yaml)).unwrap();

        assert_eq!(config.default_model, "sesame");
        assert_eq!(config.preload_models, vec!["zonos"]);
        assert_eq!(config.max_websocket_connections, Some(3));
        assert_eq!(config.max_connections_per_ip, 7);

        cleanup_env_vars();
    }
}
