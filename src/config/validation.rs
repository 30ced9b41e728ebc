use crate::core::backend::BackendKind;

use super::ServerConfig;

/// Reject configurations the server cannot run with.
pub(crate) fn validate_server_config(
    config: &ServerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.port == 0 {
        return Err("port must be non-zero".into());
    }
    validate_streaming(config)?;
    validate_models(&config.default_model, &config.preload_models)?;

    if config.max_concurrent_generations == 0 {
        return Err("max_concurrent_generations must be at least 1".into());
    }
    if config.rate_limit_requests_per_second == 0 || config.rate_limit_burst_size == 0 {
        return Err("rate limit and burst size must be greater than zero".into());
    }
    if config.max_websocket_connections == Some(0) {
        return Err("max_websocket_connections must be greater than zero when set".into());
    }
    Ok(())
}

fn validate_streaming(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.chunk_size_bytes == 0 {
        return Err("chunk_size_bytes must be greater than zero".into());
    }
    if config.heartbeat_interval_secs == 0 {
        return Err("heartbeat_interval_secs must be greater than zero".into());
    }
    Ok(())
}

/// Every configured model id must name a known backend.
pub(crate) fn validate_models(
    default_model: &str,
    preload: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    BackendKind::parse(default_model).map_err(|e| format!("Invalid default model: {e}"))?;
    for model in preload {
        BackendKind::parse(model).map_err(|e| format!("Invalid preload model: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_server_config(&config()).is_ok());
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut c = config();
        c.port = 0;
        assert!(validate_server_config(&c).is_err());

        let mut c = config();
        c.chunk_size_bytes = 0;
        assert!(validate_server_config(&c).is_err());

        let mut c = config();
        c.heartbeat_interval_secs = 0;
        assert!(validate_server_config(&c).is_err());

        let mut c = config();
        c.max_concurrent_generations = 0;
        assert!(validate_server_config(&c).is_err());

        let mut c = config();
        c.rate_limit_burst_size = 0;
        assert!(validate_server_config(&c).is_err());
    }

    #[test]
    fn test_models_must_resolve() {
        assert!(validate_models("EDGE-TTS", &["csm".to_string()]).is_ok());

        let err = validate_models("tacotron", &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid default model"));

        let err = validate_models("edge", &["wavenet".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Invalid preload model"));
    }
}
