//! Configuration validation logic.

use std::net::SocketAddr;

use crate::Config;
use crate::defaults::min_header_bytes;
use crate::loader::ConfigError;

const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const LOG_OUTPUTS: [&str; 2] = ["stderr", "stdout"];

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.listen.parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "server.listen is not a socket address: {}",
            config.server.listen
        )));
    }
    config.fallback_target()?;
    config.token()?;
    if config.server.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.connect_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.idle_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.max_header_bytes < min_header_bytes() {
        return Err(ConfigError::Validation(format!(
            "server.max_header_bytes too small (min {})",
            min_header_bytes()
        )));
    }
    if config.server.relay_buffer_size < 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be >= 1024".into(),
        ));
    }
    if config.server.relay_buffer_size > 1024 * 1024 {
        return Err(ConfigError::Validation(
            "server.relay_buffer_size must be <= 1MB".into(),
        ));
    }
    if config.server.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "server.queue_capacity must be > 0".into(),
        ));
    }
    if config.server.tcp.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "server.tcp.connection_backlog must be > 0".into(),
        ));
    }
    if !config.websocket.path.starts_with('/') {
        return Err(ConfigError::Validation(
            "websocket.path must start with '/'".into(),
        ));
    }
    if config.websocket.fallback_param.trim().is_empty() {
        return Err(ConfigError::Validation(
            "websocket.fallback_param is empty".into(),
        ));
    }
    if let Some(format) = config.logging.format.as_deref()
        && !LOG_FORMATS.contains(&format)
    {
        return Err(ConfigError::Validation(format!(
            "logging.format must be one of: {:?}",
            LOG_FORMATS
        )));
    }
    if let Some(output) = config.logging.output.as_deref()
        && !LOG_OUTPUTS.contains(&output)
    {
        return Err(ConfigError::Validation(format!(
            "logging.output must be one of: {:?}",
            LOG_OUTPUTS
        )));
    }
    Ok(())
}
