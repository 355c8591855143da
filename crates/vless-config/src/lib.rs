//! Configuration loading, validation and CLI overrides.
//!
//! Supports TOML, YAML and JSON (with comments) files. The server consumes
//! the result as explicit values: the identity [`Token`] and the default
//! [`FallbackTarget`] are resolved here once and passed down, never read
//! from globals.

mod cli;
mod defaults;
mod loader;
mod types;
mod validate;

use serde::{Deserialize, Serialize};
use vless_proto::Token;

pub use cli::{CliOverrides, apply_overrides};
pub use loader::{ConfigError, ConfigFormat, load_config, parse_config};
pub use types::*;
pub use validate::validate_config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse the configured identity token.
    pub fn token(&self) -> Result<Token, ConfigError> {
        self.identity
            .uuid
            .parse()
            .map_err(|e: vless_proto::InvalidToken| {
                ConfigError::Validation(format!("identity.uuid: {e}"))
            })
    }

    /// Parse the default fallback target, if one is configured.
    pub fn fallback_target(&self) -> Result<Option<FallbackTarget>, ConfigError> {
        self.server
            .fallback
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    fn write_temp(name: &str, body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::Builder::new()
            .prefix("vless-config-")
            .tempdir()
            .unwrap();
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        (dir, path)
    }

    fn minimal() -> Config {
        Config {
            server: ServerConfig {
                listen: "127.0.0.1:8080".into(),
                fallback: None,
                connect_timeout_secs: 10,
                handshake_timeout_secs: 30,
                idle_timeout_secs: 600,
                max_header_bytes: 8192,
                max_connections: None,
                relay_buffer_size: 32768,
                queue_capacity: 64,
                tcp: TcpConfig::default(),
            },
            identity: IdentityConfig { uuid: UUID.into() },
            websocket: WebSocketConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn load_toml_with_defaults() {
        let (_dir, path) = write_temp(
            "config.toml",
            r#"
[server]
listen = "0.0.0.0:8080"
fallback = "relay.example.com:9443"

[identity]
uuid = "d342d11e-d424-4583-b36e-524ab1f0afa4"
"#,
        );
        let config = load_config(&path).unwrap();
        validate_config(&config).unwrap();

        assert_eq!(config.server.connect_timeout_secs, 10);
        assert_eq!(config.server.idle_timeout_secs, 600);
        assert_eq!(config.server.queue_capacity, 64);
        assert_eq!(config.websocket.path, "/");
        assert_eq!(config.websocket.fallback_param, "proxyip");
        assert!(config.websocket.early_data);
        assert!(config.server.tcp.no_delay);
        assert_eq!(
            config.fallback_target().unwrap(),
            Some(FallbackTarget {
                host: "relay.example.com".into(),
                port: 9443
            })
        );
        assert_eq!(config.token().unwrap().to_string(), UUID);
    }

    #[test]
    fn load_yaml_and_jsonc() {
        let (_dir, path) = write_temp(
            "config.yaml",
            "server:\n  listen: 127.0.0.1:9000\nidentity:\n  uuid: d342d11e-d424-4583-b36e-524ab1f0afa4\nwebsocket:\n  path: /tunnel\n",
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.websocket.path, "/tunnel");
        assert_eq!(config.fallback_target().unwrap(), None);

        let (_dir, path) = write_temp(
            "config.jsonc",
            r#"{
  // comments are allowed
  "server": { "listen": "127.0.0.1:9000", "max_connections": 16 },
  "identity": { "uuid": "d342d11e-d424-4583-b36e-524ab1f0afa4" }
}"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.max_connections, Some(16));
    }

    #[test]
    fn unsupported_extension() {
        let (_dir, path) = write_temp("config.ini", "listen=1");
        match load_config(&path) {
            Err(ConfigError::UnsupportedFormat(ext)) => assert_eq!(ext, "ini"),
            other => panic!("expected unsupported format, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config("/nonexistent/vless.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/vless.toml"));
    }

    #[test]
    fn parse_config_from_memory() {
        let config = parse_config(
            "[server]\nlisten = \"127.0.0.1:8080\"\n[identity]\nuuid = \"d342d11e-d424-4583-b36e-524ab1f0afa4\"\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(
            ConfigFormat::from_path(Path::new("tunnel.YML")).unwrap(),
            ConfigFormat::Yaml
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = minimal();
        config.identity.uuid = "nope".into();
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.server.fallback = Some("relay.example.com:notaport".into());
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.server.connect_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.server.idle_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.server.queue_capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.websocket.path = "tunnel".into();
        assert!(validate_config(&config).is_err());

        let mut config = minimal();
        config.logging.format = Some("xml".into());
        assert!(validate_config(&config).is_err());

        validate_config(&minimal()).unwrap();
    }

    #[test]
    fn fallback_target_forms() {
        let parse = |s: &str| s.parse::<FallbackTarget>().unwrap();

        assert_eq!(parse("relay.example.com:9443").to_string(), "relay.example.com:9443");
        assert_eq!(parse("relay.example.com").port, 443);
        assert_eq!(parse("10.0.0.1:8443").host, "10.0.0.1");

        let v6 = parse("[2001:db8::1]:8443");
        assert_eq!(v6.host, "2001:db8::1");
        assert_eq!(v6.port, 8443);
        assert_eq!(v6.to_string(), "[2001:db8::1]:8443");
        assert_eq!(parse("[2001:db8::1]").port, 443);
        assert_eq!(parse("2001:db8::1").port, 443);

        assert!("".parse::<FallbackTarget>().is_err());
        assert!(":443".parse::<FallbackTarget>().is_err());
        assert!("host:70000".parse::<FallbackTarget>().is_err());
        assert!("[::1".parse::<FallbackTarget>().is_err());
    }

    #[test]
    fn overrides_apply() {
        let mut config = minimal();
        config.server.fallback = Some("relay.example.com".into());
        let overrides = CliOverrides {
            listen: Some("0.0.0.0:9999".into()),
            fallback: Some(String::new()),
            max_connections: Some(0),
            idle_timeout_secs: Some(90),
            ws_path: Some("/ws".into()),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        apply_overrides(&mut config, &overrides);

        assert_eq!(config.server.listen, "0.0.0.0:9999");
        assert_eq!(config.server.fallback, None);
        assert_eq!(config.server.max_connections, None);
        assert_eq!(config.server.idle_timeout_secs, 90);
        assert_eq!(config.websocket.path, "/ws");
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }
}
