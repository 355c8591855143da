//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    pub listen: Option<String>,
    /// Override default fallback relay, e.g. relay.example.com:9443 ("" disables)
    #[arg(long)]
    pub fallback: Option<String>,
    /// Override identity token (UUID)
    #[arg(long)]
    pub uuid: Option<String>,
    /// Override outbound connect timeout (seconds)
    #[arg(long)]
    pub connect_timeout_secs: Option<u64>,
    /// Override handshake timeout (seconds)
    #[arg(long)]
    pub handshake_timeout_secs: Option<u64>,
    /// Override relay idle timeout (seconds)
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,
    /// Override maximum upgrade request head bytes
    #[arg(long)]
    pub max_header_bytes: Option<usize>,
    /// Override maximum concurrent connections (0 = unlimited)
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Buffer size for the socket -> tunnel direction (bytes)
    #[arg(long)]
    pub relay_buffer_size: Option<usize>,
    /// Pending frames per session write queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,
    /// WebSocket path
    #[arg(long)]
    pub ws_path: Option<String>,
    /// WebSocket host (optional)
    #[arg(long)]
    pub ws_host: Option<String>,
    /// WebSocket max frame bytes
    #[arg(long)]
    pub ws_max_frame_bytes: Option<usize>,
    /// Query parameter carrying a per-request fallback override
    #[arg(long)]
    pub ws_fallback_param: Option<String>,
    /// Accept early data in Sec-WebSocket-Protocol
    #[arg(long)]
    pub ws_early_data: Option<bool>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Override log format (pretty/compact/json)
    #[arg(long)]
    pub log_format: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = &overrides.fallback {
        config.server.fallback = if v.trim().is_empty() {
            None
        } else {
            Some(v.clone())
        };
    }
    if let Some(v) = &overrides.uuid {
        config.identity.uuid = v.clone();
    }
    if let Some(v) = overrides.connect_timeout_secs {
        config.server.connect_timeout_secs = v;
    }
    if let Some(v) = overrides.handshake_timeout_secs {
        config.server.handshake_timeout_secs = v;
    }
    if let Some(v) = overrides.idle_timeout_secs {
        config.server.idle_timeout_secs = v;
    }
    if let Some(v) = overrides.max_header_bytes {
        config.server.max_header_bytes = v;
    }
    if let Some(v) = overrides.max_connections {
        config.server.max_connections = if v == 0 { None } else { Some(v) };
    }
    if let Some(v) = overrides.relay_buffer_size {
        config.server.relay_buffer_size = v;
    }
    if let Some(v) = overrides.queue_capacity {
        config.server.queue_capacity = v;
    }
    if let Some(v) = &overrides.ws_path {
        config.websocket.path = v.clone();
    }
    if let Some(v) = &overrides.ws_host {
        config.websocket.host = Some(v.clone());
    }
    if let Some(v) = overrides.ws_max_frame_bytes {
        config.websocket.max_frame_bytes = v;
    }
    if let Some(v) = &overrides.ws_fallback_param {
        config.websocket.fallback_param = v.clone();
    }
    if let Some(v) = overrides.ws_early_data {
        config.websocket.early_data = v;
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(v) = &overrides.log_format {
        config.logging.format = Some(v.clone());
    }
}
