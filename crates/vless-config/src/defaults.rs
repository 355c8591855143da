//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `vless_core::defaults`.

use vless_core::defaults;

/// Generate default value functions that forward to vless_core::defaults constants.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_connect_timeout_secs   => DEFAULT_CONNECT_TIMEOUT_SECS: u64,
    default_handshake_timeout_secs => DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64,
    default_idle_timeout_secs      => DEFAULT_IDLE_TIMEOUT_SECS: u64,
    default_max_header_bytes       => DEFAULT_MAX_HEADER_BYTES: usize,
    min_header_bytes               => MIN_HEADER_BYTES: usize,
    default_relay_buffer_size      => DEFAULT_RELAY_BUFFER_SIZE: usize,
    default_queue_capacity         => DEFAULT_QUEUE_CAPACITY: usize,
    default_connection_backlog     => DEFAULT_CONNECTION_BACKLOG: u32,
    default_ws_max_frame_bytes     => DEFAULT_WS_MAX_FRAME_BYTES: usize,
    default_ws_early_data          => DEFAULT_WS_EARLY_DATA: bool,
    // TCP socket options
    default_tcp_no_delay           => DEFAULT_TCP_NO_DELAY: bool,
    default_tcp_keepalive_secs     => DEFAULT_TCP_KEEPALIVE_SECS: u64,
    default_tcp_send_buffer        => DEFAULT_TCP_SEND_BUFFER: usize,
    default_tcp_recv_buffer        => DEFAULT_TCP_RECV_BUFFER: usize,
}

default_string_fns! {
    default_ws_path           => DEFAULT_WS_PATH,
    default_ws_fallback_param => DEFAULT_WS_FALLBACK_PARAM,
}
