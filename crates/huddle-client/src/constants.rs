//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default backend endpoint for local development.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3000";

/// Delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Reconnection attempts before the session gives up and goes idle.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound for a single WebSocket handshake. Prevents a connect attempt
/// from hanging on SYN blackholes or stalled servers.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable overriding the configured endpoint.
pub const ENDPOINT_ENV_VAR: &str = "HUDDLE_ENDPOINT";

/// Environment variable the default credential store reads the bearer token from.
pub const TOKEN_ENV_VAR: &str = "HUDDLE_TOKEN";

/// Config file name under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Characters of the user id used for the fallback display name.
pub const SENDER_NAME_PREFIX_LEN: usize = 8;

/// Sender name used when neither a display name nor a user id is known.
pub const UNKNOWN_SENDER_NAME: &str = "Unknown User";

/// Buffered session events per subscriber before lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
