//! Broker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_SESSIONS};

/// Default delay before re-binding the listener or reconnecting an endpoint.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Configuration shared by a broker and the endpoints it creates.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Directory (Unix) or pipe prefix (Windows) that socket paths are derived from.
    pub socket_dir: PathBuf,
    /// Delay between retries of a failed bind or a lost connection.
    pub retry_delay: Duration,
    /// Session slots per endpoint; ids cycle through `1..=max_sessions`.
    pub max_sessions: u32,
    /// Cap on buffered, not yet framed bytes per socket.
    pub max_buffer_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}
