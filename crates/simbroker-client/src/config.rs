//! Client connection settings.

use std::time::Duration;

/// Configuration for broker and session connections.
///
/// The retry settings cover the window where a freshly spawned session host
/// has not bound its port yet.
///
/// # Example
///
/// ```rust
/// use simbroker_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     retry_initial_delay: Duration::from_millis(50),
///     max_attempts: 5,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Initial delay before the first retry after a refused connection.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// Connection attempts before giving up.
    pub max_attempts: u32,

    /// Per-request reply deadline. `None` waits forever.
    pub request_timeout: Option<Duration>,

    /// Identifier sent in the handshake.
    pub client_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            retry_multiplier: 2.0,
            max_attempts: 20,
            request_timeout: None,
            client_id: None,
        }
    }
}

impl ClientConfig {
    /// Delay to wait after `current`, capped at `retry_max_delay`.
    pub(crate) fn next_delay(&self, current: Duration) -> Duration {
        let next = current.mul_f64(self.retry_multiplier.max(1.0));
        next.min(self.retry_max_delay)
    }
}
