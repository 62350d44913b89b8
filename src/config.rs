use std::time::Duration;

/// Tunables for the synchronization engine.
///
/// The defaults mirror the behavior of the reference deployment: a fixed
/// 5 second reconnect back-off, a 1 second settle interval when a new
/// activity replaces the current one (500 ms for a content item within the
/// same activity), and the 3 s / 5 s hybrid polling cadence of the team
/// challenge reconciliation loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST collaborator, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// URL of the multiplexed pub/sub endpoint.
    pub websocket_url: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before the session is declared lost.
    pub max_reconnect_attempts: u32,
    /// Visual-settle interval when a new activity becomes current.
    pub activity_settle: Duration,
    /// Visual-settle interval when a new content item becomes current.
    pub content_settle: Duration,
    /// How long to wait for the authoritative push after a locally
    /// requested advance before re-fetching the full snapshot.
    pub advance_timeout: Duration,
    /// Fallback challenge-status poll interval (team mode).
    pub status_poll_interval: Duration,
    /// Team-discovery poll interval while no team is known (team mode).
    pub team_poll_interval: Duration,
    /// Attempts at idempotent team auto-creation.
    pub team_create_retries: u32,
    /// Delay between team auto-creation attempts.
    pub team_create_retry_delay: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>, websocket_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            websocket_url: websocket_url.into(),
            ..Self::default()
        }
    }

    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("QUIZWEB_BASE_URL").unwrap_or(defaults.base_url),
            websocket_url: std::env::var("QUIZWEB_WEBSOCKET_URL")
                .unwrap_or(defaults.websocket_url),
            ..defaults
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            websocket_url: "ws://localhost:8080/ws-sessions".to_string(),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            activity_settle: Duration::from_secs(1),
            content_settle: Duration::from_millis(500),
            advance_timeout: Duration::from_secs(10),
            status_poll_interval: Duration::from_secs(5),
            team_poll_interval: Duration::from_secs(3),
            team_create_retries: 3,
            team_create_retry_delay: Duration::from_secs(1),
        }
    }
}
