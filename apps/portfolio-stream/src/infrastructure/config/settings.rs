//! Service Configuration Settings
//!
//! Configuration types for the portfolio stream service, loaded from
//! environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::portfolio::{DEFAULT_EVENT_WINDOW, UserId};

/// Streaming feed settings.
#[derive(Clone)]
pub struct FeedSettings {
    /// WebSocket URL of the price feed.
    pub url: String,
    /// Optional API token.
    pub token: Option<String>,
    /// Interval between WebSocket pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the transport event channel.
    pub event_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: "wss://ws.finnhub.io".to_string(),
            token: None,
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.2,
            max_reconnect_attempts: 0, // Unlimited
            event_capacity: 1024,
        }
    }
}

impl std::fmt::Debug for FeedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("ping_interval", &self.ping_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("reconnect_delay_initial", &self.reconnect_delay_initial)
            .field("reconnect_delay_max", &self.reconnect_delay_max)
            .field("reconnect_delay_multiplier", &self.reconnect_delay_multiplier)
            .field("reconnect_jitter", &self.reconnect_jitter)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

/// Portfolio/account backend settings.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Base URL of the REST backend.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Dashboard settings.
#[derive(Debug, Clone)]
pub struct DashboardSettings {
    /// User whose portfolio is tracked.
    pub user_id: UserId,
    /// Number of upcoming events shown.
    pub event_window: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            user_id: UserId(1),
            event_window: DEFAULT_EVENT_WINDOW,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health and status HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Streaming feed.
    pub feed: FeedSettings,
    /// REST backend.
    pub backend: BackendSettings,
    /// Dashboard.
    pub dashboard: DashboardSettings,
    /// Status server.
    pub server: ServerSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` or `BACKEND_URL` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_URL` or `BACKEND_URL` is set but empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let feed_defaults = FeedSettings::default();
        let backend_defaults = BackendSettings::default();
        let dashboard_defaults = DashboardSettings::default();

        let feed = FeedSettings {
            url: env.required_url("FEED_URL", feed_defaults.url)?,
            token: env.get("FEED_TOKEN").filter(|t| !t.trim().is_empty()),
            ping_interval: env.duration_secs("FEED_PING_INTERVAL_SECS", feed_defaults.ping_interval),
            idle_timeout: env.duration_secs("FEED_IDLE_TIMEOUT_SECS", feed_defaults.idle_timeout),
            reconnect_delay_initial: env.duration_millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("FEED_RECONNECT_JITTER", feed_defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "FEED_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
            event_capacity: env
                .parse("FEED_EVENT_CAPACITY", feed_defaults.event_capacity)
                .max(1),
        };

        let backend = BackendSettings {
            base_url: env.required_url("BACKEND_URL", backend_defaults.base_url)?,
            timeout: env.duration_secs("BACKEND_TIMEOUT_SECS", backend_defaults.timeout),
        };

        let dashboard = DashboardSettings {
            user_id: UserId(env.parse("DASHBOARD_USER_ID", dashboard_defaults.user_id.0)),
            event_window: env.parse("UPCOMING_EVENTS_LIMIT", dashboard_defaults.event_window),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "PORTFOLIO_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            feed,
            backend,
            dashboard,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required_url(&self, key: &str, default: String) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(value.trim().trim_end_matches('/').to_string()),
            None => Ok(default),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
