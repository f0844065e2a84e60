//! Root configuration types.

use super::logging::LoggingConfig;
use std::time::Duration;

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl RedisConfig {
    /// Build the `redis://` connection URL, including credentials and DB index.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!(
                    "redis://:{password}@{}:{}/{}",
                    self.host, self.port, self.db
                )
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

/// Root configuration for the watch-party sync server.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: Option<String>,
    /// §4.1 — HMAC key for minting/verifying `guestToken`. Falls back to
    /// `jwt_secret` when unset so a deployment only has to manage one secret.
    pub guest_token_secret: Option<String>,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub cors_allowed_origins: Vec<String>,

    /// §4.2 — depth of a session's bounded outbound queue.
    pub outbound_queue_depth: usize,
    /// §4.2 — heartbeat send interval.
    pub heartbeat_interval: Duration,
    /// §4.2 — heartbeat timeout before the session is considered dead.
    pub heartbeat_timeout: Duration,
    /// §4.3/§4.4 — TTL on the per-room lock used to serialize conflicting actions.
    pub room_lock_ttl: Duration,
    /// §4.6 — interval between Janitor sweeps.
    pub janitor_interval: Duration,
    /// §4.6 — a room with no participants for longer than this is swept.
    pub room_inactive_timeout: Duration,
    /// §4.6 — a participant not heard from in this long is considered stale.
    pub participant_stale_timeout: Duration,
    /// Open Question — disabled by default; an explicit opt-in toggle.
    pub synthetic_pause_on_buffering: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            jwt_secret: None,
            guest_token_secret: None,
            redis: RedisConfig::default(),
            logging: LoggingConfig::default(),
            cors_allowed_origins: Vec::new(),
            outbound_queue_depth: 64,
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(45),
            room_lock_ttl: Duration::from_secs(5),
            janitor_interval: Duration::from_secs(60),
            room_inactive_timeout: Duration::from_secs(2 * 60 * 60),
            participant_stale_timeout: Duration::from_secs(90),
            synthetic_pause_on_buffering: false,
        }
    }
}
