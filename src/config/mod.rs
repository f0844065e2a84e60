//! Configuration module for the watch-party sync server.
//!
//! Configuration is sourced entirely from environment variables:
//! `PORT`, `JWT_SECRET`, `GUEST_TOKEN_SECRET`, `REDIS_HOST`, `REDIS_PORT`,
//! `REDIS_PASSWORD`, `REDIS_DB`, `LOG_LEVEL`, `LOG_FORMAT`, `CORS_ALLOWED_ORIGINS`.
//!
//! # Module Structure
//!
//! - [`types`]: Root `Config` struct plus `RedisConfig`
//! - [`logging`]: Log level and log format enums
//! - [`loader`]: Environment-variable loading
//! - [`validation`]: Startup validation of security-sensitive fields

pub mod loader;
pub mod logging;
pub mod types;
pub mod validation;

pub use loader::load;
pub use logging::{LogFormat, LogLevel};
pub use types::{Config, RedisConfig};
pub use validation::validate_config_security;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 8080);
        assert_eq!(config.redis.host, "127.0.0.1");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.db, 0);
        assert!(config.cors_allowed_origins.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Console);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Info.as_str(), "info");
    }
}
