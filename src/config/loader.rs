//! Environment-variable configuration loading.

use super::logging::{LogFormat, LogLevel};
use super::types::{Config, RedisConfig};
use super::validation::validate_config_security;

/// Load configuration from the process environment.
///
/// Recognized variables: `PORT`, `JWT_SECRET`, `GUEST_TOKEN_SECRET`, `REDIS_HOST`, `REDIS_PORT`,
/// `REDIS_PASSWORD`, `REDIS_DB`, `LOG_LEVEL`, `LOG_FORMAT`,
/// `CORS_ALLOWED_ORIGINS` (comma-separated). Unset or unparsable values fall
/// back to [`Config::default`]'s field, with a warning printed to stderr for
/// values that were present but malformed.
///
/// **Note:** always returns a `Config`, never fails outright. Callers who
/// need hard failure on a bad configuration should call
/// [`validate_config_security`] themselves.
#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();

    let port = env_parsed("PORT", defaults.port);
    let jwt_secret = std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty());
    let guest_token_secret = std::env::var("GUEST_TOKEN_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| jwt_secret.clone());

    let redis = RedisConfig {
        host: std::env::var("REDIS_HOST").unwrap_or(defaults.redis.host),
        port: env_parsed("REDIS_PORT", defaults.redis.port),
        password: std::env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
        db: env_parsed("REDIS_DB", defaults.redis.db),
    };

    let level = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|raw| {
            LogLevel::parse(&raw).or_else(|| {
                eprintln!("Invalid LOG_LEVEL '{raw}', using default");
                None
            })
        })
        .unwrap_or(defaults.logging.level);

    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| {
            LogFormat::parse(&raw).or_else(|| {
                eprintln!("Invalid LOG_FORMAT '{raw}', using default");
                None
            })
        })
        .unwrap_or(defaults.logging.format);

    let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let config = Config {
        port,
        jwt_secret,
        guest_token_secret,
        redis,
        logging: super::logging::LoggingConfig { level, format },
        cors_allowed_origins,
        ..defaults
    };

    if let Err(e) = validate_config_security(&config) {
        eprintln!("Configuration validation error: {e}");
    }

    config
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                eprintln!("Invalid {key} value '{raw}', using default");
                None
            }
        })
        .unwrap_or(default)
}
