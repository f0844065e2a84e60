use tracing_subscriber::{fmt::time::UtcTime, prelude::*};

use crate::config::{LogFormat, LogLevel};

/// Initialize structured logging, honoring `LOG_LEVEL` / `RUST_LOG` precedence
/// and rendering either console or JSON output per `LOG_FORMAT`.
pub fn init(level: LogLevel, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));

    match format {
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(std::io::stdout),
            );
            let _ = subscriber.try_init();
        }
        LogFormat::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(std::io::stdout),
            );
            let _ = subscriber.try_init();
        }
    }
}
