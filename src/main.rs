#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use watchsync_server::auth::{AllowAll, GuestTokenIssuer, JwtValidator};
use watchsync_server::config;
use watchsync_server::gateway::{self, AppState};
use watchsync_server::hub::HubRegistry;
use watchsync_server::janitor;
use watchsync_server::logging;
use watchsync_server::store::{CoordinationStore, RedisStore};

/// watchsync-server -- real-time synchronization server for distributed watch-party playback
#[derive(Parser, Debug)]
#[command(name = "watchsync-server")]
#[command(about = "Real-time synchronization server for distributed watch-party playback")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Arc::new(config::load());

    if cli.print_config {
        println!("port = {}", cfg.port);
        println!("redis = {}", cfg.redis.connection_url());
        println!("jwt_secret configured = {}", cfg.jwt_secret.is_some());
        println!("cors_allowed_origins = {:?}", cfg.cors_allowed_origins);
        return Ok(());
    }

    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Redis: {}:{}", cfg.redis.host, cfg.redis.port);
                println!("  JWT auth configured: {}", cfg.jwt_secret.is_some());
                println!("  Janitor interval: {:?}", cfg.janitor_interval);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }
    validation_result?;

    logging::init(cfg.logging.level, cfg.logging.format);

    let port = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "starting watchsync-server");

    let store: Arc<dyn CoordinationStore> = Arc::new(RedisStore::connect(&cfg.redis).await?);
    let shutdown = CancellationToken::new();
    let hubs = Arc::new(HubRegistry::new(store.clone(), cfg.clone(), shutdown.child_token()));

    let guest_secret = cfg
        .guest_token_secret
        .clone()
        .unwrap_or_else(|| "local-development-guest-secret".to_string());

    let state = AppState {
        store: store.clone(),
        hubs,
        config: cfg.clone(),
        jwt: Arc::new(JwtValidator::new(cfg.jwt_secret.clone().unwrap_or_default())),
        guest_tokens: Arc::new(GuestTokenIssuer::new(guest_secret)),
        membership: Arc::new(AllowAll),
        shutdown: shutdown.clone(),
    };

    let janitor_handle = tokio::spawn(janitor::run(store.clone(), cfg.clone(), shutdown.child_token()));

    let router = gateway::router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown.clone()));
    server.await?;

    // §5 — up to 10s to let in-flight sessions drain after shutdown begins.
    shutdown.cancel();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), janitor_handle).await;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
