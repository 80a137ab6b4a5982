//! # Bot Relay - Main Application Entry Point
//!
//! HTTP relay between chat clients and a Typebot-compatible conversational bot.
//! A client posts one message per turn and receives the bot's reply as a server-sent
//! event stream: text bubbles as-is, audio bubbles transcoded to 8kHz mono PCM.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state, metrics, injected collaborators
//! - **session**: Conversation → upstream session registry
//! - **chat**: Upstream bot API client
//! - **audio**: Audio fetch, decode, resample and WAV encoding
//! - **relay**: Per-turn driver and ordered event multiplexer
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **handlers**: HTTP request handlers and the route table
//! - **error**: HTTP error responses

mod audio;       // Audio transcoding pipeline (audio/ directory)
mod chat;        // Upstream bot client (chat/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod relay;       // Turn driver and stream multiplexer (relay/ directory)
mod session;     // Session registry (session/ directory)
mod state;       // Application state management (state.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use audio::AudioPipeline;
use chat::TypebotClient;
use config::AppConfig;
use session::SessionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup:
/// 1. Load `.env`, set up tracing
/// 2. Load and validate configuration
/// 3. Build the upstream client, audio pipeline and session registry
/// 4. Start the session sweep and the HTTP server
/// 5. Stop gracefully on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting bot-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        base_url = %config.upstream.base_url,
        bot_id = %config.upstream.bot_id,
        "Upstream bot configured"
    );

    let chat = Arc::new(TypebotClient::new(&config.upstream.base_url, config.request_timeout())?);
    let transcoder = Arc::new(AudioPipeline::new(&config.audio)?);
    let sessions = Arc::new(SessionRegistry::new(config.session_ttl(), config.sessions.max_sessions));

    spawn_session_sweeper(Arc::clone(&sessions), config.sessions.sweep_interval_secs);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, sessions, chat, transcoder);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure)
            .default_service(web::to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging, filtered by `RUST_LOG` (default `bot_relay=debug,actix_web=info`).
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bot_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Periodically drop sessions idle for longer than the TTL. A zero interval disables the sweep.
fn spawn_session_sweeper(sessions: Arc<SessionRegistry>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let evicted = sessions.evict_expired();
            if evicted > 0 {
                info!(evicted, remaining = sessions.len(), "Evicted expired sessions");
            } else {
                debug!(sessions = sessions.len(), "Session sweep found nothing to evict");
            }
        }
    });
}

/// Listen for SIGTERM/SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
