//! # Transcribe Backend - Main Application Entry Point
//!
//! An Actix-web HTTP server that wraps a Whisper speech-to-text model behind
//! a single upload endpoint, `POST /transcribe`.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared application state, metrics and the loaded model
//! - **audio**: Upload reading, scoped temporary files, audio decoding
//! - **transcription**: The `Transcriber` capability and its Whisper implementation
//! - **device**: Compute device selection for the model
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request logging, metrics and CORS
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: Custom error types and HTTP error responses

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod transcription;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use crate::config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperTranscriber;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Loads the model** once; a model that fails to load stops startup
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // .ok() means "ignore errors" - it's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    info!("Starting transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let transcriber = WhisperTranscriber::load(&config.model, &config.transcription.language)
        .await
        .context("loading transcription model")?;

    let app_state = web::Data::new(AppState::new(config.clone(), Arc::new(transcriber)));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cors_config = config.cors.clone();

    if cors_config.allowed_origins.is_empty() {
        info!("CORS: no cross-origin access allowed");
    } else {
        info!(origins = ?cors_config.allowed_origins, "CORS origins configured");
    }

    info!("Starting HTTP server on {}", bind_addr);

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            // Middleware executes in reverse order of registration for requests
            .wrap(middleware::build_cors(&cors_config))
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(handlers::configure_routes)
    })
    // Signals are handled below so shutdown is logged and ordered
    .disable_signals();

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    let server = server
        .bind(&bind_addr)
        .with_context(|| format!("binding {}", bind_addr))?
        .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // tokio::select! is like a "race" - whichever finishes first wins
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received, stopping server...");
            // In-flight transcriptions are allowed to finish
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "info", "transcribe_backend=trace")
/// - If not set, defaults to "transcribe_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("initialising tracing subscriber")?;

    Ok(())
}

/// Resolves once SIGTERM or SIGINT (Ctrl+C) arrives.
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}
