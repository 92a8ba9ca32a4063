//! Paysys Gateway
//!
//! Accepts connections from the Bishop relay and from standalone clients,
//! recovers each client's XOR key and answers login requests before the
//! relay gives up waiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use paysys_gateway::api;
use paysys_gateway::auth::mysql::MySqlAccountStore;
use paysys_gateway::config::GatewayConfig;
use paysys_gateway::net::handler::ConnectionHandler;
use paysys_gateway::state::AppState;
use paysys_gateway::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Configuration decides the log format, so it is loaded first
    let config = GatewayConfig::load().await?;
    init_logging(&config.log_format);

    info!("Paysys Gateway v{}", VERSION);
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );
    if config.dev_mode {
        warn!("Development mode is enabled, unknown accounts are accepted");
    }

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = if config.database.enabled {
        match MySqlAccountStore::connect(&config.database).await {
            Ok(store) => {
                info!("Using MySQL account store");
                Arc::new(AppState::with_store(
                    config.clone(),
                    Arc::new(store),
                    shutdown_tx.clone(),
                )?)
            }
            Err(e) => {
                error!("Failed to connect to account database: {}", e);
                return Err(e.into());
            }
        }
    } else {
        warn!("Database disabled, using in-memory account store");
        Arc::new(AppState::new(config.clone(), shutdown_tx.clone())?)
    };

    // Start TCP listener for relay and client connections
    let gateway_addr: SocketAddr = config.listen_address().parse()?;
    let gateway_listener = TcpListener::bind(gateway_addr).await?;
    info!("Gateway listening on: {}", gateway_addr);

    let accept_state = state.clone();
    let mut accept_shutdown_rx = shutdown_tx.subscribe();
    let accept_handle = tokio::spawn(async move {
        accept_connections(gateway_listener, accept_state, &mut accept_shutdown_rx).await;
    });

    // Start HTTP API server if enabled
    let api_handle = if config.api.enabled {
        let api_addr: SocketAddr = config.api_address().parse()?;
        let api_listener = TcpListener::bind(api_addr).await?;
        info!("Admin API listening on: {}", api_addr);

        let api_state = state.clone();
        let api_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            run_api_server(api_listener, api_state, api_shutdown_rx).await;
        }))
    } else {
        None
    };

    info!("Gateway startup complete");

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down gateway...");

    let _ = accept_handle.await;
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    // Let running slow searches deliver their final responses
    let grace = state.slow_deadline() + Duration::from_secs(1);
    if state.shutdown(grace).await {
        info!("Slow resolver pool drained");
    } else {
        warn!(
            in_flight = state.pool.in_flight(),
            "Slow resolver pool did not drain within {:?}", grace
        );
    }

    info!(
        sessions = state.session_manager.count(),
        learned_keys = state.key_cache.len(),
        "Gateway shutdown complete"
    );
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,paysys_gateway=debug"));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Accept incoming gateway connections
async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_tcp(stream, addr).await {
                                warn!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Run the HTTP API server
async fn run_api_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let router = api::create_router(state);

    let shutdown_signal = async move {
        let _ = shutdown_rx.recv().await;
        info!("Admin API shutting down");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap_or_else(|e| error!("API server error: {}", e));
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
