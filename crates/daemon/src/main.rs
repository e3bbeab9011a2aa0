//! DeskRelay daemon
//!
//! Loads configuration, wires the transport and tracker clients into the relay,
//! starts the scheduled jobs and serves the transaction ingress.

mod jobs;

use std::sync::Arc;

use anyhow::{Context, Result};
use deskrelay_relay::{ingress, Config, MatrixTransport, Relay, Transport};
use deskrelay_tracker::{RedmineClient, Tracker};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be populated
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        user_id = %config.user_id,
        operator_room = %config.operator_room,
        tracker_enabled = config.tracker_enabled,
        "Starting DeskRelay"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        MatrixTransport::new(
            &config.homeserver_url,
            config.access_token.clone(),
            config.user_id.clone(),
        )
        .context("failed to create Matrix transport")?,
    );

    let tracker: Option<Arc<dyn Tracker>> = if config.tracker_enabled {
        let client = RedmineClient::from_env().context("failed to create tracker client")?;
        Some(Arc::new(client))
    } else {
        None
    };

    let bind_address = config.bind_address.clone();
    let relay = Arc::new(Relay::new(config, transport, tracker));

    if let Err(e) = relay.join_operator_room().await {
        warn!(error = %e, "Could not join operator room, continuing");
    }

    let mut scheduler = jobs::start(Arc::clone(&relay)).await?;

    let app = ingress::router(Arc::clone(&relay)).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(address = %bind_address, "Listening for transactions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down scheduled jobs");
    jobs::stop(&mut scheduler).await;
    Ok(())
}

/// `LOG_FORMAT=json` switches to structured output; `RUST_LOG` controls the filter
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
