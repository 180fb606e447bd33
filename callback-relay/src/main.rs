use anyhow::Context;
use callback_relay::{load_settings, router, AppState, Dispatcher, SmtpDispatcher};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = load_settings()
        .await
        .context("Could not load delivery configuration")?;

    let state = match &settings.relay {
        Some(relay) => {
            let dispatcher =
                SmtpDispatcher::new(relay).context("Could not configure mail relay client")?;
            // Readiness is advisory: a failed probe does not stop startup.
            match dispatcher.probe().await {
                Ok(()) => info!("Mail relay ready"),
                Err(error) => warn!("Mail relay not ready: {error}"),
            }
            AppState::new(Arc::new(dispatcher) as Arc<dyn Dispatcher>)
        }
        None => {
            warn!("SMTP_HOST is not set; callback requests will fail until it is configured");
            AppState::without_dispatcher()
        }
    };

    let app = router(state, &settings.http);
    let address = SocketAddr::from(([0, 0, 0, 0], settings.http.port));
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Could not bind to {address}"))?;
    info!("Server running on port {}", settings.http.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
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
    info!("Shutting down");
}
