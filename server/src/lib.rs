//! termshare server: Axum HTTP + WebSocket front for the termshare-core
//! session runtime.

pub mod cli;
pub mod proxy;
pub mod router;
pub mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use tracing::info;

use router::AppState;
use termshare_core::config::Config;
use termshare_core::registry::{self, Registry};

/// Build the app, bind the listener, and serve until a shutdown signal
/// arrives. Graceful shutdown: stop accepting new connections, end all
/// sessions (which terminates their children), then exit.
///
/// Signal handling uses `tokio::signal::unix::signal` rather than the
/// `ctrlc`/`signal-hook` OS-thread approach in
/// `Tonksthebear-trybotster/cli` — this service's handler must cooperate
/// with the Tokio reactor rather than run on a separate OS thread.
pub async fn run(config: &'static Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::new();
    let janitor = registry::spawn_janitor(registry.clone(), config.janitor_interval, config.session_ttl);

    let state = AppState {
        registry: registry.clone(),
        config,
        http_client: reqwest::Client::new(),
    };
    let app = router::build_router(state);

    let addr: SocketAddr = parse_listen_addr(&config.addr)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "termshare-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down: ending all sessions");
    registry.end_all();
    janitor.abort();
    // Give writer tasks a moment to drain their close frames.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(port) = addr.strip_prefix(':') {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?)));
    }
    Ok(addr.parse()?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
