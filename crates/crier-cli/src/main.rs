//! Process entry point: load configuration, wire the components, run the
//! chat session and the webhook server until interrupted.

mod bootstrap;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crier_core::Config;
use crier_gateway::{router, GatewayState};
use crier_irc::{ChatConnector, ChatSession, TlsDialer};
use crier_sinks::{Connector, JenkinsSink, LaunchpadSink};
use crier_tracker::{ObjectLookup, TrackerApi, TrackerClient};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "crier", about = "Relays tracker events to chat and CI")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "crier.toml")]
    config: PathBuf,

    /// Address the webhook server binds to.
    #[arg(long, default_value = "0.0.0.0:5000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    let cli = Cli::parse();

    // Configuration problems are fatal here, before anything serves.
    let config = Arc::new(Config::load(&cli.config)?);

    let tracker = Arc::new(TrackerClient::new(
        config.tracker.host.clone(),
        config.tracker.token.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dialer = Arc::new(TlsDialer::new(config.irc.host.clone(), config.irc.port));
    let (session, chat_handle) = ChatSession::new(
        config.irc.clone(),
        dialer,
        tracker.clone() as Arc<dyn ObjectLookup>,
        config.tracker.web_base(),
        shutdown_rx,
    );
    let session_task = tokio::spawn(session.run());

    let chat: Arc<dyn Connector> = Arc::new(ChatConnector::new(chat_handle));
    let jenkins = config
        .jenkins
        .as_ref()
        .map(|jenkins| Arc::new(JenkinsSink::new(jenkins, config.packages.clone())));
    let launchpad = config
        .launchpad
        .as_ref()
        .map(|launchpad| Arc::new(LaunchpadSink::new(launchpad)) as Arc<dyn Connector>);

    if let Some(sink) = &launchpad {
        sink.connect().await?;
    }

    let state = Arc::new(GatewayState::new(
        config.clone(),
        tracker as Arc<dyn TrackerApi>,
        chat,
        jenkins,
        launchpad,
    )?);

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    tracing::info!(listen = %cli.listen, "webhook server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // Stop the chat session; notifications are not persisted, so there is
    // nothing to drain.
    let _ = shutdown_tx.send(true);
    let _ = session_task.await;
    Ok(())
}
