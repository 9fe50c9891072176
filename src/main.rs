//! derp-admit: admission controller for relay nodes.
//!
//! Admits a connecting client when its node key is known to one of the
//! network agents running on this host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use derp_admission::{AdmissionConfig, AdmissionError, AdmissionServer, Verifier};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "derp-admit")]
#[command(version = VERSION)]
#[command(about = "Admit relay clients known to local network agents")]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP server listen address.
    #[arg(short = 'a', long = "addr")]
    addr: Option<String>,

    /// Time before a peer is checked from the sockets again.
    #[arg(short = 'e', long = "expire", value_parser = humantime::parse_duration)]
    expire: Option<Duration>,

    /// Directory containing agent control sockets.
    #[arg(short = 's', long = "sockets")]
    sockets: Option<PathBuf>,

    /// Turns on extra logging for debugging purposes.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> Result<AdmissionConfig> {
        let mut config = match &self.config {
            Some(path) => AdmissionConfig::from_file(path)?,
            None => AdmissionConfig::default(),
        };
        if let Some(addr) = self.addr {
            config.listen_addr = addr;
        }
        if let Some(expire) = self.expire {
            config.expire_time = expire;
        }
        if let Some(sockets) = self.sockets {
            config.sockets_dir = sockets;
        }
        config.debug |= self.debug;
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait up to `grace` for the server task to finish. Returns `false` if it
/// had to be aborted.
async fn drain_server(
    server_task: &mut JoinHandle<Result<(), AdmissionError>>,
    grace: Duration,
) -> bool {
    match tokio::time::timeout(grace, &mut *server_task).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "error shutting down");
            true
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "HTTP server task failed");
            true
        }
        Err(_) => {
            tracing::error!("in-flight requests did not finish in time, abandoning them");
            server_task.abort();
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;
    init_tracing(config.debug);

    tracing::info!(
        version = VERSION,
        sockets = %config.sockets_dir.display(),
        expire = ?config.expire_time,
        "starting derp-admit"
    );

    let verifier = Arc::new(Verifier::from_config(&config));
    verifier.start().await?;

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let server = AdmissionServer::new(verifier.clone());
    let mut server_task = tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    let signalled = tokio::select! {
        _ = shutdown_signal() => true,
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "error running HTTP server"),
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
            false
        }
    };

    if signalled {
        tracing::info!(grace = ?config.shutdown_grace, "shutdown requested, draining");
        let _ = shutdown_tx.send(());
        drain_server(&mut server_task, config.shutdown_grace).await;
    }

    verifier.shutdown().await?;
    tracing::info!("stopped");
    Ok(())
}
