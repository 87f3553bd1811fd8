//! rrlb - A round-robin HTTP reverse-proxy load balancer
//!
//! Usage:
//!     rrlb --backend http://127.0.0.1:9001 --backend http://127.0.0.1:9002
//!     rrlb --config <path>
//!
//! See --help for more options.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use rrlb::backend::{Backend, BackendPool};
use rrlb::config::{read_config, validate_config, Config, ServerConfig};
use rrlb::frontend::Dispatcher;
use rrlb::util::init_logging;

/// A round-robin HTTP reverse-proxy load balancer.
#[derive(Parser, Debug)]
#[command(name = "rrlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (default: 0.0.0.0:8000)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Port to listen on, keeping the configured interface
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Backend base URL; repeat for each backend, in rotation order
    #[arg(short, long = "backend", value_name = "URL")]
    backends: Vec<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Cli {
    /// Layer command-line overrides on top of the file configuration.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => read_config(path).with_context(|| {
                format!("failed to load configuration from '{}'", path.display())
            })?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config.frontend.listen = listen;
        }
        if let Some(port) = self.port {
            config.frontend.listen.set_port(port);
        }
        if !self.backends.is_empty() {
            config.backends = self.backends.into_iter().map(ServerConfig::new).collect();
        }
        if let Some(level) = self.log_level {
            config.global.log_level = level;
        }

        validate_config(&config).map_err(|e| anyhow!("invalid configuration: {}", e))?;

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let validate_only = cli.validate;

    let config = cli.into_config()?;

    init_logging(&config.global.log_level, &config.global.log_format)
        .context("failed to initialize logging")?;

    if validate_only {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.frontend.listen);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend.address);
        }
        return Ok(());
    }

    info!(
        listen = %config.frontend.listen,
        backends = config.backends.len(),
        "rrlb starting"
    );

    run(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = Arc::new(
        BackendPool::from_config(&config.backends).context("failed to build backend pool")?,
    );

    for backend in pool.backends() {
        info!(address = backend.address(), "configured backend");
    }

    let listen = config.frontend.listen;
    let dispatcher = Dispatcher::bind(listen, pool)
        .await
        .with_context(|| format!("failed to bind listener on {}", listen))?;

    let handle = tokio::spawn(dispatcher.run(shutdown_tx.subscribe()));

    info!("rrlb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    let _ = shutdown_tx.send(());
    wait_for_accept_loop(handle).await?;

    info!("rrlb shut down complete");
    Ok(())
}

/// Wait for the accept loop task, surfacing a panic or cancellation.
async fn wait_for_accept_loop(handle: JoinHandle<()>) -> Result<()> {
    handle.await.map_err(|e| {
        error!(error = %e, "accept loop terminated abnormally");
        anyhow!("accept loop terminated abnormally: {}", e)
    })
}
