//! Proxy browser server.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    PROXY BROWSER                     │
//!                    │                                                      │
//!   Client ──────────┼─▶ listener ─▶ request id ─▶ routing::Router          │
//!                    │                                  │                   │
//!                    │        ┌─────────────────────────┼──────────────┐    │
//!                    │        ▼                         ▼              ▼    │
//!                    │   bare relay               wisp transport   application
//!                    │  (HTTP + WS relay)        (TCP/UDP streams)  (API, static)
//!                    │        │                         │                   │
//!                    └────────┼─────────────────────────┼───────────────────┘
//!                             ▼                         ▼
//!                        remote sites              remote hosts
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_browser::config::resolve_config;
use proxy_browser::http::HttpServer;
use proxy_browser::lifecycle::{wait_for_signal, Shutdown};
use proxy_browser::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "proxy-browser", version, about = "Web proxy browser server")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(args.config.as_deref())?;

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proxy-browser starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        bare_prefix = %config.routing.bare_prefix,
        wisp_suffix = %config.routing.wisp_suffix,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new(std::time::Duration::from_secs(config.timeouts.shutdown_grace_secs));
    let server = HttpServer::new(config)?;
    let mut serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut serving => {
            result??;
        }
        _ = wait_for_signal() => {
            shutdown.trigger();
            match shutdown.drain(&mut serving).await {
                Some(result) => result??,
                None => serving.abort(),
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
