//! Unified kubetun CLI.
//!
//! `kubetun serve` runs the data-plane endpoints declared with `-L`,
//! optionally tunneling through the `-F` upstream node.

use std::io;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use kubetun::serve::{Route, start};

/// kubetun unified CLI.
#[derive(Parser)]
#[command(
    name = "kubetun",
    version,
    about = "Kubernetes-aware VPN data-plane",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the data-plane serve endpoints.
    #[command(name = "serve")]
    Serve(ServeArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Serve node to listen on, e.g. socks5://:1080 (repeatable).
    #[arg(short = 'L', long = "listen")]
    serve_nodes: Vec<String>,

    /// Upstream chain node, e.g. socks5+tls://gw.cluster.local:443.
    #[arg(short = 'F', long = "forward")]
    chain_node: Option<String>,

    /// Whole-dial attempts when reaching targets.
    #[arg(long, default_value_t = 1)]
    retries: usize,

    /// Log level filter, e.g. "debug" or "kubetun_chain=trace".
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            init_tracing(&args.log_level);

            let shutdown = CancellationToken::new();
            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                signal_shutdown.cancel();
            });

            let route = Route {
                serve_nodes: args.serve_nodes,
                chain_node: args.chain_node,
                retries: args.retries,
            };
            match start(route, shutdown).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
