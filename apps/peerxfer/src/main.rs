//! peerxfer node entry point.

mod config;
mod node;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use peerxfer_protocol::{DeleteRequest, TransferRequest};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::node::Node;

#[derive(Parser, Debug)]
#[command(author, version, about = "Move files between two peerxfer nodes")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "PEERXFER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept transfers and delete requests from the peer
    Serve,
    /// Copy files, e.g. `transfer local:logs/*.log peer:archive/`
    Transfer { source: String, destination: String },
    /// Delete one file, e.g. `delete peer:archive/old.log`
    Delete { path: String },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %config.root.display(),
        "starting peerxfer"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command, config))
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    let node = Node::new(config, cancel)?;
    match command {
        Command::Serve => node.serve().await,
        Command::Transfer {
            source,
            destination,
        } => {
            let request = TransferRequest {
                source,
                destination,
            };
            node.transfer(&request, &mut tokio::io::stdout()).await
        }
        Command::Delete { path } => {
            let response = node.delete(&DeleteRequest { path }).await;
            println!("{}", serde_json::to_string(&response)?);
            if !response.success {
                anyhow::bail!("delete failed: {}", response.message);
            }
            Ok(())
        }
    }
}
