mod api;
mod branch_lock;
mod cli;
mod config;
mod deploy;
mod environment;
mod error;
mod reconcile;
mod recovery;
mod server;
mod state;
mod webhook;

use clap::Parser;
use dotenvy::dotenv;
use tracing::error;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Commands};
use crate::config::ControllerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env from the current directory before anything reads config
    dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            database_url,
            workspace_root,
            worker_log_dir,
        } => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info,controller=debug".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            install_panic_hook();

            let config =
                ControllerConfig::from_env(port, database_url, workspace_root, worker_log_dir);
            server::run(config).await
        }

        Commands::Hash { repo_url, branch } => {
            let hash = registry::branch_hash(&repo_url, &branch);
            println!("branch_hash:     0x{}", registry::branch_hash_hex(&hash));
            println!("supervisor_name: {}", registry::supervisor_name(&hash));
            Ok(())
        }
    }
}

/// Last-resort crash-proofing: panics are logged instead of printed to a
/// dead stderr, and supervisor-transport panics are called out explicitly
/// since they must never look like controller bugs. Panics inside spawned
/// tasks only kill their task; this hook makes sure they leave a trace.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info.to_string();
        if supervisor::error::is_ipc_marker(&message) {
            error!("Supervisor transport panic swallowed: {}", message);
        } else {
            error!("Panic: {}", message);
        }
    }));
}
