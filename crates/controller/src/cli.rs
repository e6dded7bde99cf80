use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "controller")]
#[command(about = "Git-driven deployment controller", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the deployment controller
    Start {
        #[arg(long, env = "PORT", default_value = "3000")]
        port: u16,

        #[arg(long, env = "DATABASE_URL", default_value = "sqlite://controller.db?mode=rwc")]
        database_url: String,

        #[arg(long, env = "WORKSPACE_ROOT", default_value = "./workspaces")]
        workspace_root: String,

        /// Directory for supervised worker log files
        #[arg(long, env = "WORKER_LOG_DIR", default_value = "./worker-logs")]
        worker_log_dir: String,
    },

    /// Print the branch hash and supervisor name for a (repo, branch) pair
    Hash {
        #[arg(long)]
        repo_url: String,

        #[arg(long)]
        branch: String,
    },
}
