mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "kubeforge")]
#[command(about = "Bootstrap, grow and shrink Kubernetes clusters over SSH", long_about = None)]
pub struct Cli {
    /// Cluster name, used to locate the cluster directory
    #[arg(long, short = 'c', global = true, default_value = "my-cluster")]
    cluster: String,
    /// Path to the Clusterfile (default: <data_dir>/<cluster>/Clusterfile)
    #[arg(long, short = 'f', global = true)]
    clusterfile: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize master0, then join the remaining masters and nodes
    Init,
    /// Join masters and/or nodes to the cluster
    Join {
        /// Comma separated master addresses
        #[arg(long, short = 'm', value_delimiter = ',')]
        masters: Vec<String>,
        /// Comma separated node addresses
        #[arg(long, short = 'n', value_delimiter = ',')]
        nodes: Vec<String>,
        /// Kubernetes version to join with for this run; the Clusterfile keeps its own
        #[arg(long)]
        kube_version: Option<String>,
    },
    /// Remove masters and/or nodes from the cluster
    Delete {
        /// Comma separated master addresses
        #[arg(long, short = 'm', value_delimiter = ',')]
        masters: Vec<String>,
        /// Comma separated node addresses
        #[arg(long, short = 'n', value_delimiter = ',')]
        nodes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    commands::handle_command(&cli.cluster, cli.clusterfile.as_deref(), cli.command).await
}
