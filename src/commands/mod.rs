// Command module routing
//
// To add a new command:
// 1. Create a new file in this directory (e.g., `mycommand.rs`)
// 2. Add `pub mod mycommand;` below
// 3. Add the match arm in `handle_command` function

pub mod delete;
pub mod init;
pub mod join;
pub mod utils;

use std::path::Path;

use anyhow::Result;

use crate::Commands;
use crate::Commands::*;

/// Dispatch command to appropriate handler
pub async fn handle_command(cluster: &str, clusterfile: Option<&Path>, command: Commands) -> Result<()> {
    match command {
        Init => init::handle_init(cluster, clusterfile).await?,
        Join {
            masters,
            nodes,
            kube_version,
        } => {
            join::handle_join(cluster, clusterfile, &masters, &nodes, kube_version).await?;
        }
        Delete { masters, nodes } => {
            delete::handle_delete(cluster, clusterfile, &masters, &nodes).await?;
        }
    }
    Ok(())
}
