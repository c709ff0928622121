//! Removing masters and nodes from a cluster
//!
//! Removal favours consistent bookkeeping over confirmed cleanup: a host
//! that cannot be cleaned is still dropped from the inventory.

use std::net::IpAddr;

use tracing::{debug, info, warn};

use crate::error::{Error, Result, Stage};
use crate::runtime::fanout::TaskGroup;
use crate::runtime::{Runtime, remote};

impl Runtime {
    /// Remove `masters`, each concurrently and independently.
    ///
    /// Per-host failures are logged. The lvscare manifest on every node is
    /// rebuilt once afterwards from the masters that remain.
    pub async fn delete_masters(&self, masters: &[IpAddr]) -> Result<()> {
        if masters.is_empty() {
            return Ok(());
        }

        let (remaining, nodes, old_master0) = {
            let state = self.state.lock().await;
            let remaining: Vec<IpAddr> = state
                .masters
                .iter()
                .copied()
                .filter(|ip| !masters.contains(ip))
                .collect();
            let nodes: Vec<IpAddr> = state.nodes.iter().copied().collect();
            (remaining, nodes, state.masters.first().copied())
        };
        let via = remaining.first().copied();
        let api_host = via.or(old_master0);

        TaskGroup::best_effort("delete masters")
            .run_on_each(masters, |master| async move {
                info!(host = %master, "Deleting master");
                self.delete_host(master, via, api_host).await?;
                info!(host = %master, "Deleted master");
                Ok(())
            })
            .await?;

        self.state.lock().await.remove_masters(masters);
        self.refresh_lvscare(&nodes, &remaining).await
    }

    /// Remove worker `nodes`; failures are logged per host
    pub async fn delete_nodes(&self, nodes: &[IpAddr]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let (master0, vip) = {
            let state = self.state.lock().await;
            (state.masters.first().copied(), state.vip)
        };

        TaskGroup::best_effort("delete nodes")
            .run_on_each(nodes, |node| async move {
                info!(host = %node, "Deleting node");
                self.delete_host(node, master0, Some(vip)).await?;
                info!(host = %node, "Deleted node");
                Ok(())
            })
            .await?;

        self.state.lock().await.remove_nodes(nodes);
        Ok(())
    }

    /// Clean `host`, then delete its node object through `via`.
    ///
    /// `api_host` is where a local host's API-server entry points after
    /// cleanup. Without `via` there is no control plane left to update.
    async fn delete_host(&self, host: IpAddr, via: Option<IpAddr>, api_host: Option<IpAddr>) -> Result<()> {
        let cleanup = self.cleanup_commands(host, api_host).await;
        if let Err(e) = self.executor.cmd_async(host, &cleanup).await {
            warn!(
                host = %host,
                stage = %Stage::Cleanup,
                error = %e,
                "Cleanup failed, removing host from the cluster anyway"
            );
        }

        let Some(via) = via else {
            debug!(host = %host, "No master remains, skipping node deletion");
            return Ok(());
        };

        let name = self.resolve_node_name(via, host).await?;
        self.executor
            .cmd_async(via, &[remote::kube_delete_node(&name)])
            .await
    }

    async fn cleanup_commands(&self, host: IpAddr, api_host: Option<IpAddr>) -> Vec<String> {
        let state = self.state.lock().await;
        let registry_domain = &state.registry.domain;

        let mut commands = vec![
            remote::clean_master_or_node(self.options.vlog),
            remote::remove_hosts_entry(registry_domain),
            remote::remove_hosts_entry(remote::REGISTRY_ALIAS),
            remote::remove_registry_certs(registry_domain),
            remote::remove_registry_certs(remote::REGISTRY_ALIAS),
            remote::remove_hosts_entry(&state.api_server_domain),
        ];

        // Keep this machine usable as an API client
        match api_host {
            Some(api_host) if self.is_local(host) => {
                commands.push(remote::add_hosts_entry(api_host, &state.api_server_domain));
            }
            _ => commands.push(remote::REMOVE_KUBECONFIG.to_string()),
        }
        commands
    }

    /// Node name of `host` as known to the cluster, looked up through `via`.
    ///
    /// Matches the host's own hostname first and falls back to its
    /// internal IP when the host cannot answer.
    async fn resolve_node_name(&self, via: IpAddr, host: IpAddr) -> Result<String> {
        match self.remote_hostname(host).await {
            Ok(hostname) => {
                let names = self.executor.cmd(via, remote::GET_NODE_NAMES).await?;
                if let Some(name) = remote::match_node_name(&names, &hostname) {
                    return Ok(name);
                }
                debug!(host = %host, hostname = %hostname, "Hostname not among nodes, matching by address");
            }
            Err(e) => {
                debug!(host = %host, error = %e, "Hostname unavailable, matching by address");
            }
        }

        let wide = self.executor.cmd(via, remote::GET_NODES_WIDE).await?;
        remote::match_node_by_ip(&wide, host)
            .ok_or_else(|| Error::validation(format!("no cluster node found for {}", host)))
    }
}
