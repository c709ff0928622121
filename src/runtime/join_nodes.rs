//! Joining worker nodes

use std::net::IpAddr;

use tracing::{debug, info};

use crate::config::kubeadm::api_server_endpoint;
use crate::error::{Result, Stage};
use crate::runtime::command::{CommandRole, KubeadmCommand};
use crate::runtime::fanout::TaskGroup;
use crate::runtime::{Runtime, StaticBundle, lvscare, remote};

impl Runtime {
    /// Join `nodes` as workers, concurrently.
    ///
    /// Workers reach the API servers through the VIP, which the lvscare
    /// static pod balances over the current masters.
    pub async fn join_nodes(&self, nodes: &[IpAddr]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        self.ensure_bootstrap_config()
            .await
            .map_err(|e| e.at(Stage::EnsureBootstrapConfig))?;
        self.wait_reachable(nodes)
            .await
            .map_err(|e| e.at(Stage::WaitReachable))?;
        self.fetch_join_credentials(false)
            .await
            .map_err(|e| e.at(Stage::FetchJoinCredentials))?;
        self.distribute_static_files(nodes, StaticBundle::Base)
            .await
            .map_err(|e| e.at(Stage::DistributeStaticFiles))?;

        let command = self
            .kubeadm_command(CommandRole::JoinNode)
            .await
            .map_err(|e| e.at(Stage::ExecuteJoin))?;
        let manifest = {
            let state = self.state.lock().await;
            let masters: Vec<IpAddr> = state.masters.iter().copied().collect();
            lvscare::static_pod_manifest(
                state.vip,
                &masters,
                &self.lvscare_image(&state.registry.repo()),
            )?
        };
        let (command, manifest) = (&command, manifest.as_str());

        TaskGroup::fail_fast("join nodes")
            .run_on_each(nodes, |node| async move {
                info!(host = %node, "Joining node");
                let config = self
                    .render_join_node_config(node)
                    .await
                    .map_err(|e| e.at(Stage::RenderAndSendJoinConfig))?;
                let commands = self
                    .join_node_commands(node, command, &config, manifest)
                    .await
                    .map_err(|e| e.at(Stage::ExecuteJoin))?;
                self.executor
                    .cmd_async(node, &commands)
                    .await
                    .map_err(|e| e.at(Stage::ExecuteJoin))?;

                self.state.lock().await.add_nodes(&[node]);
                info!(host = %node, "Joined node");
                Ok(())
            })
            .await
    }

    async fn render_join_node_config(&self, node: IpAddr) -> Result<String> {
        let driver = self.cgroup_driver(node).await?;
        let mut state = self.state.lock().await;
        let endpoint = api_server_endpoint(state.vip).to_string();
        let creds = state.credentials.clone();
        let config = &mut state.kubeadm;
        config.set_join_discovery(&endpoint, &creds.token, &creds.ca_cert_hash);
        config.set_cgroup_driver(driver);
        config.join_node_documents()
    }

    async fn join_node_commands(
        &self,
        node: IpAddr,
        join: &KubeadmCommand,
        config: &str,
        manifest: &str,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut commands = vec![
            self.registry_hosts_command(&state)?,
            remote::add_hosts_entry(state.vip, &state.api_server_domain),
        ];
        commands.extend(self.registry_login_command(&state));
        commands.push(remote::write_file_command(&self.remote_kubeadm_path(), config));
        commands.push(lvscare::remove_manifest_command());
        commands.push(remote::write_file_command(&lvscare::manifest_path(), manifest));
        commands.push(join.to_string());
        debug!(host = %node, count = commands.len(), "Prepared join node commands");
        Ok(commands)
    }
}
