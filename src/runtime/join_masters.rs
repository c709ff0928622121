//! Joining additional control-plane hosts

use std::net::IpAddr;

use tracing::{info, warn};

use crate::error::{Result, Stage};
use crate::runtime::command::{CommandRole, KubeadmCommand};
use crate::runtime::fanout::TaskGroup;
use crate::runtime::remote;
use crate::runtime::version::Quirk;
use crate::runtime::{Runtime, StaticBundle};

impl Runtime {
    /// Join `masters` to the control plane.
    ///
    /// Credentials are fetched once from master0 for the whole batch. Hosts
    /// join one at a time; a failure stops the batch and leaves already
    /// joined masters in place.
    pub async fn join_masters(&self, masters: &[IpAddr]) -> Result<()> {
        if masters.is_empty() {
            return Ok(());
        }

        self.ensure_bootstrap_config()
            .await
            .map_err(|e| e.at(Stage::EnsureBootstrapConfig))?;
        self.wait_reachable(masters)
            .await
            .map_err(|e| e.at(Stage::WaitReachable))?;
        self.fetch_join_credentials(true)
            .await
            .map_err(|e| e.at(Stage::FetchJoinCredentials))?;
        self.distribute_static_files(masters, StaticBundle::ControlPlane)
            .await
            .map_err(|e| e.at(Stage::DistributeStaticFiles))?;
        self.send_join_master_configs(masters)
            .await
            .map_err(|e| e.at(Stage::RenderAndSendJoinConfig))?;
        self.patch_known_version_quirk(masters).await;

        let command = self
            .kubeadm_command(CommandRole::JoinMaster)
            .await
            .map_err(|e| e.at(Stage::ExecuteJoin))?;

        for &master in masters {
            info!(host = %master, "Joining master");
            let commands = self
                .join_master_commands(master, &command)
                .await
                .map_err(|e| e.at(Stage::ExecuteJoin))?;
            self.executor
                .cmd_async(master, &commands)
                .await
                .map_err(|e| e.at(Stage::ExecuteJoin))?;

            self.state.lock().await.add_masters(&[master]);
            info!(host = %master, "Joined master");
        }
        Ok(())
    }

    /// Stamp the shared join template per host and write it to the host.
    ///
    /// The lock covers only the stamp and marshal; probing and writing
    /// happen outside it.
    async fn send_join_master_configs(&self, masters: &[IpAddr]) -> Result<()> {
        let path = self.remote_kubeadm_path();
        let path = path.as_str();

        TaskGroup::fail_fast("render join config")
            .run_on_each(masters, |master| async move {
                let driver = self.cgroup_driver(master).await?;
                let rendered = {
                    let mut state = self.state.lock().await;
                    let endpoint = state.master0_endpoint()?.to_string();
                    let creds = state.credentials.clone();
                    state.cgroup_driver = driver;
                    let config = &mut state.kubeadm;
                    config.set_join_discovery(&endpoint, &creds.token, &creds.ca_cert_hash);
                    config.set_join_control_plane(master, &creds.certificate_key);
                    config.set_cgroup_driver(driver);
                    config.join_master_documents()?
                };
                self.write_remote_file(master, path, &rendered).await
            })
            .await
    }

    /// Point scheduler and controller-manager kubeconfigs at each master on
    /// releases that keep the load balancer placeholder. Failures are logged.
    async fn patch_known_version_quirk(&self, masters: &[IpAddr]) {
        if !self.policy.has_quirk(Quirk::ControlPlaneKubeconfigEndpoint) {
            return;
        }
        let placeholder = self.state.lock().await.api_server_domain.clone();

        for &master in masters {
            let cmd = remote::replace_kubeconfig_endpoint(&placeholder, master);
            match self.executor.cmd_async(master, &[cmd]).await {
                Ok(()) => info!(host = %master, version = %self.policy.raw(), "Patched kubeconfig endpoints"),
                Err(e) => warn!(
                    host = %master,
                    stage = %Stage::PatchKnownVersionQuirk,
                    error = %e,
                    "Failed to patch kubeconfig endpoints"
                ),
            }
        }
    }

    async fn join_master_commands(&self, master: IpAddr, join: &KubeadmCommand) -> Result<Vec<String>> {
        let hostname = self.remote_hostname(master).await?;
        let state = self.state.lock().await;
        let master0 = state.master0()?;
        let domain = &state.api_server_domain;

        let mut commands = vec![
            self.registry_hosts_command(&state)?,
            self.cert_command(&state, master, &hostname),
            remote::add_hosts_entry(master0, domain),
        ];
        commands.extend(self.registry_login_command(&state));
        commands.push(join.to_string());
        commands.push(remote::update_hosts_entry(master0, master, domain));
        commands.extend(self.kubeconfig_commands(master));
        Ok(commands)
    }
}
