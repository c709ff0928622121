//! Bootstrapping master0

use std::net::IpAddr;

use tracing::{debug, info};

use crate::error::{Error, Result, Stage};
use crate::runtime::command::CommandRole;
use crate::runtime::{Runtime, StaticBundle, remote};

/// Files pulled back from master0 after init, relative to `/etc/kubernetes`.
///
/// Later control-plane joins receive them from the local cluster directory.
const SHARED_FILES: &[&str] = &[
    remote::ADMIN_CONF,
    remote::CONTROLLER_MANAGER_CONF,
    remote::SCHEDULER_CONF,
    "pki/ca.crt",
    "pki/ca.key",
    "pki/sa.key",
    "pki/sa.pub",
    "pki/front-proxy-ca.crt",
    "pki/front-proxy-ca.key",
    "pki/etcd/ca.crt",
    "pki/etcd/ca.key",
];

impl Runtime {
    /// Run `kubeadm init` on master0 and collect the shared kubeconfigs and
    /// CA material locally
    pub async fn init(&self) -> Result<()> {
        let master0 = self
            .state
            .lock()
            .await
            .master0()
            .map_err(|e| e.at(Stage::InitMaster))?;
        info!(host = %master0, "Initializing master0");

        self.wait_reachable(&[master0])
            .await
            .map_err(|e| e.at(Stage::WaitReachable))?;
        self.ensure_bootstrap_config()
            .await
            .map_err(|e| e.at(Stage::EnsureBootstrapConfig))?;
        self.distribute_static_files(&[master0], StaticBundle::Base)
            .await
            .map_err(|e| e.at(Stage::DistributeStaticFiles))?;
        self.send_init_config(master0)
            .await
            .map_err(|e| e.at(Stage::RenderAndSendJoinConfig))?;

        let commands = self
            .init_commands(master0)
            .await
            .map_err(|e| e.at(Stage::InitMaster))?;
        self.executor
            .cmd_async(master0, &commands)
            .await
            .map_err(|e| e.at(Stage::InitMaster))?;

        self.pull_shared_files(master0)
            .await
            .map_err(|e| e.at(Stage::InitMaster))?;
        info!(host = %master0, "Initialized master0");
        Ok(())
    }

    async fn send_init_config(&self, master0: IpAddr) -> Result<()> {
        let driver = self.cgroup_driver(master0).await?;
        let rendered = {
            let mut state = self.state.lock().await;
            state.cgroup_driver = driver;
            state.kubeadm.set_init_advertise_address(master0);
            state.kubeadm.set_cgroup_driver(driver);
            state.kubeadm.init_documents()?
        };
        self.write_remote_file(master0, &self.remote_kubeadm_path(), &rendered)
            .await
    }

    async fn init_commands(&self, master0: IpAddr) -> Result<Vec<String>> {
        let hostname = self.remote_hostname(master0).await?;
        let init = self.kubeadm_command(CommandRole::InitMaster).await?;
        let state = self.state.lock().await;

        let mut commands = vec![
            self.registry_hosts_command(&state)?,
            self.cert_command(&state, master0, &hostname),
            remote::add_hosts_entry(master0, &state.api_server_domain),
        ];
        commands.extend(self.registry_login_command(&state));
        commands.push(init.to_string());
        commands.extend(self.kubeconfig_commands(master0));
        Ok(commands)
    }

    async fn pull_shared_files(&self, master0: IpAddr) -> Result<()> {
        for file in SHARED_FILES {
            let remote_path = format!("{}/{}", remote::KUBERNETES_DIR, file);
            let content = self
                .executor
                .cmd(master0, &format!("cat {}", remote_path))
                .await?;
            if content.is_empty() {
                return Err(Error::command(
                    master0,
                    format!("cat {}", remote_path),
                    "file is empty",
                ));
            }

            let local = self.options.base_dir.join(file);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, content).await?;
            debug!(file = %local.display(), "Saved file from master0");
        }
        Ok(())
    }
}
