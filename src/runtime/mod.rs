//! Cluster join/leave orchestration
//!
//! [`Runtime`] drives hosts through bootstrap, join and removal. Every
//! public operation is a sequence of stages; each stage is one batch over
//! the target hosts and completes before the next one starts.

pub mod certs;
pub mod command;
pub mod credentials;
pub mod delete;
pub mod fanout;
pub mod init;
pub mod join_masters;
pub mod join_nodes;
pub mod lvscare;
pub mod remote;
pub mod state;
pub mod version;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::config::clusterfile::ClusterFile;
use crate::config::kubeadm::{self, API_SERVER_PORT, CgroupDriver, KubeadmConfig};
use crate::error::{Error, Result};
use crate::utils::networking::{get_local_ips, is_local_ip};
use crate::utils::retry::{RetryConfig, retry_with_backoff};
use crate::utils::ssh::{ROOT_USER, RemoteExecutor};

use self::certs::{CertAuthority, CertRequest, RootfsCertTool};
use self::command::{CommandContext, CommandRole, KubeadmCommand, build_command, kubeadm_config_path};
use self::credentials::{
    JoinCredentials, parse_certificate_key, parse_join_command, token_create_command,
    upload_certs_command,
};
use self::fanout::TaskGroup;
use self::state::ClusterState;
use self::version::VersionPolicy;

/// Knobs that come from tool settings rather than the Clusterfile
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub vlog: u8,
    pub in_container: bool,
    /// Local cluster directory; its `rootfs` lands at the same path remotely
    pub base_dir: PathBuf,
    pub wait: RetryConfig,
    pub lvscare_image: String,
    pub cert_tool: String,
}

impl RuntimeOptions {
    pub fn from_settings(settings: &Settings, cluster: &str) -> Self {
        let initial_delay = Duration::from_secs(settings.ssh_wait_delay_secs);
        Self {
            vlog: settings.vlog,
            in_container: settings
                .in_container
                .unwrap_or_else(crate::utils::is_in_container),
            base_dir: settings.cluster_dir(cluster),
            wait: RetryConfig {
                max_delay: initial_delay.max(Duration::from_secs(30)),
                ..RetryConfig::with_max_attempts(settings.ssh_wait_attempts)
                    .with_initial_delay(initial_delay)
            },
            lvscare_image: settings.lvscare_image.clone(),
            cert_tool: settings.cert_tool.clone(),
        }
    }
}

/// Which files a host receives before it runs kubeadm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticBundle {
    /// rootfs, static files and registry certificates
    Base,
    /// Base plus shared PKI and the admin/controller/scheduler kubeconfigs
    ControlPlane,
}

pub struct Runtime {
    state: Mutex<ClusterState>,
    policy: VersionPolicy,
    executor: Arc<dyn RemoteExecutor>,
    certs: Arc<dyn CertAuthority>,
    options: RuntimeOptions,
    local_ips: Vec<IpAddr>,
}

impl Runtime {
    pub fn new(
        cluster: &ClusterFile,
        executor: Arc<dyn RemoteExecutor>,
        options: RuntimeOptions,
    ) -> Result<Self> {
        let state = ClusterState::from_clusterfile(cluster)?;
        let policy = VersionPolicy::resolve(&state.kube_version);
        let local_ips = get_local_ips().unwrap_or_else(|e| {
            warn!(error = %e, "Could not list local addresses, treating every host as remote");
            Vec::new()
        });
        let certs: Arc<dyn CertAuthority> = Arc::new(RootfsCertTool::new(options.cert_tool.clone()));

        Ok(Self {
            state: Mutex::new(state),
            policy,
            executor,
            certs,
            options,
            local_ips,
        })
    }

    /// Override the addresses considered local to this machine
    pub fn with_local_ips(mut self, local_ips: Vec<IpAddr>) -> Self {
        self.local_ips = local_ips;
        self
    }

    pub fn with_cert_authority(mut self, certs: Arc<dyn CertAuthority>) -> Self {
        self.certs = certs;
        self
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> ClusterState {
        self.state.lock().await.clone()
    }

    /// Inventory in persisted form
    pub async fn clusterfile(&self) -> ClusterFile {
        self.state.lock().await.to_clusterfile()
    }

    fn rootfs(&self) -> PathBuf {
        self.options.base_dir.join("rootfs")
    }

    fn remote_rootfs(&self) -> String {
        self.rootfs().display().to_string()
    }

    fn remote_kubeadm_path(&self) -> String {
        kubeadm_config_path(&self.remote_rootfs())
    }

    fn pki_dir(&self) -> PathBuf {
        self.options.base_dir.join("pki")
    }

    fn certs_dir(&self) -> PathBuf {
        self.options.base_dir.join("certs")
    }

    fn statics_dir(&self) -> PathBuf {
        self.rootfs().join("statics")
    }

    fn is_local(&self, host: IpAddr) -> bool {
        is_local_ip(host, &self.local_ips)
    }

    fn is_root(&self, host: IpAddr) -> bool {
        self.executor.username(host) == ROOT_USER
    }

    fn lvscare_image(&self, registry_repo: &str) -> String {
        format!("{}/{}", registry_repo, self.options.lvscare_image)
    }

    /// Render the kubeadm command for `role` from the current credentials
    async fn kubeadm_command(&self, role: CommandRole) -> Result<KubeadmCommand> {
        let (master0, vip, creds) = {
            let state = self.state.lock().await;
            (state.master0()?, state.vip, state.credentials.clone())
        };
        let rootfs = self.remote_rootfs();
        let ctx = CommandContext {
            rootfs: &rootfs,
            master0,
            vip,
            token: &creds.token,
            ca_cert_hash: &creds.ca_cert_hash,
            certificate_key: &creds.certificate_key,
            vlog: self.options.vlog,
            in_container: self.options.in_container,
        };
        build_command(&self.policy, role, &ctx)
    }

    /// Poll every host until it answers or the retry budget runs out
    pub(crate) async fn wait_reachable(&self, hosts: &[IpAddr]) -> Result<()> {
        let wait = &self.options.wait;
        TaskGroup::fail_fast("wait reachable")
            .run_on_each(hosts, |host| async move {
                retry_with_backoff(wait, &format!("ssh {}", host), || self.executor.ping(host))
                    .await
                    .map_err(|e| {
                        debug!(host = %host, error = %e, "Last reachability probe failed");
                        Error::UnreachableHost {
                            host,
                            attempts: wait.max_attempts,
                        }
                    })
            })
            .await
    }

    /// Fetch token, CA hash and optionally the certificate key from master0.
    ///
    /// Existing credentials are discarded first; new ones are stored only
    /// when every part parsed.
    pub(crate) async fn fetch_join_credentials(
        &self,
        with_certificate_key: bool,
    ) -> Result<JoinCredentials> {
        let master0 = {
            let mut state = self.state.lock().await;
            state.credentials = JoinCredentials::default();
            state.master0()?
        };
        let vlog = self.options.vlog;

        let certificate_key = if with_certificate_key {
            let output = self
                .executor
                .cmd(master0, &upload_certs_command(self.policy.family(), vlog))
                .await?;
            debug!(host = %master0, "upload-certs output: {}", output.trim_end());
            parse_certificate_key(&output)?
        } else {
            String::new()
        };

        let output = self.executor.cmd(master0, &token_create_command(vlog)).await?;
        let (token, ca_cert_hash) = parse_join_command(&output)?;

        let credentials = JoinCredentials {
            token,
            ca_cert_hash,
            certificate_key,
        };
        self.state.lock().await.credentials = credentials.clone();
        info!(host = %master0, "Fetched join credentials");
        Ok(credentials)
    }

    /// Merge rootfs kubeadm defaults under the Clusterfile documents, once
    pub(crate) async fn ensure_bootstrap_config(&self) -> Result<()> {
        if self.state.lock().await.kubeadm_loaded {
            return Ok(());
        }

        let defaults_path = self.rootfs().join("etc").join("kubeadm.yml");
        let defaults = match tokio::fs::read_to_string(&defaults_path).await {
            Ok(content) => kubeadm::parse_documents(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %defaults_path.display(), "No kubeadm defaults in rootfs");
                Vec::new()
            }
            Err(e) => {
                return Err(Error::config(format!(
                    "failed to read {}: {}",
                    defaults_path.display(),
                    e
                )));
            }
        };

        let mut state = self.state.lock().await;
        if state.kubeadm_loaded {
            return Ok(());
        }
        let mut config = KubeadmConfig::from_documents(&state.kubeadm_overrides)?;
        config.merge_defaults(&defaults)?;
        config.set_api_version(self.policy.kubeadm_api_version());
        stamp_cluster_configuration(&mut config, &state);
        state.kubeadm = config;
        state.kubeadm_loaded = true;
        debug!(cluster = %state.name, "Loaded kubeadm configuration");
        Ok(())
    }

    /// Ship `bundle` to every host, failing on the first host that errors
    pub(crate) async fn distribute_static_files(
        &self,
        hosts: &[IpAddr],
        bundle: StaticBundle,
    ) -> Result<()> {
        let files = {
            let state = self.state.lock().await;
            self.static_files(&state, bundle)
        };
        let files = &files;

        TaskGroup::fail_fast("distribute static files")
            .run_on_each(hosts, |host| async move {
                for (src, dst) in files {
                    self.executor
                        .copy(host, src, dst)
                        .await
                        .map_err(|e| as_distribution(host, e))?;
                }
                debug!(host = %host, files = files.len(), "Static files distributed");
                Ok(())
            })
            .await
    }

    fn static_files(&self, state: &ClusterState, bundle: StaticBundle) -> Vec<(PathBuf, String)> {
        let registry = &state.registry;
        let registry_cert = self.certs_dir().join(format!("{}.crt", registry.domain));

        let mut files = vec![
            (self.rootfs(), self.remote_rootfs()),
            (self.statics_dir(), remote::KUBERNETES_DIR.to_string()),
            (
                registry_cert.clone(),
                remote::registry_cert_path(&registry.domain, registry.port, &registry.domain),
            ),
            (
                registry_cert,
                remote::registry_cert_path(remote::REGISTRY_ALIAS, registry.port, &registry.domain),
            ),
        ];

        if bundle == StaticBundle::ControlPlane {
            for conf in [remote::ADMIN_CONF, remote::CONTROLLER_MANAGER_CONF, remote::SCHEDULER_CONF] {
                files.push((
                    self.options.base_dir.join(conf),
                    format!("{}/{}", remote::KUBERNETES_DIR, conf),
                ));
            }
            files.push((self.pki_dir(), remote::KUBERNETES_PKI_DIR.to_string()));
        }
        files
    }

    /// Probe the cgroup driver of the host's container runtime
    pub(crate) async fn cgroup_driver(&self, host: IpAddr) -> Result<CgroupDriver> {
        let output = self.executor.cmd(host, remote::CGROUP_DRIVER_PROBE).await?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .parse()
    }

    /// Write a text file on the host
    pub(crate) async fn write_remote_file(&self, host: IpAddr, path: &str, content: &str) -> Result<()> {
        self.executor
            .cmd_async(host, &[remote::write_file_command(path, content)])
            .await
            .map_err(|e| as_distribution(host, e))
    }

    pub(crate) async fn remote_hostname(&self, host: IpAddr) -> Result<String> {
        let hostname = self.executor.cmd(host, remote::HOSTNAME).await?;
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(Error::command(host, remote::HOSTNAME, "empty hostname"));
        }
        Ok(hostname.to_string())
    }

    pub(crate) fn cert_command(&self, state: &ClusterState, host: IpAddr, hostname: &str) -> String {
        self.certs.issue_command(&CertRequest {
            alt_names: state.cert_sans(),
            node_ip: host,
            node_name: hostname.to_string(),
            service_cidr: state.svc_cidr.clone(),
            dns_domain: state.dns_domain.clone(),
        })
    }

    /// Map the registry domain, and the internal alias, to the registry host
    pub(crate) fn registry_hosts_command(&self, state: &ClusterState) -> Result<String> {
        let ip = state.registry_ip()?;
        let mut cmd = remote::add_hosts_entry(ip, &state.registry.domain);
        if state.registry.domain != remote::REGISTRY_ALIAS {
            cmd = format!("{} && {}", cmd, remote::add_hosts_entry(ip, remote::REGISTRY_ALIAS));
        }
        Ok(cmd)
    }

    pub(crate) fn registry_login_command(&self, state: &ClusterState) -> Option<String> {
        state
            .registry
            .credentials()
            .map(|(user, pass)| remote::registry_login(&state.registry.repo(), user, pass))
    }

    /// Commands that copy the admin kubeconfig for the session user
    pub(crate) fn kubeconfig_commands(&self, host: IpAddr) -> Vec<String> {
        let mut commands = vec![remote::COPY_KUBECONFIG.to_string()];
        if !self.is_root(host) {
            commands.push(remote::NON_ROOT_COPY_KUBECONFIG.to_string());
        }
        commands
    }

    /// Refresh the lvscare manifest on every node; failures are logged
    pub(crate) async fn refresh_lvscare(&self, nodes: &[IpAddr], masters: &[IpAddr]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let (vip, repo) = {
            let state = self.state.lock().await;
            (state.vip, state.registry.repo())
        };
        let manifest = lvscare::static_pod_manifest(vip, masters, &self.lvscare_image(&repo))?;
        let commands = [
            lvscare::remove_manifest_command(),
            remote::write_file_command(&lvscare::manifest_path(), &manifest),
        ];
        let commands = &commands;

        TaskGroup::best_effort("update lvscare")
            .run_on_each(nodes, |node| async move {
                self.executor.cmd_async(node, commands).await
            })
            .await
    }
}

/// Fields of `ClusterConfiguration` owned by the Clusterfile
fn stamp_cluster_configuration(config: &mut KubeadmConfig, state: &ClusterState) {
    let cluster = &mut config.cluster;
    cluster.kubernetes_version = state.kube_version.clone();
    cluster.control_plane_endpoint = format!("{}:{}", state.api_server_domain, API_SERVER_PORT);
    if cluster.image_repository.is_none() {
        cluster.image_repository = Some(state.registry.repo());
    }

    let networking = cluster.networking.get_or_insert_with(Default::default);
    networking.service_subnet = Some(state.svc_cidr.clone());
    networking.dns_domain = Some(state.dns_domain.clone());

    let api_server = cluster.api_server.get_or_insert_with(Default::default);
    for san in state.cert_sans() {
        if !api_server.cert_sans.contains(&san) {
            api_server.cert_sans.push(san);
        }
    }
}

fn as_distribution(host: IpAddr, err: Error) -> Error {
    match err {
        Error::Distribution { .. } => err,
        other => Error::distribution(host, other.to_string()),
    }
}
