#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kubeforge::config::ClusterFile;
use kubeforge::runtime::remote;
use kubeforge::utils::retry::RetryConfig;
use kubeforge::utils::ssh::RemoteExecutor;
use kubeforge::{Error, Result, Runtime, RuntimeOptions};

pub const UPLOAD_CERTS_OUTPUT: &str = "[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace\n\
[upload-certs] Using certificate key:\n\
8376c70aaaf285b764b3c1a588740728aff493d7c2239684e84a7367c6a437cf\n";

pub const TOKEN_CREATE_OUTPUT: &str =
    "kubeadm join apiserver.cluster.local:6443 --token ryatmx.x8bhszh1cy9yvj7u --discovery-token-ca-cert-hash sha256:9f3a2c\n";

pub const CERTIFICATE_KEY: &str = "8376c70aaaf285b764b3c1a588740728aff493d7c2239684e84a7367c6a437cf";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Ping,
    Cmd(String),
    Copy { src: PathBuf, dst: String },
}

/// In-memory executor that records every call per host
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(IpAddr, Call)>>,
    responses: Vec<(String, String)>,
    failures: Vec<(IpAddr, String)>,
    unreachable: HashSet<IpAddr>,
    node_names: Vec<(IpAddr, String)>,
    users: HashMap<IpAddr, String>,
    default_user: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`
    pub fn respond(mut self, prefix: &str, output: &str) -> Self {
        self.responses.push((prefix.to_string(), output.to_string()));
        self
    }

    /// Fail any command or copy destination on `host` containing `pattern`
    pub fn fail_on(mut self, host: IpAddr, pattern: &str) -> Self {
        self.failures.push((host, pattern.to_string()));
        self
    }

    pub fn unreachable(mut self, host: IpAddr) -> Self {
        self.unreachable.insert(host);
        self
    }

    /// Register a cluster node; its hostname is `name` in upper case
    pub fn node(mut self, host: IpAddr, name: &str) -> Self {
        self.node_names.push((host, name.to_string()));
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.default_user = Some(user.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(IpAddr, Call)> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands run on `host`, in order
    pub fn commands(&self, host: IpAddr) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(h, call)| match call {
                Call::Cmd(cmd) if h == host => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Every command on every host
    pub fn all_commands(&self) -> Vec<(IpAddr, String)> {
        self.calls()
            .into_iter()
            .filter_map(|(h, call)| match call {
                Call::Cmd(cmd) => Some((h, cmd)),
                _ => None,
            })
            .collect()
    }

    pub fn count_commands(&self, pattern: &str) -> usize {
        self.all_commands()
            .iter()
            .filter(|(_, cmd)| cmd.contains(pattern))
            .count()
    }

    pub fn copies(&self, host: IpAddr) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(h, call)| match call {
                Call::Copy { dst, .. } if h == host => Some(dst),
                _ => None,
            })
            .collect()
    }

    fn record(&self, host: IpAddr, call: Call) {
        self.calls.lock().unwrap().push((host, call));
    }

    fn check(&self, host: IpAddr, what: &str) -> Result<()> {
        if self.unreachable.contains(&host) {
            return Err(Error::command(host, what, "connection timed out"));
        }
        if self
            .failures
            .iter()
            .any(|(h, pattern)| *h == host && what.contains(pattern.as_str()))
        {
            return Err(Error::command(host, what, "injected failure"));
        }
        Ok(())
    }

    fn output_for(&self, host: IpAddr, command: &str) -> String {
        if let Some((_, output)) = self
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return output.clone();
        }

        if command.starts_with("kubeadm init phase upload-certs") {
            UPLOAD_CERTS_OUTPUT.to_string()
        } else if command.starts_with("kubeadm token create") {
            TOKEN_CREATE_OUTPUT.to_string()
        } else if command == remote::CGROUP_DRIVER_PROBE {
            "systemd\n".to_string()
        } else if command == remote::HOSTNAME {
            let name = self
                .node_names
                .iter()
                .find(|(h, _)| *h == host)
                .map(|(_, name)| name.to_uppercase())
                .unwrap_or_else(|| format!("host-{}", host).replace('.', "-"));
            format!("{}\n", name)
        } else if command == remote::GET_NODE_NAMES {
            self.node_names
                .iter()
                .map(|(_, name)| format!("{}\n", name))
                .collect()
        } else if command == remote::GET_NODES_WIDE {
            self.node_names
                .iter()
                .map(|(h, name)| {
                    format!(
                        "{}   Ready   control-plane   3d   v1.23.0   {}   <none>   Ubuntu\n",
                        name, h
                    )
                })
                .collect()
        } else if command.starts_with("cat /etc/kubernetes/") {
            format!("contents of {}\n", command.trim_start_matches("cat "))
        } else {
            String::new()
        }
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn cmd(&self, host: IpAddr, command: &str) -> Result<String> {
        self.record(host, Call::Cmd(command.to_string()));
        self.check(host, command)?;
        Ok(self.output_for(host, command))
    }

    async fn cmd_async(&self, host: IpAddr, commands: &[String]) -> Result<()> {
        for command in commands {
            self.cmd(host, command).await?;
        }
        Ok(())
    }

    async fn copy(&self, host: IpAddr, src: &Path, dst: &str) -> Result<()> {
        self.record(
            host,
            Call::Copy {
                src: src.to_path_buf(),
                dst: dst.to_string(),
            },
        );
        self.check(host, dst)
            .map_err(|e| Error::distribution(host, e.to_string()))
    }

    async fn ping(&self, host: IpAddr) -> Result<()> {
        self.record(host, Call::Ping);
        self.check(host, "true")
    }

    fn username(&self, host: IpAddr) -> String {
        self.users
            .get(&host)
            .cloned()
            .or_else(|| self.default_user.clone())
            .unwrap_or_else(|| "root".to_string())
    }
}

pub fn cluster(version: &str, masters: &[&str], nodes: &[&str]) -> ClusterFile {
    let mut cluster = ClusterFile::new("test", version);
    cluster.masters.extend(masters.iter().map(|m| ip(m)));
    cluster.nodes.extend(nodes.iter().map(|n| ip(n)));
    cluster
}

pub fn options(base_dir: &Path) -> RuntimeOptions {
    RuntimeOptions {
        vlog: 0,
        in_container: false,
        base_dir: base_dir.to_path_buf(),
        wait: RetryConfig::with_max_attempts(2).with_initial_delay(Duration::ZERO),
        lvscare_image: "fanux/lvscare:latest".to_string(),
        cert_tool: "seautil".to_string(),
    }
}

/// Runtime over `executor` with no address treated as local
pub fn runtime(cluster: &ClusterFile, executor: Arc<RecordingExecutor>, base_dir: &Path) -> Runtime {
    Runtime::new(cluster, executor, options(base_dir))
        .unwrap()
        .with_local_ips(Vec::new())
}

pub fn position(commands: &[String], pattern: &str) -> Option<usize> {
    commands.iter().position(|cmd| cmd.contains(pattern))
}
