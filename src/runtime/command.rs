//! kubeadm command builder
//!
//! Renders init/join commands for a role from the version policy, then
//! applies verbosity and the preflight level of the execution environment.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::config::kubeadm::api_server_endpoint;
use crate::error::{Error, Result};
use crate::runtime::version::{CommandFamily, VersionPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRole {
    InitMaster,
    JoinMaster,
    JoinNode,
}

impl fmt::Display for CommandRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandRole::InitMaster => "initMaster",
            CommandRole::JoinMaster => "joinMaster",
            CommandRole::JoinNode => "joinNode",
        };
        f.write_str(name)
    }
}

impl FromStr for CommandRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "initmaster" => Ok(CommandRole::InitMaster),
            "joinmaster" => Ok(CommandRole::JoinMaster),
            "joinnode" => Ok(CommandRole::JoinNode),
            _ => Err(Error::UnsupportedRole(s.to_string())),
        }
    }
}

/// How strict kubeadm preflight checks are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightMode {
    Strict,
    IgnoreSystemVerification,
    IgnoreAll,
}

impl PreflightMode {
    /// Containers relax everything; otherwise only control-plane roles skip
    /// system verification
    pub fn for_role(role: CommandRole, in_container: bool) -> Self {
        if in_container {
            return PreflightMode::IgnoreAll;
        }
        match role {
            CommandRole::InitMaster | CommandRole::JoinMaster => {
                PreflightMode::IgnoreSystemVerification
            }
            CommandRole::JoinNode => PreflightMode::Strict,
        }
    }

    fn flag(&self) -> Option<&'static str> {
        match self {
            PreflightMode::Strict => None,
            PreflightMode::IgnoreSystemVerification => {
                Some("--ignore-preflight-errors=SystemVerification")
            }
            PreflightMode::IgnoreAll => Some("--ignore-preflight-errors=all"),
        }
    }
}

/// Inputs the templates interpolate
#[derive(Debug, Clone)]
pub struct CommandContext<'a> {
    /// Remote rootfs holding `etc/kubeadm.yml`
    pub rootfs: &'a str,
    pub master0: IpAddr,
    pub vip: IpAddr,
    pub token: &'a str,
    pub ca_cert_hash: &'a str,
    pub certificate_key: &'a str,
    pub vlog: u8,
    pub in_container: bool,
}

/// A rendered kubeadm command, tagged with the role it was built for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeadmCommand {
    role: CommandRole,
    family: CommandFamily,
    preflight: PreflightMode,
    line: String,
}

impl KubeadmCommand {
    pub fn role(&self) -> CommandRole {
        self.role
    }

    pub fn family(&self) -> CommandFamily {
        self.family
    }

    pub fn preflight(&self) -> PreflightMode {
        self.preflight
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for KubeadmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Path of the kubeadm configuration inside a rootfs
pub fn kubeadm_config_path(rootfs: &str) -> String {
    format!("{}/etc/kubeadm.yml", rootfs.trim_end_matches('/'))
}

/// Build the kubeadm command for `role` under `policy`
pub fn build_command(
    policy: &VersionPolicy,
    role: CommandRole,
    ctx: &CommandContext<'_>,
) -> Result<KubeadmCommand> {
    let config = kubeadm_config_path(ctx.rootfs);
    let family = policy.family();

    let base = match (family, role) {
        (CommandFamily::ExplicitFlags, CommandRole::InitMaster) => {
            format!("kubeadm init --config={} --experimental-upload-certs", config)
        }
        (CommandFamily::ExplicitFlags, CommandRole::JoinMaster) => {
            require(role, "token", ctx.token)?;
            require(role, "CA cert hash", ctx.ca_cert_hash)?;
            require(role, "certificate key", ctx.certificate_key)?;
            format!(
                "kubeadm join {} --token {} --discovery-token-ca-cert-hash {} --experimental-control-plane --certificate-key {}",
                api_server_endpoint(ctx.master0),
                ctx.token,
                ctx.ca_cert_hash,
                ctx.certificate_key
            )
        }
        (CommandFamily::ExplicitFlags, CommandRole::JoinNode) => {
            require(role, "token", ctx.token)?;
            require(role, "CA cert hash", ctx.ca_cert_hash)?;
            format!(
                "kubeadm join {} --token {} --discovery-token-ca-cert-hash {}",
                api_server_endpoint(ctx.vip),
                ctx.token,
                ctx.ca_cert_hash
            )
        }
        (CommandFamily::ConfigFile, CommandRole::InitMaster) => {
            format!("kubeadm init --config={} --upload-certs", config)
        }
        (CommandFamily::ConfigFile, CommandRole::JoinMaster | CommandRole::JoinNode) => {
            format!("kubeadm join --config={}", config)
        }
    };

    let preflight = PreflightMode::for_role(role, ctx.in_container);
    let mut line = format!("{} -v {}", base, ctx.vlog);
    if let Some(flag) = preflight.flag() {
        line.push(' ');
        line.push_str(flag);
    }

    Ok(KubeadmCommand {
        role,
        family,
        preflight,
        line,
    })
}

/// String-typed entry point: `version` and `role` as they appear in config
pub fn build_command_for(version: &str, role: &str, ctx: &CommandContext<'_>) -> Result<KubeadmCommand> {
    let role: CommandRole = role.parse()?;
    build_command(&VersionPolicy::resolve(version), role, ctx)
}

fn require(role: CommandRole, what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} command requires a {}", role, what)));
    }
    Ok(())
}
