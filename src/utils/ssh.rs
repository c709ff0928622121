//! Remote command execution over SSH

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

pub const ROOT_USER: &str = "root";

/// Capability to run commands and ship files on cluster hosts.
///
/// Every call is independent and may be issued concurrently against many
/// hosts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a single command and return its stdout
    async fn cmd(&self, host: IpAddr, command: &str) -> Result<String>;

    /// Run commands in order, stopping at the first failure
    async fn cmd_async(&self, host: IpAddr, commands: &[String]) -> Result<()>;

    /// Copy a local file or directory to `dst` on the host
    async fn copy(&self, host: IpAddr, src: &Path, dst: &str) -> Result<()>;

    /// Check that a session can be opened to the host
    async fn ping(&self, host: IpAddr) -> Result<()>;

    /// Login user for sessions to this host
    fn username(&self, host: IpAddr) -> String;
}

/// SSH login settings, shared by every host of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_user() -> String {
    ROOT_USER.to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Executor backed by the system `ssh` client
pub struct SshExecutor {
    ssh_bin: PathBuf,
    config: SshConfig,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Result<Self> {
        let ssh_bin = which::which("ssh")
            .map_err(|e| Error::config(format!("ssh client not found in PATH: {}", e)))?;
        Ok(Self { ssh_bin, config })
    }

    fn build_ssh_args(&self, host: IpAddr) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        args.push(format!("{}@{}", self.config.user, host));
        args
    }

    async fn execute_shell(&self, host: IpAddr, command: &str) -> Result<Output> {
        let output = Command::new(&self.ssh_bin)
            .args(self.build_ssh_args(host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    async fn write_file(&self, host: IpAddr, src: &Path, dst: &str) -> Result<()> {
        let content = tokio::fs::read(src).await.map_err(|e| {
            Error::distribution(host, format!("failed to read {}: {}", src.display(), e))
        })?;
        let parent = Path::new(dst)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "/".to_string());
        let remote = format!(
            "mkdir -p {} && cat > {}",
            shell_escape(&parent),
            shell_escape(dst)
        );

        let mut child = Command::new(&self.ssh_bin)
            .args(self.build_ssh_args(host))
            .arg(remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&content).await?;
            stdin.flush().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::distribution(
                host,
                format!(
                    "failed to write {}: {}",
                    dst,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }

    async fn send_directory(&self, host: IpAddr, src: &Path, dst: &str) -> Result<()> {
        let ssh = std::iter::once(self.ssh_bin.display().to_string())
            .chain(self.build_ssh_args(host))
            .map(|a| shell_escape(&a))
            .collect::<Vec<_>>()
            .join(" ");
        let remote = format!(
            "mkdir -p {dst} && tar -C {dst} -xf -",
            dst = shell_escape(dst)
        );
        let pipeline = format!(
            "tar -C {} -cf - . | {} {}",
            shell_escape(&src.display().to_string()),
            ssh,
            shell_escape(&remote)
        );

        let output = Command::new("sh")
            .arg("-c")
            .arg(&pipeline)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::distribution(
                host,
                format!(
                    "failed to copy {} to {}: {}",
                    src.display(),
                    dst,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn cmd(&self, host: IpAddr, command: &str) -> Result<String> {
        let output = self.execute_shell(host, command).await?;
        if !output.status.success() {
            return Err(Error::command(
                host,
                command,
                format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn cmd_async(&self, host: IpAddr, commands: &[String]) -> Result<()> {
        for command in commands {
            let stdout = self.cmd(host, command).await?;
            if !stdout.trim().is_empty() {
                debug!(host = %host, "{}", stdout.trim_end());
            }
        }
        Ok(())
    }

    async fn copy(&self, host: IpAddr, src: &Path, dst: &str) -> Result<()> {
        let metadata = tokio::fs::metadata(src).await.map_err(|e| {
            Error::distribution(host, format!("failed to stat {}: {}", src.display(), e))
        })?;
        if metadata.is_dir() {
            self.send_directory(host, src, dst).await
        } else {
            self.write_file(host, src, dst).await
        }
    }

    async fn ping(&self, host: IpAddr) -> Result<()> {
        self.cmd(host, "true").await.map(|_| ())
    }

    fn username(&self, _host: IpAddr) -> String {
        self.config.user.clone()
    }
}

/// Escape a string for safe use in shell commands
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }

    if s.chars().all(|c| {
        c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | ':' | '=' | '@' | ',')
    }) {
        return s.to_string();
    }

    // End the quote, add an escaped quote, start a new quote
    let escaped = s.replace('\'', "'\"'\"'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_escape_passes_plain_words_through() {
        assert_eq!(shell_escape("/etc/kubernetes/pki"), "/etc/kubernetes/pki");
        assert_eq!(shell_escape("root@10.0.0.1"), "root@10.0.0.1");
        assert_eq!(shell_escape("StrictHostKeyChecking=no"), "StrictHostKeyChecking=no");
    }

    #[test]
    fn shell_escape_quotes_spaces_and_quotes() {
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn ssh_config_defaults_to_root_on_port_22() {
        let config: SshConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, SshConfig::default());
        assert_eq!(config.user, ROOT_USER);
        assert_eq!(config.port, 22);
    }
}
