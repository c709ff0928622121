//! Error types for cluster orchestration

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

/// Stage of a join/leave pipeline, used to report where a batch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    EnsureBootstrapConfig,
    WaitReachable,
    FetchJoinCredentials,
    DistributeStaticFiles,
    RenderAndSendJoinConfig,
    PatchKnownVersionQuirk,
    ExecuteJoin,
    InitMaster,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::EnsureBootstrapConfig => "ensure bootstrap config",
            Stage::WaitReachable => "wait reachable",
            Stage::FetchJoinCredentials => "fetch join credentials",
            Stage::DistributeStaticFiles => "distribute static files",
            Stage::RenderAndSendJoinConfig => "render and send join config",
            Stage::PatchKnownVersionQuirk => "patch known version quirk",
            Stage::ExecuteJoin => "execute join",
            Stage::InitMaster => "init master",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Main error type for kubeforge operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Host never answered the reachability probe
    #[error("host {host} unreachable after {attempts} attempt(s)")]
    UnreachableHost { host: IpAddr, attempts: u32 },

    /// upload-certs or token create output could not be parsed
    #[error("failed to fetch join credentials: {0}")]
    CredentialFetch(String),

    /// Copying or writing a file to a host failed
    #[error("failed to distribute files to {host}: {message}")]
    Distribution { host: IpAddr, message: String },

    /// Remote command returned a failure
    #[error("command on {host} failed: {message} (command: {command})")]
    CommandExecution {
        host: IpAddr,
        command: String,
        message: String,
    },

    /// Command role not known to the command builder
    #[error("unsupported role: {0}")]
    UnsupportedRole(String),

    /// Input or state failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A pipeline stage failed; wraps the underlying cause
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a credential fetch error with the given message
    pub fn credential_fetch(msg: impl Into<String>) -> Self {
        Self::CredentialFetch(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn distribution(host: IpAddr, msg: impl Into<String>) -> Self {
        Self::Distribution {
            host,
            message: msg.into(),
        }
    }

    pub fn command(host: IpAddr, command: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CommandExecution {
            host,
            command: command.into(),
            message: msg.into(),
        }
    }

    /// Wrap this error with the stage it occurred in
    pub fn at(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Stage the error was reported from, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error, skipping stage wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
