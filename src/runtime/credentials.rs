//! Join credentials fetched from master0
//!
//! Both outputs are parsed before anything is returned, so a caller either
//! gets a full set of credentials or none at all.

use std::fmt;

use crate::error::{Error, Result};
use crate::runtime::version::CommandFamily;

const CERTIFICATE_KEY_MARKER: &str = "Using certificate key:";

/// Bootstrap token, CA hash and (for control-plane joins) certificate key
#[derive(Clone, Default, PartialEq, Eq)]
pub struct JoinCredentials {
    pub token: String,
    pub ca_cert_hash: String,
    pub certificate_key: String,
}

// Token and key are secrets; keep them out of debug logs
impl fmt::Debug for JoinCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredentials")
            .field("token", &redact(&self.token))
            .field("ca_cert_hash", &self.ca_cert_hash)
            .field("certificate_key", &redact(&self.certificate_key))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}

/// Re-upload control-plane certificates and print the key that decrypts them
pub fn upload_certs_command(family: CommandFamily, vlog: u8) -> String {
    let flag = match family {
        CommandFamily::ExplicitFlags => "--experimental-upload-certs",
        CommandFamily::ConfigFile => "--upload-certs",
    };
    format!("kubeadm init phase upload-certs {} -v {}", flag, vlog)
}

pub fn token_create_command(vlog: u8) -> String {
    format!("kubeadm token create --print-join-command -v {}", vlog)
}

/// Extract the certificate key from `upload-certs` output.
///
/// The output must contain the marker exactly once; the key is the first
/// whitespace-separated token after it.
pub fn parse_certificate_key(output: &str) -> Result<String> {
    let segments: Vec<&str> = output.split(CERTIFICATE_KEY_MARKER).collect();
    if segments.len() != 2 {
        return Err(Error::credential_fetch(format!(
            "expected one '{}' marker in upload-certs output, found {}",
            CERTIFICATE_KEY_MARKER,
            segments.len().saturating_sub(1)
        )));
    }

    segments[1]
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| Error::credential_fetch("certificate key missing after marker"))
}

/// Extract token and CA cert hash from `kubeadm token create --print-join-command`
pub fn parse_join_command(output: &str) -> Result<(String, String)> {
    let join_line = output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("kubeadm join"))
        .ok_or_else(|| Error::credential_fetch("no 'kubeadm join' line in token create output"))?;

    let mut token = None;
    let mut ca_cert_hash = None;
    let mut words = join_line.split_whitespace();
    while let Some(word) = words.next() {
        match word {
            "--token" => token = words.next(),
            "--discovery-token-ca-cert-hash" => ca_cert_hash = words.next(),
            _ => {}
        }
    }

    match (token, ca_cert_hash) {
        (Some(token), Some(hash)) => Ok((token.to_string(), hash.to_string())),
        (None, _) => Err(Error::credential_fetch("join command has no --token value")),
        (_, None) => Err(Error::credential_fetch(
            "join command has no --discovery-token-ca-cert-hash value",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPLOAD_CERTS: &str = "I0415 11:45:06.653868   14520 version.go:251] remote version is much newer: v1.21.0; falling back to: stable-1.16\r\n\
[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace\r\n\
[upload-certs] Using certificate key:\r\n\
8376c70aaaf285b764b3c1a588740728aff493d7c2239684e84a7367c6a437cf\r\n";

    const TOKEN_CREATE: &str = "I0415 11:45:07.1 14530 token.go:120] validating\n\
kubeadm join apiserver.cluster.local:6443 --token ryatmx.x8bhszh1cy9yvj7u     --discovery-token-ca-cert-hash sha256:9f3a2c \n";

    #[test]
    fn certificate_key_has_no_line_breaks() {
        let key = parse_certificate_key(UPLOAD_CERTS).unwrap();
        assert_eq!(
            key,
            "8376c70aaaf285b764b3c1a588740728aff493d7c2239684e84a7367c6a437cf"
        );
        assert!(!key.contains('\n') && !key.contains('\r'));
        assert_eq!(parse_certificate_key(UPLOAD_CERTS).unwrap(), key);
    }

    #[test]
    fn missing_or_repeated_marker_is_fatal() {
        let err = parse_certificate_key("[upload-certs] Storing the certificates").unwrap_err();
        assert!(matches!(err, Error::CredentialFetch(_)));

        let doubled = format!("{}{}", UPLOAD_CERTS, UPLOAD_CERTS);
        assert!(parse_certificate_key(&doubled).is_err());
    }

    #[test]
    fn marker_without_key_is_fatal() {
        assert!(parse_certificate_key("[upload-certs] Using certificate key:\n\n").is_err());
    }

    #[test]
    fn join_command_yields_token_and_hash() {
        let (token, hash) = parse_join_command(TOKEN_CREATE).unwrap();
        assert_eq!(token, "ryatmx.x8bhszh1cy9yvj7u");
        assert_eq!(hash, "sha256:9f3a2c");
    }

    #[test]
    fn join_command_without_hash_is_rejected() {
        let err = parse_join_command("kubeadm join 10.0.0.1:6443 --token abc.def").unwrap_err();
        assert!(err.to_string().contains("ca-cert-hash"));
        assert!(parse_join_command("error: token create failed").is_err());
    }

    #[test]
    fn upload_certs_flag_follows_command_family() {
        assert_eq!(
            upload_certs_command(CommandFamily::ConfigFile, 0),
            "kubeadm init phase upload-certs --upload-certs -v 0"
        );
        assert!(upload_certs_command(CommandFamily::ExplicitFlags, 4)
            .contains("--experimental-upload-certs -v 4"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = JoinCredentials {
            token: "abc.def".into(),
            ca_cert_hash: "sha256:1".into(),
            certificate_key: String::new(),
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("abc.def"));
        assert!(rendered.contains("<unset>"));
    }
}
