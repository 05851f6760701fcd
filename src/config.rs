// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Parses and validates the wire config record into a `(SourceConfig,
//! AuthorizationPolicy)` pair per role. Loading the record from YAML is the
//! only I/O this module performs; `validate_*` itself does none.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spiffe::{SpiffeId, TrustDomain};

use crate::authorizer::AuthorizationPolicy;
use crate::error::{Error, Result};
use crate::source::SourceConfig;

const DEFAULT_INITIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// The config record this crate consumes. Parsing (YAML → this struct) is a
/// collaborator, not core; `validate_server`/`validate_client` do the actual
/// semantic checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workload API connection settings.
    pub spire: SpireSection,
    /// Present when this process runs as a server; required by
    /// [`validate_server`].
    #[serde(default)]
    pub server: Option<ServerSection>,
    /// Present when this process runs as a client; required by
    /// [`validate_client`].
    #[serde(default)]
    pub client: Option<ClientSection>,
}

/// The `spire:` section: how to reach the Workload API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpireSection {
    /// Connection string for the Workload API endpoint, e.g. a local
    /// UNIX-domain socket path.
    pub workload_socket: String,
    /// How long to wait for the first SVID/bundle pair. Defaults to 30s.
    #[serde(default, with = "humantime_serde::option")]
    pub initial_fetch_timeout: Option<Duration>,
}

/// The `server:` section: listen address and client authorization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to bind the HTTP listener to, e.g. `127.0.0.1:8443`.
    pub listen_addr: String,
    /// Exact SPIFFE ID the connecting client must present. Mutually
    /// exclusive with `allowed_client_trust_domain`.
    #[serde(default)]
    pub allowed_client_spiffe_id: Option<String>,
    /// Trust domain the connecting client's SPIFFE ID must carry. Mutually
    /// exclusive with `allowed_client_spiffe_id`.
    #[serde(default)]
    pub allowed_client_trust_domain: Option<String>,
}

/// The `client:` section: the expected server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Exact SPIFFE ID the connected server must present. Mutually
    /// exclusive with `expected_server_trust_domain`.
    #[serde(default)]
    pub expected_server_spiffe_id: Option<String>,
    /// Trust domain the connected server's SPIFFE ID must carry. Mutually
    /// exclusive with `expected_server_spiffe_id`.
    #[serde(default)]
    pub expected_server_trust_domain: Option<String>,
}

impl Config {
    /// Load and parse a config record from a YAML document. Parsing alone;
    /// callers still need `validate_server`/`validate_client`.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

fn trimmed(s: &str) -> &str {
    s.trim()
}

fn source_config(spire: &SpireSection) -> Result<SourceConfig> {
    let endpoint = trimmed(&spire.workload_socket);
    if endpoint.is_empty() {
        return Err(Error::InvalidWorkloadSocket);
    }
    let initial_fetch_timeout = match spire.initial_fetch_timeout {
        None => DEFAULT_INITIAL_FETCH_TIMEOUT,
        Some(d) if d.is_zero() => return Err(Error::InvalidTimeout),
        Some(d) => d,
    };
    Ok(SourceConfig {
        workload_socket_endpoint: endpoint.to_string(),
        initial_fetch_timeout,
    })
}

fn exactly_one_policy(
    allowed_id: Option<&str>,
    allowed_trust_domain: Option<&str>,
) -> Result<AuthorizationPolicy> {
    let id = allowed_id.map(trimmed).filter(|s| !s.is_empty());
    let trust_domain = allowed_trust_domain.map(trimmed).filter(|s| !s.is_empty());

    match (id, trust_domain) {
        (Some(id), None) => {
            let parsed = SpiffeId::try_from(id).map_err(|_| Error::InvalidPeerId(id.to_string()))?;
            Ok(AuthorizationPolicy::AllowId(parsed))
        }
        (None, Some(td)) => {
            let parsed =
                TrustDomain::try_from(td).map_err(|_| Error::InvalidTrustDomain(td.to_string()))?;
            Ok(AuthorizationPolicy::AllowTrustDomain(parsed))
        }
        (None, None) | (Some(_), Some(_)) => Err(Error::InvalidPolicy),
    }
}

/// Validate `config` for the server role: requires a `server` section with
/// a non-empty `listen_addr` and exactly one of `allowed_client_spiffe_id` /
/// `allowed_client_trust_domain`.
pub fn validate_server(config: &Config) -> Result<(SourceConfig, AuthorizationPolicy, String)> {
    let server = config
        .server
        .as_ref()
        .ok_or_else(|| Error::InvalidPolicy)?;

    let listen_addr = trimmed(&server.listen_addr).to_string();
    if listen_addr.is_empty() {
        return Err(Error::InvalidPolicy);
    }

    let source = source_config(&config.spire)?;
    let policy = exactly_one_policy(
        server.allowed_client_spiffe_id.as_deref(),
        server.allowed_client_trust_domain.as_deref(),
    )?;

    Ok((source, policy, listen_addr))
}

/// Validate `config` for the client role: requires a `client` section with
/// exactly one of `expected_server_spiffe_id` /
/// `expected_server_trust_domain`.
pub fn validate_client(config: &Config) -> Result<(SourceConfig, AuthorizationPolicy)> {
    let client = config
        .client
        .as_ref()
        .ok_or_else(|| Error::InvalidPolicy)?;

    let source = source_config(&config.spire)?;
    let policy = exactly_one_policy(
        client.expected_server_spiffe_id.as_deref(),
        client.expected_server_trust_domain.as_deref(),
    )?;

    Ok((source, policy))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn yaml(body: &str) -> Config {
        Config::from_yaml(body).expect("valid test config")
    }

    #[test]
    fn validate_server_accepts_trust_domain_policy() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
server:
  listen_addr: "127.0.0.1:0"
  allowed_client_trust_domain: "  example.org  "
"#,
        );
        let (source, policy, listen_addr) = validate_server(&config).expect("should validate");
        assert_eq!(source.initial_fetch_timeout, DEFAULT_INITIAL_FETCH_TIMEOUT);
        assert_eq!(listen_addr, "127.0.0.1:0");
        assert!(matches!(policy, AuthorizationPolicy::AllowTrustDomain(_)));
    }

    #[test]
    fn validate_server_rejects_both_policy_fields_set() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
server:
  listen_addr: "127.0.0.1:0"
  allowed_client_spiffe_id: "spiffe://example.org/a"
  allowed_client_trust_domain: "example.org"
"#,
        );
        assert!(matches!(validate_server(&config), Err(Error::InvalidPolicy)));
    }

    #[test]
    fn validate_server_rejects_neither_policy_field_set() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
server:
  listen_addr: "127.0.0.1:0"
"#,
        );
        assert!(matches!(validate_server(&config), Err(Error::InvalidPolicy)));
    }

    #[test]
    fn validate_server_rejects_zero_initial_fetch_timeout() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
  initial_fetch_timeout: 0s
server:
  listen_addr: "127.0.0.1:0"
  allowed_client_trust_domain: "example.org"
"#,
        );
        assert!(matches!(validate_server(&config), Err(Error::InvalidTimeout)));
    }

    #[test]
    fn validate_server_rejects_empty_workload_socket() {
        let config = yaml(
            r#"
spire:
  workload_socket: "   "
server:
  listen_addr: "127.0.0.1:0"
  allowed_client_trust_domain: "example.org"
"#,
        );
        assert!(matches!(
            validate_server(&config),
            Err(Error::InvalidWorkloadSocket)
        ));
    }

    #[test]
    fn validate_client_rejects_malformed_spiffe_id() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
client:
  expected_server_spiffe_id: "not-a-spiffe-id"
"#,
        );
        assert!(matches!(validate_client(&config), Err(Error::InvalidPeerId(_))));
    }

    #[test]
    fn validate_is_idempotent_under_reserialization() {
        let config = yaml(
            r#"
spire:
  workload_socket: unix:///tmp/agent.sock
client:
  expected_server_trust_domain: "Example.ORG"
"#,
        );
        let (_, first) = validate_client(&config).expect("should validate");
        let reserialized = serde_yaml::to_string(&config).expect("reserialize");
        let reparsed = Config::from_yaml(&reserialized).expect("reparse");
        let (_, second) = validate_client(&reparsed).expect("should validate");
        assert_eq!(first, second);
    }
}
