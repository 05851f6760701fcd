// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The error taxonomy shared across the crate.

use thiserror::Error;

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure mode this crate can surface, grouped by the phase of the
/// identity/mTLS lifecycle that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// An [`crate::authorizer::AuthorizationPolicy`] had zero or two of its
    /// variant-selecting fields set.
    #[error("authorization policy must have exactly one variant set")]
    InvalidPolicy,

    /// `allowed_peer_id` did not parse as a valid SPIFFE ID.
    #[error("invalid peer SPIFFE ID: {0}")]
    InvalidPeerId(String),

    /// `allowed_peer_trust_domain` did not parse as a valid trust domain.
    #[error("invalid trust domain: {0}")]
    InvalidTrustDomain(String),

    /// `initial_fetch_timeout` was present but not a strictly positive
    /// duration.
    #[error("initial_fetch_timeout must be a positive duration")]
    InvalidTimeout,

    /// `workload_socket` was empty after trimming whitespace.
    #[error("workload_socket must not be empty")]
    InvalidWorkloadSocket,

    /// The Workload API endpoint could not be reached or the connection was
    /// lost with no prior good snapshot to fall back on.
    #[error("workload API unavailable: {0}")]
    SourceUnavailable(String),

    /// `open` did not receive a first SVID/bundle pair before its timeout
    /// elapsed.
    #[error("timed out waiting for the first Workload API response")]
    InitialFetchTimeout,

    /// `open` (or its subscription wait) was cancelled by the caller.
    #[error("operation canceled")]
    Canceled,

    /// `current_bundle` was asked for a trust domain the source has no
    /// roots for.
    #[error("no trust bundle known for trust domain {0}")]
    BundleUnknown(String),

    /// An accessor was called after `close()`.
    #[error("identity source is closed")]
    SourceClosed,

    /// The peer's leaf certificate had zero or multiple URI SANs, or its
    /// single URI SAN was not a well-formed SPIFFE ID.
    #[error("peer certificate does not carry exactly one SPIFFE SAN")]
    InvalidPeerIdentity,

    /// Standard X.509 chain verification against the source's trust bundle
    /// failed.
    #[error("certificate chain verification failed: {0}")]
    ChainVerificationFailed(String),

    /// The Authorizer rejected an otherwise-valid peer identity.
    #[error("peer {0} rejected by authorization policy")]
    PolicyRejected(String),

    /// The facade's listen/bind probe failed.
    #[error("failed to bind listener: {0}")]
    BindFailed(String),

    /// Wrapped `rustls` configuration error.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    /// Wrapped Workload API transport error.
    #[error(transparent)]
    Grpc(#[from] spiffe::error::GrpcClientError),

    /// Wrapped I/O error (listener bind, socket path handling, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wrapped config-record deserialization error.
    #[cfg(feature = "config")]
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}
