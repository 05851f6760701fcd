// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The peer authorization policy applied after X.509 chain verification.
//!
//! An [`AuthorizationPolicy`] is a pure predicate over a verified peer
//! SPIFFE ID: no I/O, no allocation of secrets, deterministic.

use spiffe::{SpiffeId, TrustDomain};

use crate::spiffe_id;

/// The peer-identity rule applied after X.509 chain verification.
///
/// Exactly one variant is ever constructed for a given role (client-side
/// policy for servers, server-side policy for clients); the config
/// validator enforces this at parse time, not here, by mapping each
/// record's mutually-exclusive fields onto exactly one of these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationPolicy {
    /// The peer must present this exact SPIFFE ID.
    AllowId(SpiffeId),
    /// The peer's SPIFFE ID must carry this trust domain.
    AllowTrustDomain(TrustDomain),
}

/// Why a peer identity failed authorization. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The peer's SPIFFE ID did not match the required exact identity.
    #[error("peer id {peer} does not match required id {required}")]
    IdMismatch {
        /// The peer's canonicalized SPIFFE ID.
        peer: String,
        /// The required SPIFFE ID.
        required: String,
    },
    /// The peer's trust domain did not match the required trust domain.
    #[error("peer trust domain {peer} does not match required trust domain {required}")]
    TrustDomainMismatch {
        /// The peer's trust domain.
        peer: String,
        /// The required trust domain.
        required: String,
    },
}

impl AuthorizationPolicy {
    /// Decide whether `peer` is acceptable under this policy.
    ///
    /// Depends only on `peer`'s canonicalized SPIFFE ID and this policy's
    /// single set field: no I/O, no side effects.
    pub fn authorize(&self, peer: &SpiffeId) -> Result<(), Rejection> {
        match self {
            Self::AllowId(required) => {
                if spiffe_id::ids_equal(required, peer) {
                    Ok(())
                } else {
                    Err(Rejection::IdMismatch {
                        peer: spiffe_id::canonicalize(peer),
                        required: spiffe_id::canonicalize(required),
                    })
                }
            }
            Self::AllowTrustDomain(required) => {
                if spiffe_id::trust_domains_equal(required.as_str(), peer.trust_domain().as_str())
                {
                    Ok(())
                } else {
                    Err(Rejection::TrustDomainMismatch {
                        peer: peer.trust_domain().as_str().to_ascii_lowercase(),
                        required: required.as_str().to_ascii_lowercase(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> SpiffeId {
        SpiffeId::try_from(s).expect("valid test SPIFFE ID")
    }

    fn td(s: &str) -> TrustDomain {
        TrustDomain::try_from(s).expect("valid test trust domain")
    }

    #[test]
    fn allow_id_accepts_exact_match_case_insensitive_trust_domain() {
        let policy = AuthorizationPolicy::AllowId(id("spiffe://Example.org/svc-a"));
        assert!(policy.authorize(&id("spiffe://example.ORG/svc-a")).is_ok());
    }

    #[test]
    fn allow_id_rejects_different_path() {
        let policy = AuthorizationPolicy::AllowId(id("spiffe://example.org/svc-a"));
        assert!(policy.authorize(&id("spiffe://example.org/svc-b")).is_err());
    }

    #[test]
    fn allow_trust_domain_accepts_any_path_in_domain() {
        let policy = AuthorizationPolicy::AllowTrustDomain(td("example.org"));
        assert!(policy.authorize(&id("spiffe://example.org/a")).is_ok());
        assert!(policy.authorize(&id("spiffe://example.org/b/c")).is_ok());
    }

    #[test]
    fn allow_trust_domain_rejects_other_domain() {
        let policy = AuthorizationPolicy::AllowTrustDomain(td("example.org"));
        assert!(policy.authorize(&id("spiffe://other.org/a")).is_err());
    }

    #[test]
    fn authorize_is_deterministic() {
        let policy = AuthorizationPolicy::AllowTrustDomain(td("example.org"));
        let peer = id("spiffe://example.org/a");
        let first = policy.authorize(&peer);
        let second = policy.authorize(&peer);
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
