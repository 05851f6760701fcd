// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Canonicalization helpers on top of [`spiffe::SpiffeId`]/[`spiffe::TrustDomain`].
//!
//! SPIFFE ID equality here is byte-equal after lowercasing the trust domain
//! and leaving the path exact-case. We don't rely on the upstream crate's
//! own `PartialEq` for this (it isn't part of its public contract) and
//! instead canonicalize explicitly so the invariant holds regardless of how
//! `spiffe::SpiffeId` chooses to compare.

use spiffe::SpiffeId;

/// Render `id` as a canonical string: scheme and trust domain lowercased,
/// path preserved exactly.
#[must_use]
pub fn canonicalize(id: &SpiffeId) -> String {
    format!(
        "spiffe://{}{}",
        id.trust_domain().as_str().to_ascii_lowercase(),
        id.path()
    )
}

/// Byte-for-byte SPIFFE ID equality: trust domain compared case-
/// insensitively, path compared exact-case.
#[must_use]
pub fn ids_equal(a: &SpiffeId, b: &SpiffeId) -> bool {
    a.trust_domain()
        .as_str()
        .eq_ignore_ascii_case(b.trust_domain().as_str())
        && a.path() == b.path()
}

/// Case-insensitive trust-domain equality.
#[must_use]
pub fn trust_domains_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> SpiffeId {
        SpiffeId::try_from(s).expect("valid test SPIFFE ID")
    }

    #[test]
    fn canonicalize_lowercases_trust_domain_only() {
        let a = id("spiffe://Example.ORG/Service/A");
        assert_eq!(canonicalize(&a), "spiffe://example.org/Service/A");
    }

    #[test]
    fn ids_equal_is_case_insensitive_on_trust_domain_only() {
        let a = id("spiffe://example.org/svc");
        let b = id("spiffe://EXAMPLE.ORG/svc");
        let c = id("spiffe://example.org/SVC");
        assert!(ids_equal(&a, &b));
        assert!(!ids_equal(&a, &c));
    }

    #[test]
    fn parsed_id_has_nonempty_trust_domain() {
        let a = id("spiffe://example.org/svc");
        assert!(!a.trust_domain().as_str().is_empty());
    }

    #[test]
    fn format_then_parse_round_trips() {
        let a = id("spiffe://example.org/a/b/c");
        let formatted = canonicalize(&a);
        let reparsed = SpiffeId::try_from(formatted.as_str()).unwrap();
        assert!(ids_equal(&a, &reparsed));
    }
}
