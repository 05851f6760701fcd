// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Extract the single SPIFFE URI SAN from a leaf certificate.
//!
//! Shared by the per-handshake TLS verifiers (`src/tls/verifier.rs`) and the
//! peer extraction step (`src/peer.rs`).

use rustls::pki_types::CertificateDer;
use spiffe::SpiffeId;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// A leaf with no URI SAN, more than one URI SAN, or a URI SAN that isn't a
/// well-formed SPIFFE ID is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanError {
    /// The certificate failed to parse as X.509.
    Unparsable,
    /// No Subject Alternative Name extension, or no URI entries in it.
    Missing,
    /// More than one URI SAN was present.
    Multiple,
    /// Exactly one URI SAN was present but it wasn't a valid SPIFFE ID.
    NotSpiffe,
}

/// Extract the single SPIFFE URI SAN from `leaf`.
///
/// Returns `Err` for zero or multiple URI SANs, or a URI SAN that isn't a
/// parseable SPIFFE ID.
pub fn spiffe_id_from_leaf(leaf: &CertificateDer<'_>) -> Result<SpiffeId, SanError> {
    let (_, cert) = X509Certificate::from_der(leaf).map_err(|_| SanError::Unparsable)?;

    let san = cert
        .subject_alternative_name()
        .map_err(|_| SanError::Unparsable)?
        .ok_or(SanError::Missing)?;

    let mut uris = san.value.general_names.iter().filter_map(|gn| match gn {
        GeneralName::URI(uri) => Some(*uri),
        _ => None,
    });

    let first = uris.next().ok_or(SanError::Missing)?;
    if uris.next().is_some() {
        return Err(SanError::Multiple);
    }

    SpiffeId::try_from(first).map_err(|_| SanError::NotSpiffe)
}

/// `NotAfter` of `leaf`, as a [`std::time::SystemTime`].
pub fn not_after(leaf: &CertificateDer<'_>) -> Result<std::time::SystemTime, SanError> {
    let (_, cert) = X509Certificate::from_der(leaf).map_err(|_| SanError::Unparsable)?;
    let not_after = cert.validity().not_after;
    let unix = not_after.timestamp();
    Ok(std::time::UNIX_EPOCH + std::time::Duration::from_secs(unix.max(0) as u64))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair, SanType};

    fn cert_with_sans(uris: &[&str]) -> CertificateDer<'static> {
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.subject_alt_names = uris
            .iter()
            .map(|u| SanType::URI(u.to_string().try_into().unwrap()))
            .collect();
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        cert.der().clone()
    }

    #[test]
    fn extracts_single_spiffe_uri_san() {
        let der = cert_with_sans(&["spiffe://example.org/svc"]);
        let id = spiffe_id_from_leaf(&der).expect("should extract");
        assert_eq!(id.trust_domain().as_str(), "example.org");
    }

    #[test]
    fn rejects_zero_uri_sans() {
        let der = cert_with_sans(&[]);
        assert_eq!(spiffe_id_from_leaf(&der), Err(SanError::Missing));
    }

    #[test]
    fn rejects_multiple_uri_sans() {
        let der = cert_with_sans(&["spiffe://example.org/a", "spiffe://example.org/b"]);
        assert_eq!(spiffe_id_from_leaf(&der), Err(SanError::Multiple));
    }

    #[test]
    fn rejects_non_spiffe_uri_san() {
        let der = cert_with_sans(&["https://example.org/not-spiffe"]);
        assert_eq!(spiffe_id_from_leaf(&der), Err(SanError::NotSpiffe));
    }
}
