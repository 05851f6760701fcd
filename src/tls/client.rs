// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;
use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, SignatureScheme};

use super::verifier::DynamicServerVerifier;
use crate::authorizer::AuthorizationPolicy;
use crate::error::{Error, Result};
use crate::source::IdentitySource;

struct LiveClientResolver {
    source: Arc<IdentitySource>,
}

impl fmt::Debug for LiveClientResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveClientResolver").finish_non_exhaustive()
    }
}

impl ResolvesClientCert for LiveClientResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let svid = self.source.current_svid().ok()?;
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        let key = provider.key_provider.load_private_key(svid.key).ok()?;
        Some(Arc::new(CertifiedKey::new(svid.cert_chain, key)))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Build a client-side TLS configuration that always presents its own
/// current leaf certificate and verifies the server's certificate against
/// `source` and `policy` fresh on every handshake.
///
/// Always presents a client certificate (mutual auth); pins TLS 1.3.
pub async fn new_client_tls(
    source: Arc<IdentitySource>,
    policy: AuthorizationPolicy,
) -> Result<Arc<ClientConfig>> {
    let provider = super::crypto_provider();

    let verifier = Arc::new(DynamicServerVerifier::new(
        source.clone(),
        policy,
        provider.clone(),
    ));
    let resolver = Arc::new(LiveClientResolver { source });

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(super::TLS13_ONLY)
        .map_err(Error::Rustls)?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_cert_resolver(resolver);

    Ok(Arc::new(config))
}
