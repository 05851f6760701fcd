// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::fmt;
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use super::verifier::DynamicClientVerifier;
use crate::authorizer::AuthorizationPolicy;
use crate::error::{Error, Result};
use crate::source::IdentitySource;

struct LiveServerResolver {
    source: Arc<IdentitySource>,
}

impl fmt::Debug for LiveServerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveServerResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for LiveServerResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let svid = self.source.current_svid().ok()?;
        let provider = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
        let key = provider.key_provider.load_private_key(svid.key).ok()?;
        Some(Arc::new(CertifiedKey::new(svid.cert_chain, key)))
    }
}

/// Build a server-side TLS configuration that resolves its own leaf
/// certificate and verifies incoming client certificates against `source`
/// and `policy` fresh on every handshake.
///
/// Requires and verifies client certificates; pins TLS 1.3.
pub async fn new_server_tls(
    source: Arc<IdentitySource>,
    policy: AuthorizationPolicy,
) -> Result<Arc<ServerConfig>> {
    let provider = super::crypto_provider();

    let verifier = Arc::new(DynamicClientVerifier::new(
        source.clone(),
        policy,
        provider.clone(),
    ));
    let resolver = Arc::new(LiveServerResolver { source });

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(super::TLS13_ONLY)
        .map_err(Error::Rustls)?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(resolver);

    Ok(Arc::new(config))
}
