// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Dynamic peer verifiers: extract a SPIFFE ID from the peer's leaf, fetch
//! the matching trust bundle from the identity source at that instant, run
//! standard X.509 chain verification against it, then apply the
//! authorization policy. Every step runs fresh on each handshake; nothing
//! about the peer or the roots is cached across connections.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, ParsedCertificate};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, Error as TlsError, RootCertStore, SignatureScheme};

use crate::authorizer::{AuthorizationPolicy, Rejection};
use crate::error::Error as CrateError;
use crate::san;
use crate::source::IdentitySource;

fn reject(rejection: &Rejection) -> TlsError {
    TlsError::General(CrateError::PolicyRejected(rejection.to_string()).to_string())
}

fn invalid_identity(reason: &str) -> TlsError {
    TlsError::General(format!("peer certificate does not carry a valid SPIFFE identity: {reason}"))
}

fn unknown_bundle(trust_domain: &str) -> TlsError {
    TlsError::General(format!("no trust bundle known for trust domain {trust_domain}"))
}

fn chain_verification_failed(e: TlsError) -> TlsError {
    TlsError::General(CrateError::ChainVerificationFailed(e.to_string()).to_string())
}

fn roots_store(roots: Vec<CertificateDer<'static>>) -> Result<Arc<RootCertStore>, TlsError> {
    let mut store = RootCertStore::empty();
    for root in roots {
        store.add(root)?;
    }
    Ok(Arc::new(store))
}

/// Verifies a client's presented certificate chain during a server-side
/// handshake, then checks the resulting SPIFFE ID against the given
/// authorization policy.
pub(super) struct DynamicClientVerifier {
    source: Arc<IdentitySource>,
    policy: AuthorizationPolicy,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for DynamicClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicClientVerifier").finish_non_exhaustive()
    }
}

impl DynamicClientVerifier {
    pub(super) fn new(
        source: Arc<IdentitySource>,
        policy: AuthorizationPolicy,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self { source, policy, provider }
    }
}

impl ClientCertVerifier for DynamicClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, TlsError> {
        let peer_id = san::spiffe_id_from_leaf(end_entity)
            .map_err(|e| invalid_identity(&format!("{e:?}")))?;

        let roots = self
            .source
            .current_bundle(peer_id.trust_domain())
            .map_err(|_| unknown_bundle(peer_id.trust_domain().as_str()))?;
        let store = roots_store(roots)?;

        let inner = WebPkiClientVerifier::builder_with_provider(store, self.provider.clone())
            .build()
            .map_err(|e| TlsError::General(format!("failed to build chain verifier: {e}")))?;
        inner
            .verify_client_cert(end_entity, intermediates, now)
            .map_err(chain_verification_failed)?;

        self.policy.authorize(&peer_id).map_err(|e| reject(&e))?;

        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Verifies a server's presented certificate chain during a client-side
/// handshake, then checks the resulting SPIFFE ID against the given
/// authorization policy. SNI/`server_name` is ignored: identity comes from
/// the SPIFFE SAN, not the hostname.
pub(super) struct DynamicServerVerifier {
    source: Arc<IdentitySource>,
    policy: AuthorizationPolicy,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for DynamicServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicServerVerifier").finish_non_exhaustive()
    }
}

impl DynamicServerVerifier {
    pub(super) fn new(
        source: Arc<IdentitySource>,
        policy: AuthorizationPolicy,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self { source, policy, provider }
    }
}

impl ServerCertVerifier for DynamicServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        // Chain-only: SPIFFE leaves carry a URI SAN, not a DNS name, so
        // standard hostname verification against `server_name` would reject
        // every otherwise-valid peer. Identity comes from the SPIFFE SAN and
        // the policy check below, not from SNI.
        let peer_id = san::spiffe_id_from_leaf(end_entity)
            .map_err(|e| invalid_identity(&format!("{e:?}")))?;

        let roots = self
            .source
            .current_bundle(peer_id.trust_domain())
            .map_err(|_| unknown_bundle(peer_id.trust_domain().as_str()))?;
        let store = roots_store(roots)?;

        let cert = ParsedCertificate::try_from(end_entity).map_err(chain_verification_failed)?;
        verify_server_cert_signed_by_trust_anchor(&cert, &store, intermediates, now)
            .map_err(chain_verification_failed)?;

        self.policy.authorize(&peer_id).map_err(|e| reject(&e))?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
