// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Extract the verified peer identity from a completed TLS handshake, and
//! bind it to an in-flight request so handlers can read it back out.
//!
//! By the time a handshake completes, [`crate::tls::verifier`] has already
//! run chain verification and authorization on the peer's leaf certificate;
//! a [`Peer`] only ever exists for a connection that passed both, so
//! extraction here is a pure re-read of already-verified state rather than
//! a second check.

use std::time::SystemTime;

use rustls::pki_types::CertificateDer;
use spiffe::SpiffeId;
use tokio_rustls::{client, server};

use crate::error::{Error, Result};
use crate::san;

/// The verified identity of the far end of an mTLS connection.
#[derive(Debug, Clone)]
pub struct Peer {
    /// The peer's SPIFFE ID, as carried in its leaf certificate's URI SAN.
    pub spiffe_id: SpiffeId,
    /// `NotAfter` of the peer's leaf certificate at the time it was
    /// presented. Doesn't update if the peer's SVID rotates mid-connection.
    pub not_after: SystemTime,
}

fn peer_from_leaf(leaf: &CertificateDer<'_>) -> Result<Peer> {
    let spiffe_id = san::spiffe_id_from_leaf(leaf).map_err(|_| Error::InvalidPeerIdentity)?;
    let not_after = san::not_after(leaf).map_err(|_| Error::InvalidPeerIdentity)?;
    Ok(Peer { spiffe_id, not_after })
}

/// Extract the [`Peer`] from the client side of a completed server-side TLS
/// handshake (i.e. the server's view of its connecting client).
pub fn peer_from_connection<IO>(stream: &server::TlsStream<IO>) -> Result<Peer> {
    let (_, state) = stream.get_ref();
    let certs = state.peer_certificates().ok_or(Error::InvalidPeerIdentity)?;
    let leaf = certs.first().ok_or(Error::InvalidPeerIdentity)?;
    peer_from_leaf(leaf)
}

/// Extract the [`Peer`] from the server side of a completed client-side TLS
/// handshake (i.e. the client's view of the server it connected to).
pub fn peer_from_client_connection<IO>(stream: &client::TlsStream<IO>) -> Result<Peer> {
    let (_, state) = stream.get_ref();
    let certs = state.peer_certificates().ok_or(Error::InvalidPeerIdentity)?;
    let leaf = certs.first().ok_or(Error::InvalidPeerIdentity)?;
    peer_from_leaf(leaf)
}

#[cfg(feature = "facade")]
mod request_binding {
    use super::Peer;
    use std::sync::Arc;

    /// Attach `peer` to `request`'s extensions so handlers can retrieve it
    /// with [`peer_from_request`].
    pub fn attach_peer<B>(request: &mut axum::http::Request<B>, peer: Peer) {
        request.extensions_mut().insert(Arc::new(peer));
    }

    /// Read back the [`Peer`] a prior [`attach_peer`] call bound to this
    /// request, if any.
    #[must_use]
    pub fn peer_from_request<B>(request: &axum::http::Request<B>) -> Option<Arc<Peer>> {
        request.extensions().get::<Arc<Peer>>().cloned()
    }

    /// Convenience: the peer's SPIFFE ID only, as a string.
    #[must_use]
    pub fn peer_id_from_request<B>(request: &axum::http::Request<B>) -> Option<String> {
        peer_from_request(request).map(|p| crate::spiffe_id::canonicalize(&p.spiffe_id))
    }
}

#[cfg(feature = "facade")]
pub use request_binding::{attach_peer, peer_from_request, peer_id_from_request};
