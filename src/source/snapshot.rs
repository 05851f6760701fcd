// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The atomic unit of state the identity source publishes on every rotation.

use std::time::SystemTime;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use spiffe::{SpiffeId, TrustDomain, X509Context};

/// The workload's own X.509-SVID, converted once on receipt into the
/// `rustls`-ready shape the TLS builders need on every handshake.
#[derive(Clone)]
pub(crate) struct Svid {
    pub spiffe_id: SpiffeId,
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub not_after: SystemTime,
}

/// One immutable, atomically-published view of the workload's SVID and
/// trust bundles, as received from the Workload API.
pub(crate) struct Snapshot {
    pub svid: Svid,
    pub context: X509Context,
}

impl Snapshot {
    pub fn from_context(context: X509Context) -> Option<Self> {
        let svid = context.default_svid()?;
        let cert_chain: Vec<CertificateDer<'static>> = svid
            .cert_chain()
            .iter()
            .map(|c| CertificateDer::from(c.content().to_owned()))
            .collect();
        let leaf = cert_chain.first()?;
        let not_after = crate::san::not_after(leaf).ok()?;
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(
            svid.private_key().content().to_owned(),
        ));
        Some(Self {
            svid: Svid {
                spiffe_id: svid.spiffe_id().clone(),
                cert_chain,
                key,
                not_after,
            },
            context,
        })
    }

    /// Root certificates for `trust_domain`, or `None` if the source has no
    /// bundle for it.
    pub fn roots_for(&self, trust_domain: &TrustDomain) -> Option<Vec<CertificateDer<'static>>> {
        let bundle = self.context.bundle_set().get_bundle(trust_domain)?;
        Some(
            bundle
                .authorities()
                .iter()
                .map(|c| CertificateDer::from(c.content().to_owned()))
                .collect(),
        )
    }
}
