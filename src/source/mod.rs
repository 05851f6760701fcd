// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! A live, rotating view of the workload's own X.509-SVID and trust bundle,
//! sourced from the SPIFFE Workload API.

mod snapshot;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use spiffe::error::GrpcClientError;
use spiffe::{SpiffeId, TrustDomain, WorkloadApiClient, X509Context};
use tokio::sync::{watch, OnceCell};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::error::{Error, Result};
use snapshot::Snapshot;

const UNIX_PREFIX: &str = "unix://";
const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

type X509Stream = Pin<Box<dyn Stream<Item = std::result::Result<X509Context, GrpcClientError>> + Send>>;

/// Configuration needed to open an [`IdentitySource`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Connection string for the Workload API endpoint (typically a local
    /// UNIX-domain socket).
    pub workload_socket_endpoint: String,
    /// How long `open` waits for the first SVID/bundle pair before failing
    /// with [`Error::InitialFetchTimeout`].
    pub initial_fetch_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            workload_socket_endpoint: String::new(),
            initial_fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// A leaf certificate, its chain and private key, as handed to the TLS
/// stack for the local end of a handshake.
pub struct LocalSvid {
    /// The workload's own SPIFFE ID.
    pub spiffe_id: SpiffeId,
    /// Leaf certificate followed by any intermediates, in `rustls` order.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key matching the leaf certificate.
    pub key: PrivateKeyDer<'static>,
}

/// A live, rotating view of the workload's own SVID and trust bundle.
///
/// Accessors are safe for concurrent readers: snapshots are published via a
/// [`tokio::sync::watch`] channel, so a reader never blocks a writer beyond
/// a single pointer load. `close` is serialized by a once-guard so
/// double-close is a no-op.
pub struct IdentitySource {
    rx: watch::Receiver<Arc<Snapshot>>,
    /// Source-owned shutdown signal, independent of whatever cancellation
    /// handle the caller passed to `open` (that one only bounds the
    /// first-fetch wait).
    shutdown: CancellationToken,
    closed: OnceCell<()>,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl IdentitySource {
    /// Connect to the Workload API at `config.workload_socket_endpoint`,
    /// subscribe to updates, and block until the first SVID+bundle pair
    /// arrives or `config.initial_fetch_timeout` elapses, whichever comes
    /// first.
    ///
    /// `cancel` bounds this call only: canceling it while `open` is waiting
    /// returns [`Error::Canceled`] rather than [`Error::InitialFetchTimeout`].
    /// It has no effect on the source once `open` returns.
    pub async fn open(config: &SourceConfig, cancel: CancellationToken) -> Result<Self> {
        if config.initial_fetch_timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }

        let address = normalize_endpoint(&config.workload_socket_endpoint);
        let mut stream = open_stream(&address).await?;

        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Canceled),
            () = tokio::time::sleep(config.initial_fetch_timeout) => return Err(Error::InitialFetchTimeout),
            item = stream.next() => item,
        };

        let first_context = match first {
            Some(Ok(ctx)) => ctx,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::SourceUnavailable("workload API stream closed".into())),
        };
        let first_snapshot =
            Snapshot::from_context(first_context).ok_or(Error::InitialFetchTimeout)?;

        let (tx, rx) = watch::channel(Arc::new(first_snapshot));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch_updates(address, stream, tx, shutdown.clone()));

        Ok(Self {
            rx,
            shutdown,
            closed: OnceCell::new(),
            task: std::sync::Mutex::new(Some(task)),
        })
    }

    /// The most recently received SVID.
    pub fn current_svid(&self) -> Result<LocalSvid> {
        self.ensure_open()?;
        let snapshot = self.rx.borrow().clone();
        Ok(LocalSvid {
            spiffe_id: snapshot.svid.spiffe_id.clone(),
            cert_chain: snapshot.svid.cert_chain.clone(),
            key: snapshot.svid.key.clone_key(),
        })
    }

    /// `NotAfter` of the currently published leaf certificate.
    pub fn current_svid_not_after(&self) -> Result<std::time::SystemTime> {
        self.ensure_open()?;
        Ok(self.rx.borrow().svid.not_after)
    }

    /// Root certificates for `trust_domain`.
    pub fn current_bundle(
        &self,
        trust_domain: &TrustDomain,
    ) -> Result<Vec<CertificateDer<'static>>> {
        self.ensure_open()?;
        self.rx
            .borrow()
            .roots_for(trust_domain)
            .ok_or_else(|| Error::BundleUnknown(trust_domain.as_str().to_string()))
    }

    /// Tear down the subscription and release the Workload API connection.
    /// Idempotent: subsequent calls return the result of the first call.
    pub async fn close(&self) -> Result<()> {
        self.closed
            .get_or_init(|| async {
                self.shutdown.cancel();
                let handle = {
                    let mut guard = self.task.lock().unwrap_or_else(|p| p.into_inner());
                    guard.take()
                };
                if let Some(handle) = handle {
                    let _ = handle.await;
                }
                #[cfg(feature = "tracing")]
                debug!("identity source closed");
            })
            .await;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.initialized() {
            Err(Error::SourceClosed)
        } else {
            Ok(())
        }
    }
}

/// Open a fresh Workload API connection and subscribe to X.509 context
/// updates on it.
async fn open_stream(address: &str) -> Result<X509Stream> {
    let mut client = WorkloadApiClient::new_from_path(address).await?;
    let stream = client.stream_x509_contexts().await?;
    Ok(Box::pin(stream))
}

/// Reconnect to `address` with exponential backoff, retrying indefinitely
/// until it succeeds or `shutdown` fires. `backoff` carries the delay across
/// calls so consecutive disconnects keep growing it instead of resetting.
async fn reconnect_with_backoff(
    address: &str,
    shutdown: &CancellationToken,
    backoff: &mut Duration,
) -> Option<X509Stream> {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return None,
            () = tokio::time::sleep(*backoff) => {}
        }

        match open_stream(address).await {
            Ok(stream) => return Some(stream),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                warn!(error = %_e, delay = ?*backoff, "workload API reconnect attempt failed; retrying");
                *backoff = (*backoff * 2).min(MAX_RECONNECT_BACKOFF);
            }
        }
    }
}

async fn watch_updates(
    address: String,
    mut stream: X509Stream,
    tx: watch::Sender<Arc<Snapshot>>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_RECONNECT_BACKOFF;
    loop {
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            item = stream.next() => item,
        };

        let disconnected = match item {
            Some(Ok(ctx)) => {
                backoff = INITIAL_RECONNECT_BACKOFF;
                if let Some(snapshot) = Snapshot::from_context(ctx) {
                    #[cfg(feature = "tracing")]
                    debug!(svid = %snapshot.svid.spiffe_id, "rotated identity source snapshot");
                    let _ = tx.send(Arc::new(snapshot));
                } else {
                    #[cfg(feature = "tracing")]
                    warn!("workload API update missing default SVID; keeping last known snapshot");
                }
                false
            }
            Some(Err(_e)) => {
                #[cfg(feature = "tracing")]
                warn!(error = %_e, "transient workload API error; reconnecting");
                true
            }
            None => {
                #[cfg(feature = "tracing")]
                warn!("workload API stream ended; reconnecting");
                true
            }
        };

        if disconnected {
            match reconnect_with_backoff(&address, &shutdown, &mut backoff).await {
                Some(new_stream) => stream = new_stream,
                None => return,
            }
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    endpoint
        .strip_prefix(UNIX_PREFIX)
        .map_or_else(|| endpoint.to_string(), |path| format!("unix:{path}"))
}
