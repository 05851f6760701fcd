// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! One-call entry points that compose a config record, an identity source,
//! and a TLS config into a running HTTP server or client.

use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;

use crate::config::{validate_client, validate_server, Config};
use crate::error::{Error, Result};
use crate::peer;
use crate::source::IdentitySource;
use crate::tls::{new_client_tls, new_server_tls};

const BIND_PROBE_WINDOW: Duration = Duration::from_millis(300);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Bounds how long a connection may take to finish sending its request
/// headers. A Slowloris guard: the facade always sets this, there is no way
/// to start a server without it.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONFIG_PATH: &str = "/etc/e5s/config.yaml";
const CONFIG_PATH_ENV: &str = "E5S_CONFIG";

/// Idempotent teardown handle returned by [`start_server`] and [`client`].
///
/// Safe to call `shutdown` from any task; only the first call performs real
/// teardown work, later calls return immediately with the same outcome.
pub struct Shutdown {
    once: Arc<OnceCell<()>>,
    cancel: CancellationToken,
    accept_task: Arc<std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
    source: Arc<IdentitySource>,
}

impl Shutdown {
    fn new(
        source: Arc<IdentitySource>,
        cancel: CancellationToken,
        accept_task: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self {
            once: Arc::new(OnceCell::new()),
            cancel,
            accept_task: Arc::new(std::sync::Mutex::new(accept_task)),
            source,
        }
    }

    fn client_only(source: Arc<IdentitySource>) -> Self {
        Self::new(source, CancellationToken::new(), None)
    }

    /// Initiate graceful shutdown: stop accepting new connections, wait up
    /// to a bounded timeout for the accept loop to drain, then close the
    /// identity source. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        self.once
            .get_or_init(|| async {
                self.cancel.cancel();
                let handle = {
                    let mut guard = self.accept_task.lock().unwrap_or_else(|p| p.into_inner());
                    guard.take()
                };
                if let Some(handle) = handle {
                    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
                }
                let _ = self.source.close().await;
            })
            .await;
        Ok(())
    }
}

/// Validate `config` for the server role, open an identity source, build a
/// server TLS config, and start accepting connections on
/// `config.server.listen_addr`, dispatching to `app` with the verified
/// [`crate::peer::Peer`] attached to every request's extensions.
///
/// Returns a [`Shutdown`] handle once the listener is bound; if binding
/// doesn't succeed within a short probe window, cleans up and fails with
/// [`Error::BindFailed`].
pub async fn start_server(config: &Config, app: Router) -> Result<Shutdown> {
    let (source_config, policy, listen_addr) = validate_server(config)?;

    let source = Arc::new(IdentitySource::open(&source_config, CancellationToken::new()).await?);
    let tls_config = new_server_tls(source.clone(), policy).await?;
    let acceptor = TlsAcceptor::from(tls_config);

    let listener = match tokio::time::timeout(
        BIND_PROBE_WINDOW,
        TcpListener::bind(listen_addr.as_str()),
    )
    .await
    {
        Ok(Ok(listener)) => listener,
        Ok(Err(e)) => {
            let _ = source.close().await;
            return Err(Error::BindFailed(e.to_string()));
        }
        Err(_) => {
            let _ = source.close().await;
            return Err(Error::BindFailed(format!(
                "timed out binding {listen_addr}"
            )));
        }
    };

    let cancel = CancellationToken::new();
    let accept_task = tokio::spawn(accept_loop(listener, acceptor, app, cancel.clone()));

    Ok(Shutdown::new(source, cancel, Some(accept_task)))
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        let Ok((tcp, _peer_addr)) = accepted else {
            continue;
        };
        let _ = tcp.set_nodelay(true);

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let Ok(tls_stream) = acceptor.accept(tcp).await else {
                return;
            };
            let Ok(peer) = peer::peer_from_connection(&tls_stream) else {
                return;
            };

            let svc = ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
                .layer(RequestBodyTimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(TraceLayer::new_for_http())
                .layer(Extension(Arc::new(peer)))
                .service(app.into_service());

            let hyper_svc = TowerToHyperService::new(svc);
            let io = TokioIo::new(tls_stream);
            let mut builder = AutoBuilder::new(TokioExecutor::new());
            builder.http1().header_read_timeout(HEADER_READ_TIMEOUT);
            let _ = builder.serve_connection(io, hyper_svc).await;
        });
    }
}

/// Validate `config` for the client role, open an identity source, and
/// build an HTTP client whose transport uses the resulting mTLS config.
pub async fn client(config: &Config) -> Result<(reqwest::Client, Shutdown)> {
    let (source_config, policy) = validate_client(config)?;

    let source = Arc::new(IdentitySource::open(&source_config, CancellationToken::new()).await?);
    let tls_config = new_client_tls(source.clone(), policy).await?;

    let http_client = reqwest::Client::builder()
        .use_preconfigured_tls((*tls_config).clone())
        .build()
        .map_err(|e| Error::BindFailed(format!("failed to construct HTTP client: {e}")))?;

    Ok((http_client, Shutdown::client_only(source)))
}

/// An HTTP response from [`get`]. Closes the one-shot client's identity
/// source when dropped, so a caller that lets the response (and its body)
/// go out of scope in the ordinary way automatically releases the
/// underlying Workload API connection.
pub struct Response {
    inner: reqwest::Response,
    shutdown: Option<Shutdown>,
}

impl std::ops::Deref for Response {
    type Target = reqwest::Response;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for Response {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            tokio::spawn(async move {
                let _ = shutdown.shutdown().await;
            });
        }
    }
}

/// Create a one-shot mTLS client from the default config location, perform
/// a GET against `url`, and return the response.
pub async fn get(url: &str) -> Result<Response> {
    let config = load_default_config().await?;
    let (http_client, shutdown) = client(&config).await?;
    let inner = http_client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::SourceUnavailable(e.to_string()))?;
    Ok(Response {
        inner,
        shutdown: Some(shutdown),
    })
}

/// Load config from the default location (or `E5S_CONFIG` if set), start a
/// server with `app`, install interrupt/termination handlers, and block
/// until a signal arrives; then shut down.
pub async fn run(app: Router) -> Result<()> {
    let config = load_default_config().await?;
    let shutdown = start_server(&config, app).await?;

    wait_for_termination_signal().await;

    shutdown.shutdown().await
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(stream) => stream,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn load_default_config() -> Result<Config> {
    let path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let text = tokio::fs::read_to_string(&path).await?;
    Config::from_yaml(&text)
}
