//! End-to-end mTLS scenarios. Scenarios that open an [`IdentitySource`]
//! against a real Workload API endpoint (everything except
//! `initial_fetch_timeout_without_workload_api`) need a SPIRE agent
//! reachable at `E5S_TEST_WORKLOAD_SOCKET` (default
//! `unix:///tmp/spire-agent/public/api.sock`) that has issued SVIDs for
//! `spiffe://example.org/server` and `spiffe://example.org/client`, and a
//! bundle containing both workloads' signer under `example.org`. They're
//! skipped automatically when that socket isn't present.

use std::sync::Arc;
use std::time::Duration;

use e5s::{AuthorizationPolicy, IdentitySource, SourceConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;

fn test_workload_socket() -> String {
    std::env::var("E5S_TEST_WORKLOAD_SOCKET")
        .unwrap_or_else(|_| "unix:///tmp/spire-agent/public/api.sock".to_string())
}

fn workload_api_reachable() -> bool {
    let socket = test_workload_socket();
    socket
        .strip_prefix("unix://")
        .is_some_and(|path| std::path::Path::new(path).exists())
}

async fn open_source(timeout: Duration) -> e5s::Result<IdentitySource> {
    let config = SourceConfig {
        workload_socket_endpoint: test_workload_socket(),
        initial_fetch_timeout: timeout,
    };
    IdentitySource::open(&config, CancellationToken::new()).await
}

#[tokio::test]
async fn initial_fetch_timeout_without_workload_api() {
    let config = SourceConfig {
        workload_socket_endpoint: "unix:///tmp/e5s-test-nonexistent.sock".to_string(),
        initial_fetch_timeout: Duration::from_millis(200),
    };
    let start = std::time::Instant::now();
    let result = IdentitySource::open(&config, CancellationToken::new()).await;
    assert!(result.is_err());
    // A nonexistent socket fails the connect itself (SourceUnavailable)
    // rather than hanging until the fetch timeout; either way it must not
    // block past it.
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn open_is_cancelable_before_first_fetch() {
    let config = SourceConfig {
        workload_socket_endpoint: "unix:///tmp/e5s-test-nonexistent.sock".to_string(),
        initial_fetch_timeout: Duration::from_secs(30),
    };
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = IdentitySource::open(&config, cancel).await;
    assert!(matches!(result, Err(e5s::Error::Canceled) | Err(e5s::Error::SourceUnavailable(_))));
}

#[tokio::test]
async fn happy_path_trust_domain_policy() {
    if !workload_api_reachable() {
        eprintln!("skipping: no Workload API at {}", test_workload_socket());
        return;
    }

    let server_source = Arc::new(
        open_source(Duration::from_secs(5))
            .await
            .expect("server source opens"),
    );
    let client_source = Arc::new(
        open_source(Duration::from_secs(5))
            .await
            .expect("client source opens"),
    );

    let server_policy = AuthorizationPolicy::AllowTrustDomain(
        "example.org".try_into().expect("valid trust domain"),
    );
    let client_policy = AuthorizationPolicy::AllowTrustDomain(
        "example.org".try_into().expect("valid trust domain"),
    );

    let server_tls = e5s::new_server_tls(server_source.clone(), server_policy)
        .await
        .expect("server tls config");
    let client_tls = e5s::new_client_tls(client_source.clone(), client_policy)
        .await
        .expect("client tls config");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(server_tls);

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let mut stream = acceptor.accept(tcp).await.expect("tls accept");
        let peer = e5s::peer::peer_from_connection(&stream).expect("peer identity");
        assert_eq!(peer.spiffe_id.to_string(), "spiffe://example.org/client");
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.expect("read");
        stream.write_all(b"PONG").await.expect("write");
        stream.shutdown().await.expect("shutdown");
        String::from_utf8_lossy(&buf).to_string()
    });

    let connector = TlsConnector::from(client_tls);
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let mut stream = connector
        .connect("example.org".try_into().expect("server name"), tcp)
        .await
        .expect("tls connect");
    stream.write_all(b"PING").await.expect("write");
    stream.shutdown().await.expect("shutdown");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.expect("read");

    assert_eq!(server.await.expect("server task"), "PING");
    assert_eq!(buf, b"PONG");

    server_source.close().await.expect("close server source");
    client_source.close().await.expect("close client source");
}

#[tokio::test]
async fn exact_id_policy_mismatch_rejects_handshake() {
    if !workload_api_reachable() {
        eprintln!("skipping: no Workload API at {}", test_workload_socket());
        return;
    }

    let server_source = Arc::new(
        open_source(Duration::from_secs(5))
            .await
            .expect("server source opens"),
    );
    let server_policy = AuthorizationPolicy::AllowId(
        "spiffe://example.org/svc-a"
            .try_into()
            .expect("valid spiffe id"),
    );
    let server_tls = e5s::new_server_tls(server_source.clone(), server_policy)
        .await
        .expect("server tls config");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let acceptor = TlsAcceptor::from(server_tls);

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        acceptor.accept(tcp).await
    });

    let client_source = Arc::new(
        open_source(Duration::from_secs(5))
            .await
            .expect("client source opens"),
    );
    let client_policy = AuthorizationPolicy::AllowTrustDomain(
        "example.org".try_into().expect("valid trust domain"),
    );
    let client_tls = e5s::new_client_tls(client_source.clone(), client_policy)
        .await
        .expect("client tls config");
    let connector = TlsConnector::from(client_tls);
    let tcp = TcpStream::connect(addr).await.expect("connect");
    let outcome = connector
        .connect("example.org".try_into().expect("server name"), tcp)
        .await;

    assert!(outcome.is_err(), "client identity doesn't match allowed_client_spiffe_id, handshake must fail");
    assert!(server.await.expect("server task").is_err());

    server_source.close().await.expect("close server source");
    client_source.close().await.expect("close client source");
}

#[tokio::test]
async fn idempotent_shutdown_concurrent_calls() {
    if !workload_api_reachable() {
        eprintln!("skipping: no Workload API at {}", test_workload_socket());
        return;
    }

    let source = Arc::new(
        open_source(Duration::from_secs(5))
            .await
            .expect("source opens"),
    );

    let (a, b, c) = tokio::join!(source.close(), source.close(), source.close());
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(c.is_ok());
    assert!(matches!(source.current_svid(), Err(e5s::Error::SourceClosed)));
}
