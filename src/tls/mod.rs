// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Builds `rustls` server/client configurations wired to an
//! [`crate::source::IdentitySource`] and an
//! [`crate::authorizer::AuthorizationPolicy`].
//!
//! Every config built here pins TLS 1.3, requires mutual authentication,
//! and resolves the local leaf certificate / verifies the peer dynamically
//! at handshake time rather than freezing a copy at construction time.
//!
//! Request read-header timeouts are an HTTP-server concern this module
//! doesn't own; the facade (`src/facade.rs`) is responsible for setting one
//! and refuses to start a server without it.

mod client;
mod server;
mod verifier;

pub use client::new_client_tls;
pub use server::new_server_tls;

const TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn crypto_provider() -> std::sync::Arc<rustls::crypto::CryptoProvider> {
    std::sync::Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}
