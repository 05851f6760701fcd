// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! SPIFFE-backed mutual TLS for HTTP servers and clients.
//!
//! Wraps a SPIFFE Workload API client into a long-lived identity source and
//! uses it to build [`rustls`] configurations that present an X.509-SVID as
//! the local leaf certificate, require the peer to present one, and enforce
//! an [`authorizer::AuthorizationPolicy`] on the peer's SPIFFE ID.
//! Certificates and trust bundles rotate transparently while the source is
//! live.

#![forbid(rust_2018_idioms)]
#![forbid(missing_docs, unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::nursery,
    clippy::dbg_macro,
    clippy::todo
)]
#![allow(clippy::module_name_repetitions)]

pub mod authorizer;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
#[cfg(feature = "facade")]
pub mod facade;
pub mod peer;
pub mod san;
pub mod source;
pub mod spiffe_id;
pub mod tls;

pub use authorizer::{AuthorizationPolicy, Rejection};
#[cfg(feature = "config")]
pub use config::Config;
pub use error::{Error, Result};
#[cfg(feature = "facade")]
pub use facade::{client, get, run, start_server, Shutdown};
pub use peer::Peer;
#[cfg(feature = "facade")]
pub use peer::{attach_peer, peer_from_request, peer_id_from_request};
pub use source::{IdentitySource, LocalSvid, SourceConfig};
pub use tls::{new_client_tls, new_server_tls};
