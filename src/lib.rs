//! mTLS trust library
//!
//! Mutual TLS trust verification and an authenticated echo session.
//!
//! # Features
//!
//! - **Chain verification**: does a certificate chain to one of these roots? (`bool`)
//! - **Two trust models**: pinned self-signed peer, or root-CA chain validation
//! - **Connection state machine**: no application data before mutual authentication
//! - **Peer policy**: expected commonName and explicit post-handshake chain check
//! - **Echo session**: `"Return back to client: " + message`
//!
//! # Layering
//!
//! ```text
//! mtls::store → mtls::verifier → mtls::context → endpoint → mtls::policy → session
//!                                                                  ↑
//!                                                        server / client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod mtls;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.  `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Config(format!("Cannot install tracing subscriber: {e}")))
}
