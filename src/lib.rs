//! convertd: a document conversion server.
//!
//! A client uploads one office document per TCP connection and receives the
//! converted file on the same connection.
//!
//! Modules, leaves first:
//! - `protocol`: framed control messages and the `<name>;<size>` handshake
//! - `transfer`: bounded-chunk payload streaming
//! - `convert`: file type detection and converter dispatch
//! - `session`: per-connection state machine
//! - `server`: listener and admission control
//! - `client`: the uploading side of the protocol

pub mod client;
pub mod config;
pub mod convert;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transfer;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
