//! Network layer for the perun server.
//!
//! This module contains:
//! - `client`: per-connection record owning the outbound stream half
//! - `registry`: concurrent identity-to-record map and unauthenticated set
//! - `reader`: per-connection framed read loop and teardown
//! - `server`: acceptor, connection setup, send paths, administrative ops
//! - `tls`: TLS acceptor setup and peer-certificate policy

pub mod client;
mod reader;
mod registry;
pub mod server;
pub mod tls;

// Re-export the main entry points
pub use server::{ConnectedCallback, DisconnectedCallback, MessageCallback, Server};
