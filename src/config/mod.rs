//! Configuration module for perun.
//!
//! This module provides all configuration types and parsing logic:
//! - `Config` - Root configuration container
//! - `Listen` - Listening endpoint
//! - `Tls` - TLS termination settings and peer-certificate policy
//! - `Auth` - Shared-secret authentication
//! - `Limits` - Connection and resource limits

mod parser;
mod types;

pub use parser::load_config;
pub use types::*;
