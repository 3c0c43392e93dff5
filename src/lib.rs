#![deny(clippy::all)]
#![warn(unused_crate_dependencies)]

pub mod common;
pub mod config;
pub mod metrics;
pub mod net;
pub mod protocol;

pub use config::Config;
pub use net::Server;
pub use protocol::{Message, Status};
