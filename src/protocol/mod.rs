//! Wire protocol for perun.
//!
//! This module contains all protocol-related code:
//! - `codec` - Low-level binary serialization primitives
//! - `message` - Framed message type and stream read/serialize

pub mod codec;
pub mod message;

pub use message::{Message, Status};
