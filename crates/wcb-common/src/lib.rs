//! Wire types and pure functions for the wallet bridge protocol.
//!
//! This crate provides:
//! - Payload encryption and authentication ([`cipher`])
//! - Relay frame serialization and parsing ([`frame`])
//! - JSON-RPC request/response types and inbound classification ([`rpc`])
//! - Session method parameter shapes ([`session`])
//! - Pairing URI building and parsing ([`pairing`])
//! - Topic, key and protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod frame;
pub mod pairing;
pub mod rpc;
pub mod session;
pub mod types;

pub use cipher::{CipherError, Envelope};
pub use frame::FrameError;
pub use types::{SymmetricKey, Topic};
