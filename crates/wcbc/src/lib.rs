//! Wallet bridge client: encrypted relay transport, request correlation and
//! the session layer built on them.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI parsing and TOML configuration.
pub mod config;
/// Request/response correlation and the background read loop.
pub mod dispatcher;
/// Error type shared by every layer.
pub mod error;
/// WebSocket connection to the bridge.
pub mod relay;
/// Session request and transaction signing.
pub mod session;
/// Bridge host selection.
pub mod shard;

pub use dispatcher::{ConnStatus, Dispatcher, Notification, PendingResponse};
pub use error::BridgeError;
pub use relay::{RelayConnection, RelayReader};
pub use session::{Client, Peer, SessionProposal};
