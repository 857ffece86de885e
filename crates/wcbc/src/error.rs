use thiserror::Error;
use tokio_tungstenite::tungstenite;
use wcb_common::cipher::CipherError;
use wcb_common::frame::FrameError;

/// Errors surfaced by the transport, the dispatcher and the session layer.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// WebSocket transport error. Fatal to the read loop.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// The relay connection is gone; pending requests can never be answered.
    #[error("connection closed")]
    ConnectionClosed,
    /// A frame or decrypted message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),
    /// Encryption or integrity verification failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CipherError),
    /// Request parameters could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    /// A signed blob in a response was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// A response handler reported a failure.
    #[error("handler error: {0}")]
    Handler(String),
    /// A continuation is already registered under this request id.
    #[error("request id {0} is already pending")]
    DuplicateId(u64),
    /// No response arrived before the deadline.
    #[error("request timed out")]
    Timeout,
    /// The peer answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Peer-supplied error code.
        code: i64,
        /// Peer-supplied description.
        message: String,
    },
    /// The wallet declined the session or exposed no accounts.
    #[error("session rejected by peer")]
    SessionRejected,
    /// Configuration values are unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<wcb_common::rpc::RpcError> for BridgeError {
    fn from(e: wcb_common::rpc::RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}
