//! Relay frame serialization and parsing.
//!
//! Every WebSocket text message exchanged with the relay is one JSON frame:
//! `{"topic", "type", "payload", "silent"}`. A `sub` frame asks the relay to
//! forward messages published on `topic`; a `pub` frame carries a
//! JSON-encoded [`Envelope`] as its string payload.

use crate::cipher::Envelope;
use crate::types::Topic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame `type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Subscribe to a topic.
    Sub,
    /// Publish an envelope to a topic.
    Pub,
    /// Any other relay message type (acks and the like).
    #[serde(other)]
    Other,
}

/// One relay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Channel the frame is addressed to.
    pub topic: Topic,
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// JSON-encoded envelope for `pub`, empty for `sub`.
    #[serde(default)]
    pub payload: String,
    /// Suppress relay push notifications for this frame.
    #[serde(default)]
    pub silent: bool,
}

/// Errors that can occur while encoding or decoding frames and the JSON-RPC
/// messages they carry.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame, envelope or message JSON was malformed.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// An envelope was requested from a frame that is not a `pub`.
    #[error("frame of type {0:?} carries no envelope")]
    NotPublish(FrameKind),
    /// The decrypted message declared an unexpected JSON-RPC version.
    #[error("unexpected jsonrpc version: {0:?}")]
    UnsupportedVersion(String),
    /// A response-shaped message had no numeric `id`.
    #[error("message has no id")]
    MissingId,
}

impl Frame {
    /// Creates a `sub` frame for `topic`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wcb_common::frame::Frame;
    /// use wcb_common::Topic;
    ///
    /// let json = Frame::subscribe(&Topic::from("t1")).serialize().unwrap();
    /// assert_eq!(json, r#"{"topic":"t1","type":"sub","payload":"","silent":true}"#);
    /// ```
    #[must_use]
    pub fn subscribe(topic: &Topic) -> Self {
        Self {
            topic: topic.clone(),
            kind: FrameKind::Sub,
            payload: String::new(),
            silent: true,
        }
    }

    /// Creates a `pub` frame carrying `envelope` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if the envelope cannot be encoded.
    pub fn publish(topic: &Topic, envelope: &Envelope) -> Result<Self, FrameError> {
        Ok(Self {
            topic: topic.clone(),
            kind: FrameKind::Pub,
            payload: serde_json::to_string(envelope)?,
            silent: true,
        })
    }

    /// Encodes the frame as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if serialization fails.
    pub fn serialize(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a frame from raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if the bytes are not a valid frame.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Decodes the envelope carried by a `pub` frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NotPublish`] for other frame types and
    /// [`FrameError::Json`] if the payload is not an envelope.
    pub fn envelope(&self) -> Result<Envelope, FrameError> {
        if self.kind != FrameKind::Pub {
            return Err(FrameError::NotPublish(self.kind));
        }
        Ok(serde_json::from_str(&self.payload)?)
    }
}
