//! Core type definitions and protocol constants for the bridge protocol.

use crate::cipher::CipherError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// JSON-RPC version string carried by every request and response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Version segment of the `wc:` pairing URI.
pub const PAIRING_VERSION: u32 = 1;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Initialization vector length in bytes (one AES block).
pub const IV_LEN: usize = 16;

/// JSON-RPC method names understood by the session layer.
pub mod method {
    /// Dapp → wallet: propose a session.
    pub const SESSION_REQUEST: &str = "wc_sessionRequest";
    /// Wallet → dapp: session approval state or account list changed.
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    /// Dapp → wallet: sign one or more Algorand transactions.
    pub const ALGO_SIGN_TXN: &str = "algo_signTxn";
}

/// Name of a pub/sub channel on the relay.
///
/// Topics are generated locally as random UUIDv4 strings and never validated
/// against the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Generate a fresh random topic.
    ///
    /// # Examples
    ///
    /// ```
    /// use wcb_common::Topic;
    ///
    /// let a = Topic::generate();
    /// let b = Topic::generate();
    /// assert_ne!(a, b);
    /// assert_eq!(a.as_str().len(), 36);
    /// ```
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 256-bit symmetric key shared with the peer through the pairing URI.
///
/// The same key encrypts and authenticates every payload on a connection.
/// Key bytes are wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Hex`] for invalid hex and
    /// [`CipherError::InvalidKeyLength`] if the decoded key is not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(s.trim())?;
        let len = bytes.len();
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(len))?;
        Ok(Self(array))
    }

    /// Lowercase hex rendering, as embedded in the pairing URI.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}
