//! Pairing URI construction and parsing.
//!
//! The URI is how the symmetric key and the handshake topic reach the peer,
//! usually through a QR code:
//!
//! ```text
//! wc:{topic}@1?bridge={escaped https://host}&key={hex key}
//! ```

use crate::cipher::CipherError;
use crate::types::{SymmetricKey, Topic, PAIRING_VERSION};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Characters left untouched by URL query escaping.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SCHEME: &str = "wc:";

/// Builds the pairing URI for `topic` on the bridge at `host`.
///
/// # Examples
///
/// ```
/// use wcb_common::pairing::pairing_url;
/// use wcb_common::{SymmetricKey, Topic};
///
/// let url = pairing_url(
///     &Topic::from("T"),
///     "b.bridge.walletconnect.org",
///     &SymmetricKey::from_bytes([0xab; 32]),
/// );
/// assert!(url.starts_with("wc:T@1?bridge=https%3A%2F%2Fb.bridge.walletconnect.org&key=abab"));
/// ```
#[must_use]
pub fn pairing_url(topic: &Topic, host: &str, key: &SymmetricKey) -> String {
    let bridge = format!("https://{host}");
    format!(
        "{SCHEME}{topic}@{PAIRING_VERSION}?bridge={}&key={}",
        utf8_percent_encode(&bridge, QUERY_ESCAPE),
        key.to_hex()
    )
}

/// Errors from [`PairingUri::from_str`].
#[derive(Debug, Error, PartialEq)]
pub enum PairingError {
    /// The string does not start with `wc:`.
    #[error("missing wc: scheme")]
    MissingScheme,
    /// No `@version` segment after the topic.
    #[error("missing version")]
    MissingVersion,
    /// The version segment is not a number.
    #[error("invalid version: {0:?}")]
    InvalidVersion(String),
    /// The topic segment is empty.
    #[error("empty topic")]
    EmptyTopic,
    /// A required query parameter is absent.
    #[error("missing query parameter {0:?}")]
    MissingParam(&'static str),
    /// The bridge parameter is not valid percent-encoded UTF-8.
    #[error("bridge is not valid utf-8")]
    InvalidBridge,
    /// The key parameter is not a 32-byte hex string.
    #[error("invalid key: {0}")]
    Key(#[from] CipherError),
}

/// A decoded pairing URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Handshake topic.
    pub topic: Topic,
    /// Protocol version, `1` for URIs built here.
    pub version: u32,
    /// Unescaped bridge URL, e.g. `https://a.bridge.walletconnect.org`.
    pub bridge: String,
    /// Shared symmetric key.
    pub key: SymmetricKey,
}

impl PairingUri {
    /// Bridge host with any `https://`/`wss://` scheme and trailing `/` removed.
    #[must_use]
    pub fn host(&self) -> &str {
        let rest = ["https://", "http://", "wss://", "ws://"]
            .iter()
            .find_map(|s| self.bridge.strip_prefix(*s))
            .unwrap_or(&self.bridge);
        rest.trim_end_matches('/')
    }
}

impl FromStr for PairingUri {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or(PairingError::MissingScheme)?;
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (topic, version) = path.split_once('@').ok_or(PairingError::MissingVersion)?;
        if topic.is_empty() {
            return Err(PairingError::EmptyTopic);
        }
        let version: u32 = version
            .parse()
            .map_err(|_| PairingError::InvalidVersion(version.to_string()))?;

        let mut bridge = None;
        let mut key = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("bridge", v)) => bridge = Some(v),
                Some(("key", v)) => key = Some(v),
                _ => {}
            }
        }

        let bridge = bridge.ok_or(PairingError::MissingParam("bridge"))?;
        let bridge = percent_decode_str(&bridge.replace('+', " "))
            .decode_utf8()
            .map_err(|_| PairingError::InvalidBridge)?
            .into_owned();
        let key = SymmetricKey::from_hex(key.ok_or(PairingError::MissingParam("key"))?)?;

        Ok(Self {
            topic: Topic::from(topic),
            version,
            bridge,
            key,
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}@{}?bridge={}&key={}",
            self.topic,
            self.version,
            utf8_percent_encode(&self.bridge, QUERY_ESCAPE),
            self.key.to_hex()
        )
    }
}
