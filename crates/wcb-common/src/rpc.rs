//! JSON-RPC messages carried inside encrypted envelopes.
//!
//! Outbound traffic is always a [`Request`]. Inbound plaintext is classified
//! once, when its header is decoded, into an [`Inbound`] value: a payload with
//! a `method` field is a peer-initiated request, anything else is a response
//! to one of ours.

use crate::frame::FrameError;
use crate::types::{method, JSONRPC_VERSION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound JSON-RPC request: `{"id","jsonrpc","method","params"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique per connection.
    pub id: u64,
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Builds a `"2.0"` request.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Encodes the request as the plaintext that gets encrypted.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if a parameter cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Fields common to every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Id of the request being answered.
    pub id: u64,
    /// Protocol version, `"2.0"`.
    pub jsonrpc: String,
}

/// Fields common to every peer-initiated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Request id chosen by the peer; `0` when absent.
    #[serde(default)]
    pub id: u64,
    /// Protocol version, `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
}

/// JSON-RPC error object: `{"code","message"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// A response: decoded header plus the full decrypted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Decoded `{id, jsonrpc}`.
    pub header: ResponseHeader,
    /// Raw plaintext, for method-specific decoding.
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct ResultField<T> {
    result: T,
}

#[derive(Deserialize)]
struct ErrorField {
    #[serde(default)]
    error: Option<RpcError>,
}

impl Response {
    /// Decodes the `result` member as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if there is no `result` or it has the
    /// wrong shape.
    pub fn result<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let field: ResultField<T> = serde_json::from_slice(&self.body)?;
        Ok(field.result)
    }

    /// Decodes the whole body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] on a shape mismatch.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The `error` member, if the peer answered with one.
    #[must_use]
    pub fn error(&self) -> Option<RpcError> {
        serde_json::from_slice::<ErrorField>(&self.body)
            .ok()
            .and_then(|f| f.error)
    }
}

/// A request initiated by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    /// Decoded `{id, jsonrpc, method}`.
    pub header: RequestHeader,
    /// Raw plaintext.
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
struct ParamsField {
    #[serde(default)]
    params: Vec<Value>,
}

impl PeerRequest {
    /// Decodes the first positional parameter as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if `params` is missing, empty or of the
    /// wrong shape.
    pub fn first_param<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let field: ParamsField = serde_json::from_slice(&self.body)?;
        let first = field.params.into_iter().next().unwrap_or(Value::Null);
        Ok(serde_json::from_value(first)?)
    }
}

/// Every decrypted inbound payload, classified at header decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response(Response),
    /// `wc_sessionUpdate` pushed by the peer.
    SessionUpdate(PeerRequest),
    /// Any other peer-initiated request.
    Request(PeerRequest),
}

#[derive(Deserialize)]
struct Probe {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    method: Option<String>,
}

impl Inbound {
    /// Classifies decrypted plaintext.
    ///
    /// # Examples
    ///
    /// ```
    /// use wcb_common::rpc::Inbound;
    ///
    /// let msg = Inbound::decode(br#"{"id":1,"jsonrpc":"2.0","result":{}}"#.to_vec()).unwrap();
    /// assert!(matches!(msg, Inbound::Response(_)));
    /// assert_eq!(msg.id(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// - [`FrameError::Json`] if the plaintext is not a JSON object
    /// - [`FrameError::UnsupportedVersion`] if `jsonrpc` is not `"2.0"`
    /// - [`FrameError::MissingId`] for a response without an id
    pub fn decode(body: Vec<u8>) -> Result<Self, FrameError> {
        let probe: Probe = serde_json::from_slice(&body)?;
        if probe.jsonrpc != JSONRPC_VERSION {
            return Err(FrameError::UnsupportedVersion(probe.jsonrpc));
        }

        match probe.method {
            Some(name) => {
                let header = RequestHeader {
                    id: probe.id.unwrap_or(0),
                    jsonrpc: probe.jsonrpc,
                    method: name,
                };
                let request = PeerRequest { header, body };
                if request.header.method == method::SESSION_UPDATE {
                    Ok(Self::SessionUpdate(request))
                } else {
                    Ok(Self::Request(request))
                }
            }
            None => {
                let id = probe.id.ok_or(FrameError::MissingId)?;
                Ok(Self::Response(Response {
                    header: ResponseHeader {
                        id,
                        jsonrpc: probe.jsonrpc,
                    },
                    body,
                }))
            }
        }
    }

    /// The message id (`0` for peer requests that carried none).
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Response(r) => r.header.id,
            Self::SessionUpdate(r) | Self::Request(r) => r.header.id,
        }
    }
}
