//! Parameter and result shapes for the session-level methods.

use crate::rpc::RpcError;
use serde::{Deserialize, Serialize};

/// Default chain id announced in `wc_sessionRequest` (Algorand).
pub const DEFAULT_CHAIN_ID: u64 = 4160;

/// Metadata describing one side of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    /// Short description shown to the user.
    #[serde(default)]
    pub description: String,
    /// Application URL.
    #[serde(default)]
    pub url: String,
    /// Icon URLs.
    #[serde(default)]
    pub icons: Vec<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// `wc_sessionRequest` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    /// Topic the requester listens on.
    pub peer_id: String,
    /// Requester metadata.
    pub peer_meta: PeerMeta,
    /// Requested chain.
    pub chain_id: u64,
}

/// `wc_sessionRequest` result.
///
/// Wallets are inconsistent about which members they fill, so every field is
/// optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestResult {
    /// Topic the wallet listens on.
    #[serde(default)]
    pub peer_id: String,
    /// Wallet metadata.
    #[serde(default)]
    pub peer_meta: PeerMeta,
    /// Whether the user approved the session. Absent means approved.
    #[serde(default)]
    pub approved: Option<bool>,
    /// Chain the wallet agreed to.
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Accounts exposed to the requester.
    #[serde(default)]
    pub accounts: Vec<String>,
}

impl SessionRequestResult {
    /// True unless the wallet explicitly declined or exposed no accounts.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approved != Some(false) && !self.accounts.is_empty()
    }
}

/// `wc_sessionUpdate` parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateParams {
    /// `false` ends the session.
    pub approved: bool,
    /// Chain the session is now on, if changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Current account list.
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// One entry of the `algo_signTxn` parameter array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoSignParams {
    /// Base64 of the msgpack-encoded transaction.
    #[serde(rename = "txn")]
    pub txn_base64: String,
    /// Message shown to the user alongside the transaction.
    #[serde(default)]
    pub message: String,
    /// Addresses expected to sign; omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signers: Option<Vec<String>>,
}

/// `algo_signTxn` response body.
///
/// `result[i]` is the base64 signed transaction for request entry `i`, or
/// `null` if the wallet did not sign that entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoSignResponse {
    /// Signed blobs, positionally matched to the request.
    #[serde(default)]
    pub result: Vec<Option<String>>,
    /// Wallet-reported failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_request_params_use_camel_case() {
        let params = SessionRequestParams {
            peer_id: "P".to_string(),
            peer_meta: PeerMeta {
                name: "wc".to_string(),
                ..PeerMeta::default()
            },
            chain_id: DEFAULT_CHAIN_ID,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["peerId"], "P");
        assert_eq!(value["chainId"], 4160);
        assert_eq!(value["peerMeta"]["name"], "wc");
        assert_eq!(value["peerMeta"]["icons"], json!([]));
    }

    #[test]
    fn sparse_session_result_is_approved() {
        let result: SessionRequestResult =
            serde_json::from_value(json!({"accounts": ["ACCT1"]})).unwrap();
        assert!(result.is_approved());
        assert!(result.peer_id.is_empty());
    }

    #[test]
    fn declined_session_result() {
        let result: SessionRequestResult = serde_json::from_value(
            json!({"peerId": "W", "approved": false, "accounts": ["A"]}),
        )
        .unwrap();
        assert!(!result.is_approved());

        let empty: SessionRequestResult =
            serde_json::from_value(json!({"approved": true, "accounts": []})).unwrap();
        assert!(!empty.is_approved());
    }

    #[test]
    fn sign_params_omit_missing_signers() {
        let params = AlgoSignParams {
            txn_base64: "AAEC".to_string(),
            message: String::new(),
            signers: None,
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"txn": "AAEC", "message": ""})
        );
    }

    #[test]
    fn sign_response_with_nulls_and_error() {
        let resp: AlgoSignResponse = serde_json::from_value(json!({
            "id": 2,
            "jsonrpc": "2.0",
            "result": ["AAEC", null],
        }))
        .unwrap();
        assert_eq!(resp.result, vec![Some("AAEC".to_string()), None]);
        assert!(resp.error.is_none());

        let failed: AlgoSignResponse = serde_json::from_value(json!({
            "id": 3,
            "jsonrpc": "2.0",
            "error": {"code": 4001, "message": "User rejected"},
        }))
        .unwrap();
        assert_eq!(failed.error.unwrap().code, 4001);
        assert!(failed.result.is_empty());
    }
}
