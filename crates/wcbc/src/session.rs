//! Session establishment and transaction signing on top of the dispatcher.

use crate::dispatcher::{Dispatcher, PendingResponse};
use crate::error::BridgeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;
use tracing::{debug, info};
use wcb_common::rpc::Response;
use wcb_common::session::{
    AlgoSignParams, AlgoSignResponse, SessionRequestParams, SessionRequestResult,
    SessionUpdateParams,
};
use wcb_common::types::method;
use wcb_common::Topic;

pub use wcb_common::session::PeerMeta;

/// Issues session requests over one dispatcher.
#[derive(Debug, Clone)]
pub struct Client {
    dispatcher: Dispatcher,
    chain_id: u64,
    timeout: Option<Duration>,
}

/// A published `wc_sessionRequest` waiting for the wallet to scan and answer.
#[derive(Debug)]
pub struct SessionProposal {
    url: String,
    handshake: Topic,
    topic: Topic,
    waiter: PendingResponse,
    dispatcher: Dispatcher,
    chain_id: u64,
    timeout: Option<Duration>,
}

/// An approved session with a wallet.
#[derive(Debug, Clone)]
pub struct Peer {
    dispatcher: Dispatcher,
    topic: Topic,
    accounts: Vec<String>,
    meta: PeerMeta,
    chain_id: u64,
    timeout: Option<Duration>,
}

fn check_error(resp: &Response) -> Result<(), BridgeError> {
    match resp.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

impl Client {
    /// Creates a client announcing `chain_id` in session requests.
    #[must_use]
    pub fn new(dispatcher: Dispatcher, chain_id: u64) -> Self {
        Self {
            dispatcher,
            chain_id,
            timeout: None,
        }
    }

    /// Default deadline for every request issued through this client and
    /// the sessions it creates. `None` waits indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Underlying dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Proposes a new session.
    ///
    /// Generates the topic this side listens on and a handshake topic,
    /// publishes `wc_sessionRequest` on the handshake topic, then subscribes
    /// to the listening topic. The wallet learns the handshake topic and key
    /// from [`SessionProposal::url`].
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the request cannot be registered,
    /// published, or the subscription fails.
    pub async fn pairing_session(&self, meta: PeerMeta) -> Result<SessionProposal, BridgeError> {
        let topic = Topic::generate();
        let handshake = Topic::generate();
        let params = SessionRequestParams {
            peer_id: topic.to_string(),
            peer_meta: meta,
            chain_id: self.chain_id,
        };

        let waiter = self
            .dispatcher
            .call(
                &handshake,
                method::SESSION_REQUEST,
                vec![serde_json::to_value(params)?],
            )
            .await?;
        self.dispatcher.subscribe(&topic).await?;

        let url = self.dispatcher.connection().pairing_url(&handshake);
        info!(id = waiter.id(), %handshake, "session requested");

        Ok(SessionProposal {
            url,
            handshake,
            topic,
            waiter,
            dispatcher: self.dispatcher.clone(),
            chain_id: self.chain_id,
            timeout: self.timeout,
        })
    }
}

impl SessionProposal {
    /// Pairing URI to show the wallet.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Topic the request was published on.
    #[must_use]
    pub fn handshake_topic(&self) -> &Topic {
        &self.handshake
    }

    /// Topic this side listens on.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Request id of the `wc_sessionRequest`.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.waiter.id()
    }

    /// Waits for the wallet's answer. `timeout` overrides the client default.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SessionRejected`] if the wallet declined or exposed no
    ///   accounts
    /// - [`BridgeError::Rpc`] if the wallet answered with an error object
    /// - [`BridgeError::Timeout`] / [`BridgeError::ConnectionClosed`] if no
    ///   answer arrives
    pub async fn approved(self, timeout: Option<Duration>) -> Result<Peer, BridgeError> {
        let resp = self.waiter.recv_opt(timeout.or(self.timeout)).await?;
        check_error(&resp)?;
        let result: SessionRequestResult = resp.result()?;
        if !result.is_approved() {
            return Err(BridgeError::SessionRejected);
        }

        // Older wallets leave peerId empty and keep using the handshake topic.
        let topic = if result.peer_id.is_empty() {
            self.handshake
        } else {
            Topic::from(result.peer_id)
        };
        info!(%topic, accounts = result.accounts.len(), "session approved");

        Ok(Peer {
            dispatcher: self.dispatcher,
            topic,
            accounts: result.accounts,
            meta: result.peer_meta,
            chain_id: result.chain_id.unwrap_or(self.chain_id),
            timeout: self.timeout,
        })
    }
}

impl Peer {
    /// Topic the wallet listens on.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Accounts the wallet exposed.
    #[must_use]
    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    /// Wallet metadata.
    #[must_use]
    pub fn meta(&self) -> &PeerMeta {
        &self.meta
    }

    /// Chain the session is on.
    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Applies a `wc_sessionUpdate`. Returns `false` once the session has
    /// ended.
    pub fn apply_update(&mut self, update: &SessionUpdateParams) -> bool {
        if let Some(chain_id) = update.chain_id {
            self.chain_id = chain_id;
        }
        self.accounts.clone_from(&update.accounts);
        update.approved && !self.accounts.is_empty()
    }

    /// Asks the wallet to sign raw transactions.
    ///
    /// Returns one entry per input, `None` where the wallet chose not to sign.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Rpc`] if the wallet refused, or any transport
    /// error.
    pub async fn sign_transactions(
        &self,
        txns: &[Vec<u8>],
        timeout: Option<Duration>,
    ) -> Result<Vec<Option<Vec<u8>>>, BridgeError> {
        let entries = txns
            .iter()
            .map(|txn| AlgoSignParams {
                txn_base64: STANDARD.encode(txn),
                message: String::new(),
                signers: None,
            })
            .collect();
        self.sign(entries, timeout).await
    }

    /// Sends a fully specified `algo_signTxn` request.
    ///
    /// # Errors
    ///
    /// See [`sign_transactions`](Self::sign_transactions).
    pub async fn sign(
        &self,
        entries: Vec<AlgoSignParams>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Option<Vec<u8>>>, BridgeError> {
        let count = entries.len();
        let waiter = self
            .dispatcher
            .call(
                &self.topic,
                method::ALGO_SIGN_TXN,
                vec![serde_json::to_value(entries)?],
            )
            .await?;
        debug!(id = waiter.id(), count, "sign request sent");

        let resp = waiter.recv_opt(timeout.or(self.timeout)).await?;
        let body: AlgoSignResponse = resp.decode()?;
        if let Some(e) = body.error {
            return Err(e.into());
        }

        body.result
            .into_iter()
            .map(|blob| blob.map(|b| STANDARD.decode(b)).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(BridgeError::from)
    }
}
