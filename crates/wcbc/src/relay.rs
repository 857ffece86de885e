use crate::config::ClientConfig;
use crate::error::BridgeError;
use crate::shard::ShardSelector;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use wcb_common::cipher;
use wcb_common::frame::{Frame, FrameKind};
use wcb_common::pairing;
use wcb_common::rpc::Inbound;
use wcb_common::{SymmetricKey, Topic};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the bridge connection.
///
/// Every write (subscribe, publish, keepalive ping) goes through one async
/// mutex around the sink, so frames are never interleaved. Share it through
/// `Arc`.
pub struct RelayConnection {
    host: String,
    key: SymmetricKey,
    sink: Mutex<SplitSink<WsStream, Message>>,
}

/// Read half of the bridge connection, owned by the dispatch loop.
pub struct RelayReader {
    stream: SplitStream<WsStream>,
    key: SymmetricKey,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

fn map_ws_error(e: tungstenite::Error) -> BridgeError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            BridgeError::ConnectionClosed
        }
        other => BridgeError::WebSocket(other),
    }
}

impl RelayConnection {
    /// Opens the WebSocket to the bridge.
    ///
    /// The host is `relay.host` when configured, otherwise whatever `selector`
    /// picks from `relay.shards`. A fresh key is generated when `key` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] if no host can be chosen and
    /// [`BridgeError::WebSocket`] if the handshake fails.
    pub async fn connect(
        config: &ClientConfig,
        key: Option<SymmetricKey>,
        selector: &dyn ShardSelector,
    ) -> Result<(Arc<Self>, RelayReader), BridgeError> {
        let host = match config.relay.host.clone() {
            Some(host) => host,
            None => selector.select(&config.relay.shards).ok_or_else(|| {
                BridgeError::InvalidConfig("no bridge host available".to_string())
            })?,
        };
        let key = key.unwrap_or_else(SymmetricKey::generate);
        let scheme = if config.relay.secure { "wss" } else { "ws" };
        let url = format!("{scheme}://{host}/");

        debug!(%url, "connecting to bridge");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (sink, stream) = ws.split();
        info!(%host, "connected to bridge");

        let conn = Arc::new(Self {
            host,
            key: key.clone(),
            sink: Mutex::new(sink),
        });
        Ok((conn, RelayReader { stream, key }))
    }

    /// Bridge host this connection is attached to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Symmetric key used for every envelope on this connection.
    #[must_use]
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Pairing URI for `topic` on this connection's host and key.
    #[must_use]
    pub fn pairing_url(&self, topic: &Topic) -> String {
        pairing::pairing_url(topic, &self.host, &self.key)
    }

    async fn write(&self, msg: Message) -> Result<(), BridgeError> {
        self.sink.lock().await.send(msg).await.map_err(map_ws_error)
    }

    /// Asks the bridge to forward messages published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the frame cannot be written.
    pub async fn subscribe(&self, topic: &Topic) -> Result<(), BridgeError> {
        let text = Frame::subscribe(topic).serialize()?;
        self.write(Message::Text(text)).await?;
        debug!(%topic, "subscribed");
        Ok(())
    }

    /// Encrypts `plaintext` under a fresh IV and publishes it on `topic`.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if encryption, encoding or the write fails.
    pub async fn publish(&self, topic: &Topic, plaintext: &[u8]) -> Result<(), BridgeError> {
        let envelope = cipher::encrypt(plaintext, &self.key, &cipher::random_iv())?;
        let text = Frame::publish(topic, &envelope)?.serialize()?;
        self.write(Message::Text(text)).await?;
        debug!(%topic, len = plaintext.len(), "published");
        Ok(())
    }

    /// Sends one WebSocket ping.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the write fails.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        self.write(Message::Ping(Vec::new())).await
    }

    /// Sends a close frame. Later writes fail with `ConnectionClosed`.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the close frame cannot be written.
    pub async fn close(&self) -> Result<(), BridgeError> {
        self.sink.lock().await.close().await.map_err(map_ws_error)
    }

    /// Pings the bridge every `interval` until a write fails or every
    /// handle to the connection is dropped.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                let Some(conn) = weak.upgrade() else { break };
                if let Err(e) = conn.ping().await {
                    warn!(error = %e, "keepalive ping failed, stopping");
                    break;
                }
                debug!("keepalive ping sent");
            }
        })
    }
}

impl RelayReader {
    /// Waits for the next decrypted message.
    ///
    /// Control frames and non-`pub` relay frames are skipped. Ping replies are
    /// sent by the WebSocket layer itself.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ConnectionClosed`] on a close frame or end of stream
    /// - [`BridgeError::WebSocket`] on transport failure
    /// - [`BridgeError::Protocol`] or [`BridgeError::Crypto`] on a frame that
    ///   cannot be decoded, authenticated or decrypted
    pub async fn read_next(&mut self) -> Result<Inbound, BridgeError> {
        loop {
            let msg = self
                .stream
                .next()
                .await
                .ok_or(BridgeError::ConnectionClosed)?
                .map_err(map_ws_error)?;

            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Close(frame) => {
                    debug!(?frame, "bridge closed the connection");
                    return Err(BridgeError::ConnectionClosed);
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            let frame = Frame::parse(&data)?;
            if frame.kind != FrameKind::Pub {
                debug!(topic = %frame.topic, kind = ?frame.kind, "skipping non-publish frame");
                continue;
            }
            let plaintext = cipher::decrypt(&frame.envelope()?, &self.key)?;
            let inbound = Inbound::decode(plaintext)?;
            debug!(topic = %frame.topic, id = inbound.id(), "received message");
            return Ok(inbound);
        }
    }
}
