#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wcb_common::cipher;
use wcb_common::frame::{Frame, FrameKind};
use wcb_common::pairing::PairingUri;
use wcb_common::{SymmetricKey, Topic};
use wcbc::config::ClientConfig;
use wcbc::dispatcher::{Dispatcher, Notification};
use wcbc::relay::RelayConnection;
use wcbc::shard::RandomShard;

/// Topic table of the in-process relay.
#[derive(Default)]
struct Topics {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
    /// Published before anyone subscribed; flushed to the first subscriber.
    parked: HashMap<String, Vec<String>>,
    conns: Vec<mpsc::UnboundedSender<Message>>,
}

/// Minimal pub/sub bridge: forwards `pub` frames to every subscriber of the
/// topic and parks them until someone subscribes.
#[derive(Clone)]
pub struct TestRelay {
    pub addr: SocketAddr,
    topics: Arc<Mutex<Topics>>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let topics = Arc::new(Mutex::new(Topics::default()));

        let state = Arc::clone(&topics);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_conn(stream, Arc::clone(&state)));
            }
        });

        Self { addr, topics }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Sends a close frame on every open connection.
    pub fn disconnect_all(&self) {
        let mut topics = self.topics.lock().unwrap();
        for conn in topics.conns.drain(..) {
            let _ = conn.send(Message::Close(None));
        }
        topics.subscribers.clear();
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .subscribers
            .get(topic)
            .map_or(0, Vec::len)
    }
}

async fn serve_conn(stream: TcpStream, topics: Arc<Mutex<Topics>>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    topics.lock().unwrap().conns.push(tx.clone());

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = Frame::parse(text.as_bytes()) else {
            continue;
        };
        let topic = frame.topic.to_string();
        let mut state = topics.lock().unwrap();
        match frame.kind {
            FrameKind::Sub => {
                if let Some(parked) = state.parked.remove(&topic) {
                    for text in parked {
                        let _ = tx.send(Message::Text(text));
                    }
                }
                state.subscribers.entry(topic).or_default().push(tx.clone());
            }
            FrameKind::Pub => {
                let subs = state.subscribers.get(&topic).cloned().unwrap_or_default();
                if subs.is_empty() {
                    state.parked.entry(topic).or_default().push(text);
                } else {
                    for sub in subs {
                        let _ = sub.send(Message::Text(text.clone()));
                    }
                }
            }
            FrameKind::Other => {}
        }
    }
}

pub fn client_config(relay: &TestRelay) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.relay.host = Some(relay.host());
    config.relay.secure = false;
    config.keepalive.interval_s = 0;
    config
}

pub async fn connect_client(
    relay: &TestRelay,
    key: Option<SymmetricKey>,
) -> (Dispatcher, mpsc::Receiver<Notification>) {
    let config = client_config(relay);
    let (conn, reader) = RelayConnection::connect(&config, key, &RandomShard)
        .await
        .unwrap();
    Dispatcher::spawn(conn, reader, config.notifications.capacity)
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Scripted wallet speaking the bridge protocol directly.
pub struct TestWallet {
    ws_tx: futures_util::stream::SplitSink<WsStream, Message>,
    ws_rx: futures_util::stream::SplitStream<WsStream>,
    pub key: SymmetricKey,
}

impl TestWallet {
    pub async fn connect(addr: &SocketAddr, key: SymmetricKey) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx, key }
    }

    /// Connects using the key from a pairing URI and subscribes to its
    /// handshake topic.
    pub async fn from_pairing_url(addr: &SocketAddr, url: &str) -> (Self, PairingUri) {
        let uri: PairingUri = url.parse().unwrap();
        let mut wallet = Self::connect(addr, uri.key.clone()).await;
        wallet.subscribe(&uri.topic).await;
        (wallet, uri)
    }

    pub async fn subscribe(&mut self, topic: &Topic) {
        let text = Frame::subscribe(topic).serialize().unwrap();
        self.ws_tx.send(Message::Text(text)).await.unwrap();
        // Let the relay register the subscription before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    pub async fn publish_with_key(&mut self, topic: &Topic, body: &Value, key: &SymmetricKey) {
        let plaintext = serde_json::to_vec(body).unwrap();
        let envelope = cipher::encrypt(&plaintext, key, &cipher::random_iv()).unwrap();
        let text = Frame::publish(topic, &envelope).unwrap().serialize().unwrap();
        self.ws_tx.send(Message::Text(text)).await.unwrap();
    }

    pub async fn publish(&mut self, topic: &Topic, body: &Value) {
        let key = self.key.clone();
        self.publish_with_key(topic, body, &key).await;
    }

    /// Next decrypted JSON message.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for message")
                .unwrap()
                .unwrap();
            let Message::Text(text) = msg else { continue };
            let frame = Frame::parse(text.as_bytes()).unwrap();
            let plaintext = cipher::decrypt(&frame.envelope().unwrap(), &self.key).unwrap();
            return serde_json::from_slice(&plaintext).unwrap();
        }
    }
}

/// Waits for `cond` to hold, polling briefly.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
