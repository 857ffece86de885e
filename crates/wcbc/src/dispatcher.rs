//! Request/response correlation over one bridge connection.
//!
//! Outbound requests get ids from an atomic counter. Callers that want an
//! answer register a [`Continuation`] under that id *before* the request is
//! published. A single background task owns the [`RelayReader`], decodes every
//! inbound message and either hands it to the matching continuation (at most
//! once) or forwards it to the notification channel.
//!
//! When the read side fails the loop resolves every outstanding continuation
//! with [`BridgeError::ConnectionClosed`], refuses further registrations and
//! flips [`ConnStatus`] to `Closed`. Dropping the last [`Dispatcher`] does the
//! same.
//!
//! Each continuation leaves the table once, under the table lock, whoever
//! gets there first: the read loop, a deadline, a dropped
//! [`PendingResponse`] or teardown. Leaving the table cancels its deadline
//! timer.

use crate::error::BridgeError;
use crate::relay::{RelayConnection, RelayReader};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use wcb_common::rpc::{Inbound, PeerRequest, Request, RequestHeader, Response};
use wcb_common::session::SessionUpdateParams;
use wcb_common::Topic;

/// Outcome delivered to a continuation.
pub type Outcome = Result<Response, BridgeError>;

/// Boxed one-shot response handler.
pub type Handler = Box<dyn FnOnce(Outcome) -> Result<(), BridgeError> + Send + 'static>;

/// What to do with the response for one request id.
pub enum Continuation {
    /// Hand the outcome to a waiting [`PendingResponse`].
    Channel(oneshot::Sender<Outcome>),
    /// Run a handler on a freshly spawned task.
    Callback(Handler),
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("Continuation::Channel"),
            Self::Callback(_) => f.write_str("Continuation::Callback"),
        }
    }
}

impl Continuation {
    fn deliver(self, id: u64, outcome: Outcome) {
        match self {
            Self::Channel(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(id, "response dropped: caller stopped waiting");
                }
            }
            Self::Callback(handler) => {
                let run = move || {
                    if let Err(e) = handler(outcome) {
                        warn!(id, error = %e, "response handler failed");
                    }
                };
                // Teardown from a drop may happen outside the runtime.
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { run() });
                    }
                    Err(_) => run(),
                }
            }
        }
    }
}

/// Connection state published by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// The read loop is running.
    Connected,
    /// The read loop has ended; no further responses will arrive.
    Closed,
}

/// Message the peer sent without being asked.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Approval state or account list changed.
    SessionUpdate {
        /// Request header as sent by the peer.
        header: RequestHeader,
        /// Decoded first parameter.
        params: SessionUpdateParams,
    },
    /// Any other peer-initiated request.
    Request(PeerRequest),
}

struct Entry {
    continuation: Continuation,
    deadline: Option<AbortHandle>,
}

impl Entry {
    fn into_continuation(self) -> Continuation {
        if let Some(timer) = self.deadline {
            timer.abort();
        }
        self.continuation
    }
}

#[derive(Default)]
struct TableInner {
    entries: HashMap<u64, Entry>,
    closed: bool,
}

/// Request id → continuation map.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<TableInner>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `continuation` under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConnectionClosed`] once the table has been torn
    /// down and [`BridgeError::DuplicateId`] if `id` is already pending.
    pub fn insert(&self, id: u64, continuation: Continuation) -> Result<(), BridgeError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BridgeError::ConnectionClosed);
        }
        if inner.entries.contains_key(&id) {
            return Err(BridgeError::DuplicateId(id));
        }
        inner.entries.insert(
            id,
            Entry {
                continuation,
                deadline: None,
            },
        );
        Ok(())
    }

    /// Attaches a deadline timer to a still-pending entry. Returns `false`
    /// if the entry is already gone.
    fn arm_deadline(&self, id: u64, timer: AbortHandle) -> bool {
        match self.lock().entries.get_mut(&id) {
            Some(entry) => {
                entry.deadline = Some(timer);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the continuation for `id`, cancelling its
    /// deadline timer if it has one.
    pub fn take(&self, id: u64) -> Option<Continuation> {
        self.lock().entries.remove(&id).map(Entry::into_continuation)
    }

    /// Removal by the deadline timer itself, which must not abort its own
    /// task.
    fn expire(&self, id: u64) -> Option<Continuation> {
        self.lock().entries.remove(&id).map(|e| e.continuation)
    }

    /// Whether `id` has a running deadline timer.
    #[must_use]
    pub fn has_deadline(&self, id: u64) -> bool {
        self.lock()
            .entries
            .get(&id)
            .is_some_and(|e| e.deadline.is_some())
    }

    /// Marks the table closed and drains every entry.
    pub fn close_all(&self) -> Vec<(u64, Continuation)> {
        let mut inner = self.lock();
        inner.closed = true;
        inner
            .entries
            .drain()
            .map(|(id, e)| (id, e.into_continuation()))
            .collect()
    }

    /// Whether `id` is still waiting for a response.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Number of outstanding continuations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True after teardown.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Handle for one in-flight request. Dropping it abandons the request and
/// removes its table entry.
#[must_use = "dropping a PendingResponse abandons the request"]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    pending: Arc<PendingTable>,
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse").field("id", &self.id).finish()
    }
}

impl PendingResponse {
    /// Request id this handle waits on.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConnectionClosed`] if the connection ends first.
    pub async fn recv(mut self) -> Outcome {
        (&mut self.rx)
            .await
            .unwrap_or(Err(BridgeError::ConnectionClosed))
    }

    /// Waits at most `deadline` for the response.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Timeout`] when the deadline passes; the table
    /// entry is removed and a late response is treated as unhandled.
    pub async fn recv_timeout(self, deadline: Duration) -> Outcome {
        tokio::time::timeout(deadline, self.recv())
            .await
            .unwrap_or(Err(BridgeError::Timeout))
    }

    /// [`recv_timeout`](Self::recv_timeout) when `deadline` is set, otherwise
    /// [`recv`](Self::recv).
    ///
    /// # Errors
    ///
    /// See [`recv`](Self::recv) and [`recv_timeout`](Self::recv_timeout).
    pub async fn recv_opt(self, deadline: Option<Duration>) -> Outcome {
        match deadline {
            Some(d) => self.recv_timeout(d).await,
            None => self.recv().await,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.pending.take(self.id).is_some() {
            debug!(id = self.id, "request abandoned");
        }
    }
}

struct Shared {
    conn: Arc<RelayConnection>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    status: watch::Receiver<ConnStatus>,
    read_loop: JoinHandle<BridgeError>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.read_loop.abort();
        // The aborted loop never reaches its own teardown.
        teardown(&self.pending);
    }
}

/// Cloneable front end for issuing requests over one connection.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("conn", &self.shared.conn)
            .field("pending", &self.shared.pending.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Starts the dispatch loop on `reader` and returns the request handle
    /// together with the channel receiving unsolicited peer messages.
    ///
    /// `notify_capacity` must be non-zero.
    pub fn spawn(
        conn: Arc<RelayConnection>,
        reader: RelayReader,
        notify_capacity: usize,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let pending = Arc::new(PendingTable::default());
        let (notify_tx, notify_rx) = mpsc::channel(notify_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(ConnStatus::Connected);
        let read_loop = tokio::spawn(run_dispatch_loop(
            reader,
            Arc::clone(&pending),
            notify_tx,
            status_tx,
        ));

        let shared = Arc::new(Shared {
            conn,
            pending,
            next_id: AtomicU64::new(1),
            status: status_rx,
            read_loop,
        });
        (Self { shared }, notify_rx)
    }

    /// Allocates the next request id. Ids start at 1 and never repeat on one
    /// dispatcher.
    pub fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<RelayConnection> {
        &self.shared.conn
    }

    /// Outstanding continuations.
    #[must_use]
    pub fn pending(&self) -> &PendingTable {
        &self.shared.pending
    }

    /// Watch channel that flips to [`ConnStatus::Closed`] when the read loop
    /// ends.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnStatus> {
        self.shared.status.clone()
    }

    /// Resolves once the read loop has ended.
    pub async fn closed(&self) {
        let mut status = self.status();
        // Err only if the loop task is gone, which also means closed.
        let _ = status.wait_for(|s| *s == ConnStatus::Closed).await;
    }

    /// Subscribes the connection to `topic`.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the frame cannot be written.
    pub async fn subscribe(&self, topic: &Topic) -> Result<(), BridgeError> {
        self.shared.conn.subscribe(topic).await
    }

    async fn publish(
        &self,
        topic: &Topic,
        id: u64,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(), BridgeError> {
        let body = Request::new(id, method, params).to_bytes()?;
        self.shared.conn.publish(topic, &body).await?;
        debug!(id, method, %topic, "request sent");
        Ok(())
    }

    /// Publishes a request without waiting for any response.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the request cannot be encoded or written.
    pub async fn send(
        &self,
        topic: &Topic,
        method: &str,
        params: Vec<Value>,
    ) -> Result<u64, BridgeError> {
        let id = self.next_id();
        self.publish(topic, id, method, params).await?;
        Ok(id)
    }

    /// Registers a continuation for `id`.
    ///
    /// A response that arrives before registration is treated as unhandled,
    /// so register before publishing.
    ///
    /// # Errors
    ///
    /// Fails after teardown or when `id` is already pending.
    pub fn register(&self, id: u64, continuation: Continuation) -> Result<(), BridgeError> {
        self.shared.pending.insert(id, continuation)
    }

    /// Like [`register`](Self::register), but resolves the continuation with
    /// [`BridgeError::Timeout`] if no response arrives within `deadline`.
    /// The timer is cancelled as soon as the entry leaves the table.
    ///
    /// # Errors
    ///
    /// Fails after teardown or when `id` is already pending.
    pub fn register_with_deadline(
        &self,
        id: u64,
        continuation: Continuation,
        deadline: Duration,
    ) -> Result<(), BridgeError> {
        self.register(id, continuation)?;
        let pending = Arc::clone(&self.shared.pending);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(continuation) = pending.expire(id) {
                debug!(id, "request deadline passed");
                continuation.deliver(id, Err(BridgeError::Timeout));
            }
        })
        .abort_handle();

        if !self.shared.pending.arm_deadline(id, timer.clone()) {
            // Answered or expired before the timer was attached.
            timer.abort();
        }
        Ok(())
    }

    /// Registers a waiter, then publishes the request.
    ///
    /// # Errors
    ///
    /// Fails if registration or publishing fails; the table entry is removed
    /// in either case.
    pub async fn call(
        &self,
        topic: &Topic,
        method: &str,
        params: Vec<Value>,
    ) -> Result<PendingResponse, BridgeError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.register(id, Continuation::Channel(tx))?;
        let waiter = PendingResponse {
            id,
            rx,
            pending: Arc::clone(&self.shared.pending),
        };
        self.publish(topic, id, method, params).await?;
        Ok(waiter)
    }

    /// Registers `handler`, then publishes the request. The handler runs on
    /// its own task with the response, or with an error on teardown or when
    /// `deadline` passes.
    ///
    /// # Errors
    ///
    /// Fails if registration or publishing fails; the handler is then dropped
    /// without being called.
    pub async fn call_with<F>(
        &self,
        topic: &Topic,
        method: &str,
        params: Vec<Value>,
        deadline: Option<Duration>,
        handler: F,
    ) -> Result<u64, BridgeError>
    where
        F: FnOnce(Outcome) -> Result<(), BridgeError> + Send + 'static,
    {
        let id = self.next_id();
        let continuation = Continuation::Callback(Box::new(handler));
        match deadline {
            Some(d) => self.register_with_deadline(id, continuation, d)?,
            None => self.register(id, continuation)?,
        }
        if let Err(e) = self.publish(topic, id, method, params).await {
            self.shared.pending.take(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Sends a close frame to the bridge. The read loop ends once the bridge
    /// acknowledges, resolving everything still pending.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if the close frame cannot be written.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        self.shared.conn.close().await
    }
}

/// Routes one decoded message. Never fails: anything that cannot be routed is
/// logged and dropped.
pub(crate) fn route_inbound(
    pending: &PendingTable,
    notify: &mpsc::Sender<Notification>,
    inbound: Inbound,
) {
    match inbound {
        Inbound::Response(resp) => {
            let id = resp.header.id;
            match pending.take(id) {
                Some(continuation) => continuation.deliver(id, Ok(resp)),
                None => debug!(id, "unhandled response"),
            }
        }
        Inbound::SessionUpdate(req) => match req.first_param::<SessionUpdateParams>() {
            Ok(params) => {
                info!(
                    approved = params.approved,
                    accounts = params.accounts.len(),
                    "session update"
                );
                forward(
                    notify,
                    Notification::SessionUpdate {
                        header: req.header,
                        params,
                    },
                );
            }
            Err(e) => warn!(error = %e, "malformed session update dropped"),
        },
        Inbound::Request(req) => {
            debug!(method = %req.header.method, id = req.header.id, "peer request");
            forward(notify, Notification::Request(req));
        }
    }
}

fn forward(notify: &mpsc::Sender<Notification>, notification: Notification) {
    match notify.try_send(notification) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("notification channel full, dropping unsolicited message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("no notification receiver, dropping unsolicited message");
        }
    }
}

/// Reads until the connection fails, routing every message.
///
/// Responses are taken from the table in arrival order; callback handlers run
/// on separate tasks, so their completion order is unspecified. Returns the
/// error that ended the loop after every pending continuation has been
/// resolved with [`BridgeError::ConnectionClosed`].
pub async fn run_dispatch_loop(
    mut reader: RelayReader,
    pending: Arc<PendingTable>,
    notify: mpsc::Sender<Notification>,
    status: watch::Sender<ConnStatus>,
) -> BridgeError {
    let err = loop {
        match reader.read_next().await {
            Ok(inbound) => route_inbound(&pending, &notify, inbound),
            Err(e) => break e,
        }
    };

    match err {
        BridgeError::ConnectionClosed => info!("bridge connection closed"),
        ref e => error!(error = %e, "dispatch loop terminated"),
    }
    teardown(&pending);
    status.send_replace(ConnStatus::Closed);
    err
}

fn teardown(pending: &PendingTable) {
    let drained = pending.close_all();
    if !drained.is_empty() {
        info!(count = drained.len(), "resolving pending requests after close");
    }
    for (id, continuation) in drained {
        continuation.deliver(id, Err(BridgeError::ConnectionClosed));
    }
}
