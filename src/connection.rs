//! Connection pairing and the ordered send queue.
//!
//! Two [`Connection`]s are always constructed together as a pair, one half
//! per side of a logical channel; each holds the opposite side's handler as
//! its remote. A freshly built pair is usable for [`send`](Connection::send)
//! immediately, before either handler has been told the channel exists:
//! sends wait in an ordered queue until the network that built the pair
//! invokes [`confirm`](ConnectionPair::confirm), which announces the channel
//! to both handlers and then drains both queues. Packets queued before the
//! confirmation are delivered in the order they were issued, and strictly
//! before anything sent after the confirmation resolves.

use crate::{
    endpoint::Endpoint,
    handler::{unless_missing, HandlerError, SharedConnectionHandler},
    message::Message,
    network::ConnectionTable,
};
use std::{
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};
use thiserror::Error as ThisError;
use tokio::sync::oneshot;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

const CLOSED_REASON: &str = "Connection closed";

/// One endpoint of a bidirectional packet channel between two handlers.
pub struct Connection {
    id: u64,
    local: SharedConnectionHandler,
    remote: SharedConnectionHandler,
    state: Mutex<State>,
    tracker: Mutex<Option<(Weak<ConnectionTable>, Endpoint)>>,
}

/// The life of a connection, in order. `Queuing` ends when the pair is
/// confirmed; `Closed` is terminal.
enum State {
    Queuing(Vec<QueuedSend>),
    Open,
    Closed(String),
}

struct QueuedSend {
    message: Message,
    result: oneshot::Sender<Result<Message, SendError>>,
}

impl Connection {
    fn new(local: SharedConnectionHandler, remote: SharedConnectionHandler) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            local,
            remote,
            state: Mutex::new(State::Queuing(Vec::new())),
            tracker: Mutex::new(None),
        })
    }

    /// Registers this connection in a port's connection table so that
    /// closing it removes it again.
    pub(crate) fn track(self: &Arc<Self>, table: &Arc<ConnectionTable>, key: Endpoint) {
        if let Some(mut set) = table.get_mut(&key) {
            set.insert(self.id, self.clone());
        }
        *self.tracker.lock().unwrap() = Some((Arc::downgrade(table), key));
    }

    fn untrack(&self) {
        let tracker = self.tracker.lock().unwrap().take();
        if let Some((table, key)) = tracker {
            if let Some(table) = table.upgrade() {
                if let Some(mut set) = table.get_mut(&key) {
                    set.remove(&self.id);
                }
            }
        }
    }

    /// Sends a packet to the peer and resolves with the peer's
    /// acknowledgement.
    ///
    /// Until the pair is confirmed the packet waits in the send queue; its
    /// result settles when the queue drains. After confirmation the packet
    /// goes straight to the remote handler's `on_receive`.
    pub async fn send(self: &Arc<Self>, data: impl Into<Message>) -> Result<Message, SendError> {
        let message = data.into();
        let action = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                State::Closed(reason) => SendAction::Rejected(reason.clone()),
                State::Queuing(pending) => {
                    let (tx, rx) = oneshot::channel();
                    pending.push(QueuedSend {
                        message,
                        result: tx,
                    });
                    SendAction::Queued(rx)
                }
                State::Open => SendAction::Transmit(message),
            }
        };
        match action {
            SendAction::Rejected(reason) => Err(SendError::Closed(reason)),
            SendAction::Queued(rx) => rx
                .await
                .unwrap_or_else(|_| Err(SendError::Closed(CLOSED_REASON.to_string()))),
            SendAction::Transmit(message) => self.transmit(message).await,
        }
    }

    async fn transmit(self: &Arc<Self>, message: Message) -> Result<Message, SendError> {
        match self.remote.on_receive(self.clone(), message).await {
            Ok(ack) => Ok(ack),
            // A peer without on_receive still acknowledges, with an empty
            // message.
            Err(HandlerError::NotImplemented) => Ok(Message::default()),
            Err(e) => Err(SendError::Handler(e)),
        }
    }

    /// Closes the connection. Both handlers are notified, and any send still
    /// waiting in the queue is rejected with the close reason. Closing an
    /// already-closed connection is an error.
    pub async fn close(self: &Arc<Self>) -> Result<(), CloseError> {
        self.close_with_reason(CLOSED_REASON).await
    }

    pub(crate) async fn close_with_reason(self: &Arc<Self>, reason: &str) -> Result<(), CloseError> {
        let pending = {
            let mut state = self.state.lock().unwrap();
            if let State::Closed(_) = &*state {
                return Err(CloseError::AlreadyClosed);
            }
            match mem::replace(&mut *state, State::Closed(reason.to_string())) {
                State::Queuing(pending) => pending,
                _ => Vec::new(),
            }
        };
        self.untrack();
        let local = unless_missing(self.local.on_close(self.clone(), reason.to_string()).await);
        let remote = unless_missing(self.remote.on_close(self.clone(), reason.to_string()).await);
        for queued in pending {
            let _ = queued
                .result
                .send(Err(SendError::Closed(reason.to_string())));
        }
        local?;
        remote?;
        Ok(())
    }

    /// Drains the send queue in insertion order, resolving each queued
    /// send's result. Resubmission goes back through
    /// [`send`](Connection::send), so a close that lands mid-drain rejects
    /// whatever has not yet gone out.
    pub(crate) async fn flush(self: &Arc<Self>) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            match mem::replace(&mut *state, State::Open) {
                State::Queuing(pending) => pending,
                other => {
                    *state = other;
                    Vec::new()
                }
            }
        };
        for QueuedSend { message, result } in pending {
            let outcome = self.send(message).await;
            let _ = result.send(outcome);
        }
    }
}

enum SendAction {
    Queued(oneshot::Receiver<Result<Message, SendError>>),
    Transmit(Message),
    Rejected(String),
}

/// The two halves of one logical channel, created together and confirmed as
/// a single step by the network that paired them.
pub struct ConnectionPair {
    pub local: Arc<Connection>,
    pub remote: Arc<Connection>,
}

/// Builds both halves of a channel between two connection handlers. Each
/// half believes the other is remote.
pub fn make_connection_pair(
    handler_a: SharedConnectionHandler,
    handler_b: SharedConnectionHandler,
) -> ConnectionPair {
    let local = Connection::new(handler_a.clone(), handler_b.clone());
    let remote = Connection::new(handler_b, handler_a);
    ConnectionPair { local, remote }
}

impl ConnectionPair {
    /// Announces the channel to both handlers and drains both send queues.
    ///
    /// `on_open` is dispatched to both sides before either queue is
    /// flushed, so a handler always learns about its connection before
    /// packets arrive on it. The notification is fire-and-forget; the flush
    /// is awaited.
    pub async fn confirm(&self) {
        notify_open(self.local.clone());
        notify_open(self.remote.clone());
        self.local.flush().await;
        self.remote.flush().await;
    }
}

fn notify_open(connection: Arc<Connection>) {
    let handler = connection.local.clone();
    tokio::spawn(async move {
        match handler.on_open(connection).await {
            Ok(()) | Err(HandlerError::NotImplemented) => {}
            Err(e) => tracing::error!("Failed to notify a handler of its open connection: {}", e),
        }
    });
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection was closed before or while the send was in flight.
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("The remote handler failed to receive: {0}")]
    Handler(#[from] HandlerError),
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum CloseError {
    #[error("Connection already closed")]
    AlreadyClosed,
    #[error("A handler failed while the connection was closing: {0}")]
    Handler(#[from] HandlerError),
}
