//! The capability traits that customize a network.
//!
//! A [`Network`](crate::Network) holds no state inside its handlers; it only
//! invokes their callbacks, awaiting each one before the initiating
//! operation settles. Every callback has a default body returning
//! [`HandlerError::NotImplemented`], so an implementor overrides only the
//! callbacks it cares about. "Not implemented" is a typed state: each call
//! site in this crate decides explicitly whether absence means a no-op
//! success, an empty acknowledgement, or a refusal.

use crate::{connection::Connection, endpoint::Endpoint, message::Message, network::Network, Port};
use std::sync::Arc;
use thiserror::Error as ThisError;

/// A shared handle to a [`ConnectionHandler`].
pub type SharedConnectionHandler = Arc<dyn ConnectionHandler>;

/// A shared handle to a [`ListenHandler`].
pub type SharedListenHandler = Arc<dyn ListenHandler>;

/// A shared handle to an [`InterfaceHandler`].
pub type SharedInterfaceHandler = Arc<dyn InterfaceHandler>;

/// Receives per-packet and lifecycle notifications for one connection.
#[async_trait::async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called once when the connection pair is confirmed, before any queued
    /// packet is delivered.
    async fn on_open(&self, _connection: Arc<Connection>) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called with each packet the peer sends. The returned message travels
    /// back to the sender as the acknowledgement; a handler that leaves this
    /// unimplemented acknowledges every packet with an empty message.
    async fn on_receive(
        &self,
        _connection: Arc<Connection>,
        _message: Message,
    ) -> Result<Message, HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called once when the connection closes, with the close reason.
    async fn on_close(&self, _connection: Arc<Connection>, _reason: String) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }
}

/// Decides how a listening port responds to inbound connection attempts.
#[async_trait::async_trait]
pub trait ListenHandler: Send + Sync + 'static {
    /// Called when the listener has been registered at `local_addr`.
    async fn on_listen(&self, _port: Arc<Port>, _local_addr: Endpoint) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Decides whether to accept an inbound attempt from `remote_addr`,
    /// returning the connection handler for the accepted connection. This is
    /// the one callback a useful listener must implement; leaving it
    /// unimplemented refuses every attempt.
    async fn on_accept(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called after this listener refused an attempt from `remote_addr`.
    async fn on_reject(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _remote_addr: Endpoint,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called when accepting an attempt failed outright.
    async fn on_error(&self, _port: Arc<Port>, _error: String) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called when the listener has been deregistered.
    async fn on_remove(&self, _port: Arc<Port>, _local_addr: Endpoint) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }
}

/// Customizes an entire [`Network`]: address policy, connection acceptance,
/// and revocation. The network supplies the mechanism (registries, queuing,
/// error checking); the interface handler supplies the policy.
#[async_trait::async_trait]
pub trait InterfaceHandler: Send + Sync + 'static {
    /// Called once, while the network is being constructed.
    async fn on_create(&self, _network: Arc<Network>) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Approves a `bind` before the port is registered.
    async fn on_bind(&self, _port: Arc<Port>, _local_addr: Endpoint) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Approves a listener registration at `local_addr`.
    async fn on_listen(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Approves a listener removal at `local_addr`.
    async fn on_listen_remove(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Resolves an outbound connection attempt, returning the remote side's
    /// connection handler. Leaving this unimplemented refuses every attempt.
    async fn on_connect(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        Err(HandlerError::NotImplemented)
    }

    /// Called while a port is being revoked, before its connections close.
    async fn on_revoke(&self, _port: Arc<Port>, _local_addr: Endpoint) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler does not implement this callback. Call sites map this to
    /// their own notion of absence instead of surfacing it to callers.
    #[error("The handler does not implement this callback")]
    NotImplemented,
    #[error("Connection refused")]
    Refused,
    #[error("{0}")]
    Other(String),
}

/// Collapses the absence of an optional callback into a successful no-op.
pub(crate) fn unless_missing(result: Result<(), HandlerError>) -> Result<(), HandlerError> {
    match result {
        Err(HandlerError::NotImplemented) => Ok(()),
        other => other,
    }
}

/// Whether two handler references point at the same object. Compares data
/// pointers only, so the comparison is not confused by vtables.
pub(crate) fn same_handler<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
