//! Ports: claimed endpoints with listening and connecting capabilities.

use super::{ConnectError, Network};
use crate::{
    connection::Connection,
    endpoint::Endpoint,
    handler::{same_handler, unless_missing, HandlerError, SharedConnectionHandler, SharedListenHandler},
};
use futures::future::join_all;
use std::sync::{Arc, RwLock};
use thiserror::Error as ThisError;

pub(crate) const REVOKED_REASON: &str = "Port revoked";

/// How far along the one-way revocation path a port is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevokeState {
    NotRevoked,
    /// `on_revoke` is in flight; the port no longer accepts work.
    Revoking,
    Revoked,
}

/// A claimed [`Endpoint`].
///
/// Ports are created by [`Network::bind`] and stay registered with their
/// network until [`revoke`](Port::revoke) tears them down. The endpoint
/// itself remains readable for the port's whole life, revoked or not.
pub struct Port {
    local_addr: Endpoint,
    network: Arc<Network>,
    state: RwLock<RevokeState>,
}

impl Port {
    pub(super) fn new(local_addr: Endpoint, network: Arc<Network>) -> Arc<Self> {
        Arc::new(Self {
            local_addr,
            network,
            state: RwLock::new(RevokeState::NotRevoked),
        })
    }

    /// The endpoint this port is bound to.
    pub fn local_address(&self) -> Endpoint {
        self.local_addr.clone()
    }

    fn is_revoked(&self) -> bool {
        *self.state.read().unwrap() != RevokeState::NotRevoked
    }

    /// Registers the listener that fields inbound connection attempts at
    /// this endpoint. At most one listener may be active per endpoint;
    /// listener multiplexing is not provided.
    pub async fn add_listener(self: &Arc<Self>, listener: SharedListenHandler) -> Result<(), ListenError> {
        if self.is_revoked() {
            return Err(ListenError::Revoked(self.local_addr.clone()));
        }
        if self.network.listening.contains_key(&self.local_addr) {
            return Err(ListenError::AlreadyListening(self.local_addr.clone()));
        }
        unless_missing(
            self.network
                .handler
                .on_listen(self.clone(), self.local_addr.clone(), listener.clone())
                .await,
        )?;
        self.network
            .listening
            .insert(self.local_addr.clone(), (self.clone(), listener.clone()));
        unless_missing(listener.on_listen(self.clone(), self.local_addr.clone()).await)?;
        Ok(())
    }

    /// Deregisters `listener`. Fails if nothing is listening here or if the
    /// registered listener is a different object, in which case the
    /// registered listener is left untouched.
    pub async fn remove_listener(
        self: &Arc<Self>,
        listener: &SharedListenHandler,
    ) -> Result<(), ListenError> {
        let registered = match self.network.listening.get(&self.local_addr) {
            Some(entry) => entry.value().1.clone(),
            None => return Err(ListenError::NoneListening(self.local_addr.clone())),
        };
        if !same_handler(&registered, listener) {
            return Err(ListenError::WrongListener(self.local_addr.clone()));
        }
        unless_missing(
            self.network
                .handler
                .on_listen_remove(self.clone(), self.local_addr.clone(), registered.clone())
                .await,
        )?;
        self.network.listening.remove(&self.local_addr);
        unless_missing(registered.on_remove(self.clone(), self.local_addr.clone()).await)?;
        Ok(())
    }

    /// Originates a connection to `remote_addr`, handled on this side by
    /// `handler`. Resolves once the pair is confirmed; packets sent on the
    /// returned connection go straight to the peer.
    pub async fn connect(
        self: &Arc<Self>,
        remote_addr: impl Into<Endpoint>,
        handler: SharedConnectionHandler,
    ) -> Result<Arc<Connection>, ConnectError> {
        if self.is_revoked() {
            return Err(ConnectError::Revoked(self.local_addr.clone()));
        }
        let pair = self
            .network
            .outbound(self, remote_addr.into(), handler)
            .await?;
        // The port may have been revoked while the handshake was in flight;
        // the fresh pair is closed instead of exposed.
        if self.is_revoked() {
            let _ = pair.local.close_with_reason(REVOKED_REASON).await;
            let _ = pair.remote.close_with_reason(REVOKED_REASON).await;
            return Err(ConnectError::Revoked(self.local_addr.clone()));
        }
        pair.confirm().await;
        Ok(pair.local.clone())
    }

    /// Tears the port down: closes its open connections, removes its
    /// listener, and releases the endpoint for rebinding. Revoking an
    /// already-revoked port is an error.
    pub async fn revoke(self: &Arc<Self>) -> Result<String, RevokeError> {
        {
            let mut state = self.state.write().unwrap();
            if *state == RevokeState::Revoked {
                return Err(RevokeError::AlreadyRevoked(self.local_addr.clone()));
            }
            *state = RevokeState::Revoking;
        }
        unless_missing(
            self.network
                .handler
                .on_revoke(self.clone(), self.local_addr.clone())
                .await,
        )?;
        *self.state.write().unwrap() = RevokeState::Revoked;

        let connections: Vec<Arc<Connection>> = self
            .network
            .connections
            .get(&self.local_addr)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default();
        let closes = join_all(connections.iter().map(|connection| async move {
            if let Err(e) = connection.close_with_reason(REVOKED_REASON).await {
                tracing::error!("Failed to close a connection during revocation: {}", e);
            }
        }));
        let listener = self
            .network
            .listening
            .get(&self.local_addr)
            .map(|entry| entry.value().1.clone());
        let removal = async {
            if let Some(listener) = listener {
                if let Err(e) = self.remove_listener(&listener).await {
                    tracing::error!("Failed to remove the listener during revocation: {}", e);
                }
            }
        };
        futures::join!(closes, removal);

        self.network.bound_ports.remove(&self.local_addr);
        self.network.connections.remove(&self.local_addr);
        Ok(format!("Port {} revoked", self.local_addr))
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ListenError {
    #[error("Port {0} is revoked")]
    Revoked(Endpoint),
    #[error("Endpoint {0} already has a listener")]
    AlreadyListening(Endpoint),
    #[error("Nothing is listening at {0}")]
    NoneListening(Endpoint),
    #[error("The listener at {0} is a different object")]
    WrongListener(Endpoint),
    #[error("A handler failed while changing the listener: {0}")]
    Handler(#[from] HandlerError),
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum RevokeError {
    #[error("Port {0} is already revoked")]
    AlreadyRevoked(Endpoint),
    #[error("The interface handler failed to revoke: {0}")]
    Handler(#[from] HandlerError),
}
