//! Same-process connection resolution.

use crate::{
    endpoint::Endpoint,
    handler::{
        same_handler, unless_missing, HandlerError, InterfaceHandler, SharedConnectionHandler,
        SharedInterfaceHandler, SharedListenHandler,
    },
    network::{Network, Port},
};
use dashmap::DashMap;
use std::sync::Arc;

/// An [`InterfaceHandler`] that resolves every connection inside the local
/// process: connecting to an address that is listening on the same network
/// accepts immediately through that listener, with no fabric in between.
#[derive(Default)]
pub struct LoopbackHandler {
    listeners: DashMap<Endpoint, (Arc<Port>, SharedListenHandler)>,
}

impl LoopbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedInterfaceHandler {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl InterfaceHandler for LoopbackHandler {
    async fn on_connect(
        &self,
        _port: Arc<Port>,
        local_addr: Endpoint,
        remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        let (port, listener) = match self.listeners.get(&remote_addr) {
            Some(entry) => entry.value().clone(),
            None => return Err(HandlerError::Refused),
        };
        // From the listener's point of view the dialed address is local and
        // the dialer's address is remote.
        match listener.on_accept(port, remote_addr, local_addr).await {
            Err(HandlerError::NotImplemented) => Err(HandlerError::Refused),
            other => other,
        }
    }

    async fn on_listen(
        &self,
        port: Arc<Port>,
        local_addr: Endpoint,
        listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        self.listeners.insert(local_addr, (port, listener));
        Ok(())
    }

    async fn on_listen_remove(
        &self,
        _port: Arc<Port>,
        local_addr: Endpoint,
        listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        let registered = match self.listeners.get(&local_addr) {
            Some(entry) => entry.value().1.clone(),
            None => {
                return Err(HandlerError::Other(format!(
                    "Nothing is listening at {local_addr}"
                )))
            }
        };
        if !same_handler(&registered, &listener) {
            return Err(HandlerError::Other(format!(
                "The listener at {local_addr} is a different object"
            )));
        }
        self.listeners.remove(&local_addr);
        Ok(())
    }
}

/// Wraps a subordinate interface handler with loopback resolution:
/// lifecycle callbacks reach the subordinate first, while connection
/// attempts are resolved locally before the wider fabric is consulted.
pub struct ExtendedLoopbackHandler {
    loopback: LoopbackHandler,
    subordinate: SharedInterfaceHandler,
}

/// Extends `subordinate` with same-process connection resolution.
pub fn extend_loopback(subordinate: SharedInterfaceHandler) -> SharedInterfaceHandler {
    Arc::new(ExtendedLoopbackHandler {
        loopback: LoopbackHandler::new(),
        subordinate,
    })
}

#[async_trait::async_trait]
impl InterfaceHandler for ExtendedLoopbackHandler {
    async fn on_create(&self, network: Arc<Network>) -> Result<(), HandlerError> {
        unless_missing(self.subordinate.on_create(network.clone()).await)?;
        unless_missing(self.loopback.on_create(network).await)
    }

    async fn on_bind(&self, port: Arc<Port>, local_addr: Endpoint) -> Result<(), HandlerError> {
        unless_missing(
            self.subordinate
                .on_bind(port.clone(), local_addr.clone())
                .await,
        )?;
        unless_missing(self.loopback.on_bind(port, local_addr).await)
    }

    async fn on_listen(
        &self,
        port: Arc<Port>,
        local_addr: Endpoint,
        listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        unless_missing(
            self.subordinate
                .on_listen(port.clone(), local_addr.clone(), listener.clone())
                .await,
        )?;
        unless_missing(self.loopback.on_listen(port, local_addr, listener).await)
    }

    async fn on_listen_remove(
        &self,
        port: Arc<Port>,
        local_addr: Endpoint,
        listener: SharedListenHandler,
    ) -> Result<(), HandlerError> {
        unless_missing(
            self.subordinate
                .on_listen_remove(port.clone(), local_addr.clone(), listener.clone())
                .await,
        )?;
        unless_missing(
            self.loopback
                .on_listen_remove(port, local_addr, listener)
                .await,
        )
    }

    async fn on_connect(
        &self,
        port: Arc<Port>,
        local_addr: Endpoint,
        remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        // Same-process addresses resolve locally before the wider fabric is
        // consulted.
        match self
            .loopback
            .on_connect(port.clone(), local_addr.clone(), remote_addr.clone())
            .await
        {
            Ok(handler) => Ok(handler),
            Err(_) => self.subordinate.on_connect(port, local_addr, remote_addr).await,
        }
    }

    async fn on_revoke(&self, port: Arc<Port>, local_addr: Endpoint) -> Result<(), HandlerError> {
        unless_missing(
            self.subordinate
                .on_revoke(port.clone(), local_addr.clone())
                .await,
        )?;
        unless_missing(self.loopback.on_revoke(port, local_addr).await)
    }
}
