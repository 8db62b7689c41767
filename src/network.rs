//! The top-level network: turns an [`InterfaceHandler`] into a live `bind`
//! entry point.

use crate::{
    connection::{make_connection_pair, Connection, ConnectionPair},
    endpoint::Endpoint,
    handler::{
        unless_missing, HandlerError, SharedConnectionHandler, SharedInterfaceHandler,
        SharedListenHandler,
    },
};
use dashmap::{mapref::entry::Entry, DashMap};
use rustc_hash::FxHashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error as ThisError;

pub mod port;
pub use port::Port;

/// Open connections per bound endpoint, keyed by connection id.
pub(crate) type ConnectionTable = DashMap<Endpoint, FxHashMap<u64, Arc<Connection>>>;

/// A single network fabric: the mechanism side of the port lifecycle.
///
/// A `Network` pairs a policy object (its [`InterfaceHandler`]) with the
/// registries and error checking every fabric needs: which endpoints are
/// bound, who is listening where, and which connections each port has open.
/// Handler code never mutates those registries directly; it only observes
/// them through callback arguments. Multiple independent `Network`s can
/// share one namespace behind a [`RoutedNetwork`](crate::RoutedNetwork).
pub struct Network {
    handler: SharedInterfaceHandler,
    bound_ports: DashMap<Endpoint, Arc<Port>>,
    listening: DashMap<Endpoint, (Arc<Port>, SharedListenHandler)>,
    connections: Arc<ConnectionTable>,
    nonce: RwLock<u64>,
}

impl Network {
    /// Creates a network customized by the given interface handler. The
    /// handler's `on_create` has settled by the time this returns, so policy
    /// initialization is complete before the first `bind` can be issued.
    pub async fn new(handler: SharedInterfaceHandler) -> Result<Arc<Self>, HandlerError> {
        let network = Arc::new(Self {
            handler: handler.clone(),
            bound_ports: DashMap::new(),
            listening: DashMap::new(),
            connections: Arc::new(DashMap::new()),
            nonce: RwLock::new(0),
        });
        unless_missing(handler.on_create(network.clone()).await)?;
        Ok(network)
    }

    /// Claims an endpoint and returns the port for it.
    ///
    /// An endpoint ending in `/` allocates a fresh name under that prefix;
    /// a concrete endpoint fails if a port already exists there.
    pub async fn bind(self: &Arc<Self>, local_addr: impl Into<Endpoint>) -> Result<Arc<Port>, BindError> {
        let requested = local_addr.into();
        let local_addr = if requested.is_auto() {
            loop {
                let nonce = {
                    let mut nonce = self.nonce.write().unwrap();
                    *nonce += 1;
                    *nonce
                };
                let candidate = requested.child(&format!("port{nonce}"));
                if !self.bound_ports.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            if self.bound_ports.contains_key(&requested) {
                return Err(BindError::AlreadyBound(requested));
            }
            requested
        };
        let port = Port::new(local_addr.clone(), self.clone());
        unless_missing(self.handler.on_bind(port.clone(), local_addr.clone()).await)?;
        match self.bound_ports.entry(local_addr.clone()) {
            Entry::Occupied(_) => Err(BindError::AlreadyBound(local_addr)),
            Entry::Vacant(entry) => {
                entry.insert(port.clone());
                self.connections.insert(local_addr, FxHashMap::default());
                Ok(port)
            }
        }
    }

    /// Originates a connection from `port` to `remote_addr`.
    ///
    /// Policy (the interface handler's `on_connect`) supplies the remote
    /// side's connection handler; the returned pair is tracked under the
    /// port but not yet confirmed. [`Port::connect`] is the usual caller and
    /// confirms the pair once it has re-checked the port's state.
    pub async fn outbound(
        self: &Arc<Self>,
        port: &Arc<Port>,
        remote_addr: Endpoint,
        local_handler: SharedConnectionHandler,
    ) -> Result<ConnectionPair, ConnectError> {
        let local_addr = port.local_address();
        let remote_handler = match self
            .handler
            .on_connect(port.clone(), local_addr.clone(), remote_addr)
            .await
        {
            Ok(handler) => handler,
            Err(HandlerError::Refused | HandlerError::NotImplemented) => {
                return Err(ConnectError::Refused)
            }
            Err(e) => return Err(ConnectError::Handler(e)),
        };
        let pair = make_connection_pair(local_handler, remote_handler);
        self.track(&local_addr, &pair);
        Ok(pair)
    }

    /// Accepts an inbound connection attempt arriving from a remote fabric.
    ///
    /// `listen_search` is an ordered candidate list of local endpoints; the
    /// first one with an active listener fields the attempt. Producing that
    /// list is caller policy (a routed fabric passes its matched prefixes,
    /// most specific first). The returned connection is the remote side's
    /// half, already confirmed.
    pub async fn inbound(
        self: &Arc<Self>,
        listen_search: &[Endpoint],
        local_addr: Endpoint,
        remote_addr: Endpoint,
        remote_handler: SharedConnectionHandler,
    ) -> Result<Arc<Connection>, ConnectError> {
        let (port, listener) = listen_search
            .iter()
            .find_map(|candidate| self.listening.get(candidate).map(|entry| entry.value().clone()))
            .ok_or(ConnectError::Refused)?;
        let local_handler = match listener
            .on_accept(port.clone(), local_addr.clone(), remote_addr.clone())
            .await
        {
            Ok(handler) => handler,
            Err(HandlerError::NotImplemented) => return Err(ConnectError::Refused),
            Err(HandlerError::Refused) => {
                if let Err(e) =
                    unless_missing(listener.on_reject(port.clone(), local_addr, remote_addr).await)
                {
                    tracing::error!("Listener failed while rejecting a connection: {}", e);
                }
                return Err(ConnectError::Refused);
            }
            Err(e) => {
                if let Err(report) =
                    unless_missing(listener.on_error(port.clone(), e.to_string()).await)
                {
                    tracing::error!("Listener failed while reporting an error: {}", report);
                }
                return Err(ConnectError::Handler(e));
            }
        };
        let pair = make_connection_pair(remote_handler, local_handler);
        self.track(&port.local_address(), &pair);
        pair.confirm().await;
        Ok(pair.local.clone())
    }

    fn track(&self, local_addr: &Endpoint, pair: &ConnectionPair) {
        pair.local.track(&self.connections, local_addr.clone());
        pair.remote.track(&self.connections, local_addr.clone());
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("Endpoint {0} is already bound")]
    AlreadyBound(Endpoint),
    /// No registered fabric owns a matching prefix (routed binds only).
    #[error("No registered network matches {0}")]
    NoRoute(Endpoint),
    #[error("The interface handler failed to bind: {0}")]
    Handler(#[from] HandlerError),
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Port {0} is revoked")]
    Revoked(Endpoint),
    #[error("Connection refused")]
    Refused,
    #[error("A handler failed during the handshake: {0}")]
    Handler(HandlerError),
}
