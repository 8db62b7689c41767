//! A virtual packet-switching network layer.
//!
//! Isolated computational units open addressable [`Port`]s, listen for
//! inbound connections, and exchange byte packets over [`Connection`]s, all
//! mediated by pluggable handler objects rather than physical sockets. The
//! handlers decide *policy* (which addresses exist, which connections are
//! accepted); this crate supplies the *mechanism*: registries, lifecycle
//! checking, prefix routing, and a send queue that preserves packet order
//! across the asynchronous connection handshake.
//!
//! # Organization
//!
//! - [`Message`] and [`Endpoint`] provide the packet and addressing
//!   vocabulary common to every component
//! - [`handler`] defines the capability traits a network is customized with
//! - [`Network`] and [`Port`] implement the port lifecycle; [`Connection`]
//!   carries packets between two handlers
//! - [`Router`] and [`RoutedNetwork`] compose independent network fabrics
//!   under one address space
//! - [`handlers`] contains reference implementations (loopback, echo)
//!
//! # Handler structure
//!
//! A [`Network`] and its [`InterfaceHandler`] work closely together. The
//! interface handler is consulted at every lifecycle step: binding a port,
//! adding or removing a listener, originating a connection, revoking a
//! port. Per-connection traffic flows through [`ConnectionHandler`]s, and
//! inbound connection attempts are fielded by [`ListenHandler`]s. Every
//! handler callback is optional; a handler implements only the callbacks it
//! cares about and the network supplies a sensible meaning for the rest.

pub mod endpoint;
pub use endpoint::Endpoint;

pub mod message;
pub use message::Message;

pub mod handler;
pub use handler::{
    ConnectionHandler, HandlerError, InterfaceHandler, ListenHandler, SharedConnectionHandler,
    SharedInterfaceHandler, SharedListenHandler,
};

pub mod connection;
pub use connection::{make_connection_pair, CloseError, Connection, ConnectionPair, SendError};

pub mod network;
pub use network::port::{ListenError, Port, RevokeError};
pub use network::{BindError, ConnectError, Network};

pub mod router;
pub use router::{RoutedNetwork, RouteTarget, Router, RouterError};

pub mod handlers;
