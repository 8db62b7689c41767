//! A reference handler that reflects every packet back to its sender.

use crate::{
    connection::Connection,
    endpoint::Endpoint,
    handler::{ConnectionHandler, HandlerError, ListenHandler, SharedConnectionHandler},
    message::Message,
    network::Port,
};
use std::sync::Arc;

/// Replies to every packet with the bytes it carried. As a listener it
/// accepts every inbound attempt with a fresh echo connection handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait::async_trait]
impl ConnectionHandler for EchoHandler {
    async fn on_receive(
        &self,
        _connection: Arc<Connection>,
        message: Message,
    ) -> Result<Message, HandlerError> {
        Ok(message)
    }
}

#[async_trait::async_trait]
impl ListenHandler for EchoHandler {
    async fn on_accept(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        Ok(Arc::new(EchoHandler))
    }
}
