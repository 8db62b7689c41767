use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use vatnet::{
    handlers::{EchoHandler, LoopbackHandler},
    BindError, ConnectError, Endpoint, HandlerError, ListenError, ListenHandler, Network, Port,
    RevokeError, SendError, SharedConnectionHandler, SharedListenHandler,
};

/// Accepts everything with an echo handler and records its own removal.
#[derive(Default)]
struct TrackingListener {
    removed: AtomicBool,
}

#[async_trait::async_trait]
impl ListenHandler for TrackingListener {
    async fn on_accept(
        &self,
        _port: Arc<Port>,
        _local_addr: Endpoint,
        _remote_addr: Endpoint,
    ) -> Result<SharedConnectionHandler, HandlerError> {
        Ok(Arc::new(EchoHandler))
    }

    async fn on_remove(&self, _port: Arc<Port>, _local_addr: Endpoint) -> Result<(), HandlerError> {
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn echo_round_trip() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let listening = network.bind("/local/").await?;
    listening.add_listener(Arc::new(EchoHandler)).await?;
    assert_eq!(listening.local_address(), Endpoint::new("/local/port1"));

    let dialer = network.bind("/local/").await?;
    let connection = dialer
        .connect("/local/port1", Arc::new(EchoHandler))
        .await?;
    let reply = connection.send("hello").await?;
    assert_eq!(reply.to_vec(), b"hello");
    Ok(())
}

#[tokio::test]
async fn concrete_rebind_fails_while_auto_never_collides() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let _port = network.bind("/local/app").await?;
    assert!(matches!(
        network.bind("/local/app").await,
        Err(BindError::AlreadyBound(_))
    ));

    let a = network.bind("/local/").await?;
    let b = network.bind("/local/").await?;
    assert_ne!(a.local_address(), b.local_address());
    Ok(())
}

#[tokio::test]
async fn connect_without_listener_is_refused() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let dialer = network.bind("/local/").await?;
    assert!(matches!(
        dialer.connect("/local/nowhere", Arc::new(EchoHandler)).await,
        Err(ConnectError::Refused)
    ));
    Ok(())
}

#[tokio::test]
async fn second_listener_at_an_endpoint_is_rejected() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let port = network.bind("/local/server").await?;
    port.add_listener(Arc::new(EchoHandler)).await?;
    assert!(matches!(
        port.add_listener(Arc::new(EchoHandler)).await,
        Err(ListenError::AlreadyListening(_))
    ));
    Ok(())
}

#[tokio::test]
async fn remove_listener_requires_the_registered_object() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let port = network.bind("/local/server").await?;
    let listener: SharedListenHandler = Arc::new(EchoHandler);
    port.add_listener(listener.clone()).await?;

    let imposter: SharedListenHandler = Arc::new(EchoHandler);
    assert!(matches!(
        port.remove_listener(&imposter).await,
        Err(ListenError::WrongListener(_))
    ));

    // The registered listener is untouched and keeps accepting.
    let dialer = network.bind("/local/").await?;
    let connection = dialer
        .connect("/local/server", Arc::new(EchoHandler))
        .await?;
    assert_eq!(connection.send("still listening").await?.to_vec(), b"still listening");

    port.remove_listener(&listener).await?;
    assert!(matches!(
        port.remove_listener(&listener).await,
        Err(ListenError::NoneListening(_))
    ));
    Ok(())
}

#[tokio::test]
async fn revoke_closes_connections_and_removes_the_listener() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let host = network.bind("/local/server").await?;
    let listener = Arc::new(TrackingListener::default());
    host.add_listener(listener.clone()).await?;

    // Two connections originated by the host itself, so both live in its
    // connection set.
    let conn_a = host.connect("/local/server", Arc::new(EchoHandler)).await?;
    let conn_b = host.connect("/local/server", Arc::new(EchoHandler)).await?;
    assert_eq!(conn_a.send("ping").await?.to_vec(), b"ping");

    let confirmation = host.revoke().await?;
    assert!(confirmation.contains("revoked"));
    assert!(listener.removed.load(Ordering::SeqCst));
    assert!(matches!(conn_a.send("after").await, Err(SendError::Closed(_))));
    assert!(matches!(conn_b.send("after").await, Err(SendError::Closed(_))));
    assert!(matches!(
        host.revoke().await,
        Err(RevokeError::AlreadyRevoked(_))
    ));

    // The endpoint is free again and can host a fresh listener.
    let rebound = network.bind("/local/server").await?;
    rebound.add_listener(Arc::new(EchoHandler)).await?;
    Ok(())
}

#[tokio::test]
async fn revoked_port_refuses_new_work_but_keeps_its_address() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let port = network.bind("/local/gone").await?;
    port.revoke().await?;

    assert_eq!(port.local_address(), Endpoint::new("/local/gone"));
    assert!(matches!(
        port.connect("/local/anywhere", Arc::new(EchoHandler)).await,
        Err(ConnectError::Revoked(_))
    ));
    assert!(matches!(
        port.add_listener(Arc::new(EchoHandler)).await,
        Err(ListenError::Revoked(_))
    ));
    Ok(())
}

#[tokio::test]
async fn inbound_accepts_the_first_listening_candidate() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let listening = network.bind("/fabric/svc").await?;
    listening.add_listener(Arc::new(EchoHandler)).await?;

    let search = [
        Endpoint::new("/fabric/svc/instance"),
        Endpoint::new("/fabric/svc"),
        Endpoint::new("/fabric"),
    ];
    let connection = network
        .inbound(
            &search,
            Endpoint::new("/fabric/svc"),
            Endpoint::new("/remote/peer"),
            Arc::new(EchoHandler),
        )
        .await?;
    assert_eq!(connection.send("inbound").await?.to_vec(), b"inbound");
    Ok(())
}

#[tokio::test]
async fn inbound_without_any_listener_is_refused() -> Result<()> {
    let network = Network::new(LoopbackHandler::shared()).await?;
    let _idle = network.bind("/fabric/idle").await?;
    let outcome = network
        .inbound(
            &[Endpoint::new("/fabric/idle")],
            Endpoint::new("/fabric/idle"),
            Endpoint::new("/remote/peer"),
            Arc::new(EchoHandler),
        )
        .await;
    assert!(matches!(outcome, Err(ConnectError::Refused)));
    Ok(())
}
