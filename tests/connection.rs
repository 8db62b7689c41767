use anyhow::Result;
use std::sync::{Arc, Mutex};
use vatnet::{
    handlers::EchoHandler, make_connection_pair, CloseError, Connection, ConnectionHandler,
    HandlerError, Message, SendError,
};

/// Records every payload it receives, in arrival order.
#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<String>>,
}

impl Recorder {
    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ConnectionHandler for Recorder {
    async fn on_receive(
        &self,
        _connection: Arc<Connection>,
        message: Message,
    ) -> Result<Message, HandlerError> {
        let text =
            String::from_utf8(message.to_vec()).map_err(|e| HandlerError::Other(e.to_string()))?;
        self.received.lock().unwrap().push(text);
        Ok(Message::new("ack"))
    }
}

#[tokio::test]
async fn queued_sends_drain_in_order() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    let pair = make_connection_pair(Arc::new(EchoHandler), recorder.clone());
    let sender = pair.local.clone();

    // Both sends are issued before the pair is confirmed; they wait in the
    // queue and settle once the confirmation drains it.
    let (first, second, _) = futures::join!(
        sender.send("first"),
        sender.send("second"),
        pair.confirm()
    );
    assert_eq!(first?.to_vec(), b"ack");
    assert_eq!(second?.to_vec(), b"ack");

    let third = sender.send("third").await?;
    assert_eq!(third.to_vec(), b"ack");
    assert_eq!(recorder.received(), ["first", "second", "third"]);
    Ok(())
}

#[tokio::test]
async fn echo_acknowledges_with_the_sent_bytes() -> Result<()> {
    let pair = make_connection_pair(Arc::new(EchoHandler), Arc::new(EchoHandler));
    pair.confirm().await;
    let ack = pair.local.send("hello").await?;
    assert_eq!(ack.to_vec(), b"hello");
    Ok(())
}

#[tokio::test]
async fn close_rejects_queued_sends() -> Result<()> {
    let pair = make_connection_pair(Arc::new(EchoHandler), Arc::new(EchoHandler));
    let sender = pair.local.clone();
    let closer = pair.local.clone();

    let (outcome, closed) = futures::join!(sender.send("never delivered"), async move {
        closer.close().await
    });
    closed?;
    match outcome {
        Err(SendError::Closed(reason)) => assert_eq!(reason, "Connection closed"),
        other => panic!("expected the queued send to be rejected: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn double_close_fails() -> Result<()> {
    let pair = make_connection_pair(Arc::new(EchoHandler), Arc::new(EchoHandler));
    pair.confirm().await;
    pair.local.close().await?;
    assert!(matches!(
        pair.local.close().await,
        Err(CloseError::AlreadyClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn send_after_close_fails_with_the_close_reason() -> Result<()> {
    let pair = make_connection_pair(Arc::new(EchoHandler), Arc::new(EchoHandler));
    pair.confirm().await;
    pair.local.close().await?;
    match pair.local.send("too late").await {
        Err(SendError::Closed(reason)) => assert_eq!(reason, "Connection closed"),
        other => panic!("expected the send to fail: {other:?}"),
    }
    // The other half of the pair closes independently.
    pair.remote.close().await?;
    Ok(())
}

/// A handler whose close notification fails for real (not by absence).
struct FailingOnClose;

#[async_trait::async_trait]
impl ConnectionHandler for FailingOnClose {
    async fn on_close(&self, _connection: Arc<Connection>, _reason: String) -> Result<(), HandlerError> {
        Err(HandlerError::Other("close handler broke".to_string()))
    }
}

#[tokio::test]
async fn close_propagates_real_handler_failures() {
    let pair = make_connection_pair(Arc::new(FailingOnClose), Arc::new(EchoHandler));
    pair.confirm().await;
    assert!(matches!(
        pair.local.close().await,
        Err(CloseError::Handler(HandlerError::Other(_)))
    ));
    // The connection is closed all the same.
    assert!(matches!(
        pair.local.send("gone").await,
        Err(SendError::Closed(_))
    ));
}
