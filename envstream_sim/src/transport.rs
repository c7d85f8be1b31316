//! Simulated in-memory transport with fault injection.

use async_trait::async_trait;
use envstream_core::{ControlMessage, EncodingError, FrameMessage};
use envstream_env::{SessionId, Transport, TransportError, TransportMessage};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

type Inbound = Result<TransportMessage, TransportError>;

/// Counters both ends of a link can read.
#[derive(Debug, Default)]
pub struct LinkState {
    /// Times the server side called `close()`
    closes: AtomicU32,

    /// Sends attempted after `close()`
    sends_after_close: AtomicU32,

    /// Server-side sends fail while set
    fail_sends: AtomicBool,
}

/// Server side of a simulated connection.
pub struct SimTransport {
    /// Connection identifier
    peer: SessionId,

    /// Server → client; taken on close so the client sees end-of-stream
    outbound: Mutex<Option<mpsc::UnboundedSender<TransportMessage>>>,

    /// Client → server (behind tokio mutex for async)
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,

    closed: AtomicBool,

    link: Arc<LinkState>,
}

/// Test-side handle playing the remote client.
pub struct ClientEnd {
    to_server: Option<mpsc::UnboundedSender<Inbound>>,
    from_server: mpsc::UnboundedReceiver<TransportMessage>,
    link: Arc<LinkState>,
}

/// Creates a connected transport/client pair.
pub fn pair(peer: SessionId) -> (SimTransport, ClientEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let link = Arc::new(LinkState::default());

    let transport = SimTransport {
        peer,
        outbound: Mutex::new(Some(out_tx)),
        inbound: tokio::sync::Mutex::new(in_rx),
        closed: AtomicBool::new(false),
        link: Arc::clone(&link),
    };
    let client = ClientEnd {
        to_server: Some(in_tx),
        from_server: out_rx,
        link,
    };
    (transport, client)
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, message: TransportMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            self.link.sends_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::Closed);
        }
        if self.link.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::send("injected send failure"));
        }

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| TransportError::send("client dropped")),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Option<Inbound> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.link.closes.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // A receive still in flight holds the lock; it ends on its own.
        if let Ok(mut rx) = self.inbound.try_lock() {
            rx.close();
        }
    }

    fn peer(&self) -> SessionId {
        self.peer
    }
}

impl ClientEnd {
    /// Sends a key-down control message.
    pub fn press(&self, key: &str) -> bool {
        self.send_text(ControlMessage::new(key, true).to_json())
    }

    /// Sends a key-up control message.
    pub fn release(&self, key: &str) -> bool {
        self.send_text(ControlMessage::new(key, false).to_json())
    }

    /// Sends a raw text message. Returns false once the link is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Ok(TransportMessage::Text(text.into())))
    }

    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.push(Ok(TransportMessage::Binary(bytes)))
    }

    /// Makes the server's next receive fail.
    pub fn fail_receive(&self, reason: &str) -> bool {
        self.push(Err(TransportError::receive(reason)))
    }

    /// Makes every later server send fail.
    pub fn fail_sends(&self) {
        self.link.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Closes the client side; the server's receive then ends.
    pub fn close(&mut self) {
        self.to_server.take();
    }

    fn push(&self, message: Inbound) -> bool {
        match &self.to_server {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Next message from the server; `None` once the server closed.
    pub async fn next_message(&mut self) -> Option<TransportMessage> {
        self.from_server.recv().await
    }

    /// Next message decoded as a frame.
    pub async fn next_frame(&mut self) -> Option<Result<FrameMessage, EncodingError>> {
        match self.next_message().await? {
            TransportMessage::Binary(bytes) => Some(FrameMessage::decode(&bytes)),
            TransportMessage::Text(text) => Some(Err(EncodingError::Malformed(format!(
                "expected binary frame, got text {text:?}"
            )))),
        }
    }

    /// Drains everything already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<TransportMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.from_server.try_recv() {
            out.push(message);
        }
        out
    }

    /// True once the server closed and everything was read.
    pub fn is_server_closed(&mut self) -> bool {
        matches!(
            self.from_server.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }

    /// Times the server called `close()`.
    pub fn close_count(&self) -> u32 {
        self.link.closes.load(Ordering::SeqCst)
    }

    /// Sends the server attempted after closing.
    pub fn sends_after_close(&self) -> u32 {
        self.link.sends_after_close.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (transport, mut client) = pair(SessionId::from_seed(1));

        assert!(client.press("left"));
        let got = transport.recv().await.unwrap().unwrap();
        assert_eq!(
            got,
            TransportMessage::Text(r#"{"key":"left","pressed":true}"#.into())
        );

        transport
            .send(TransportMessage::Binary(vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(
            client.next_message().await,
            Some(TransportMessage::Binary(vec![1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn test_client_close_ends_receive() {
        let (transport, mut client) = pair(SessionId::from_seed(2));
        client.close();
        assert!(transport.recv().await.is_none());
        assert!(!client.press("left"));
    }

    #[tokio::test]
    async fn test_server_close_is_visible_to_client() {
        let (transport, mut client) = pair(SessionId::from_seed(3));
        transport.close().await;

        assert_eq!(client.close_count(), 1);
        assert!(client.next_message().await.is_none());
        assert_eq!(
            transport.send(TransportMessage::Text("x".into())).await,
            Err(TransportError::Closed)
        );
        assert_eq!(client.sends_after_close(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (transport, client) = pair(SessionId::from_seed(4));

        client.fail_receive("reset by peer");
        assert_eq!(
            transport.recv().await,
            Some(Err(TransportError::receive("reset by peer")))
        );

        client.fail_sends();
        assert!(matches!(
            transport.send(TransportMessage::Binary(vec![])).await,
            Err(TransportError::Send(_))
        ));
    }
}
