//! WebSocket transport adapter.
//!
//! Wraps the two halves of an upgraded socket so a session can send from
//! the stepper while the reader waits on the stream.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use envstream_env::{SessionId, Transport, TransportError, TransportMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::trace;

/// Transport over any sink/stream pair of WebSocket messages.
pub struct WsTransport<Tx, Rx> {
    peer: SessionId,
    sink: Mutex<Tx>,
    stream: Mutex<Rx>,
    closed: AtomicBool,
}

/// The adapter as built from an axum upgrade.
pub type AxumTransport = WsTransport<SplitSink<WebSocket, Message>, SplitStream<WebSocket>>;

impl AxumTransport {
    pub fn from_socket(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self::new(sink, stream)
    }
}

impl<Tx, Rx> WsTransport<Tx, Rx> {
    pub fn new(sink: Tx, stream: Rx) -> Self {
        Self {
            peer: SessionId::new(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

fn to_ws(message: TransportMessage) -> Message {
    match message {
        TransportMessage::Text(text) => Message::Text(text),
        TransportMessage::Binary(bytes) => Message::Binary(bytes),
    }
}

#[async_trait]
impl<Tx, Rx, E> Transport for WsTransport<Tx, Rx>
where
    Tx: Sink<Message> + Send + Unpin + 'static,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    async fn send(&self, message: TransportMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(to_ws(message))
            .await
            .map_err(|e| TransportError::send(e.to_string()))
    }

    async fn recv(&self) -> Option<Result<TransportMessage, TransportError>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(TransportMessage::Text(text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(TransportMessage::Binary(bytes))),
                // Pongs are answered by the socket itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    trace!(session = %self.peer, ?frame, "close frame received");
                    return None;
                }
                Err(e) => return Some(Err(TransportError::receive(e.to_string()))),
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        // The peer may already be gone; nothing left to report to.
        if let Err(e) = sink.close().await {
            trace!(session = %self.peer, error = %e, "socket close failed");
        }
    }

    fn peer(&self) -> SessionId {
        self.peer
    }
}
