//! Transport abstraction for one client connection.

use crate::error::TransportError;
use crate::types::SessionId;
use async_trait::async_trait;

/// A single framed message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// UTF-8 text frame (control messages).
    Text(String),
    /// Binary frame (encoded frame messages).
    Binary(Vec<u8>),
}

impl TransportMessage {
    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bidirectional framed message channel to one client.
///
/// # Implementations
///
/// - **Production**: WebSocket adapter in `envstream_server`
/// - **Simulation**: channel-backed `SimTransport` in `envstream_sim`
///
/// All methods take `&self` so one reader and one writer can share the
/// adapter behind an `Arc`. Adapters serialize access internally.
///
/// # Message Flow
///
/// ```text
/// Client                    Transport                 Session
///   |-- key event ------------->|                          |
///   |                           |-- recv() -> Text ------->|
///   |                           |<-- send(Binary) ---------|
///   |<-- frame -----------------|                          |
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message to the client.
    ///
    /// # Returns
    /// * `Ok(())` - Message handed to the connection
    /// * `Err(TransportError)` - Write failed or the connection is closed
    async fn send(&self, message: TransportMessage) -> Result<(), TransportError>;

    /// Receives the next message from the client.
    ///
    /// # Returns
    /// * `Some(Ok(message))` - A message arrived
    /// * `Some(Err(error))` - The read failed
    /// * `None` - The client closed the connection
    ///
    /// Must be cancel-safe: the session drops a pending receive on shutdown.
    async fn recv(&self) -> Option<Result<TransportMessage, TransportError>>;

    /// Closes the connection. Later sends fail with `TransportError::Closed`.
    async fn close(&self);

    /// Returns the identifier of this connection.
    fn peer(&self) -> SessionId;
}
