//! Error types for the envstream environment abstraction.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport) adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection is already closed.
    #[error("transport closed")]
    Closed,

    /// Outbound write failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Inbound read failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

impl TransportError {
    /// Creates a send error.
    pub fn send(msg: impl Into<String>) -> Self {
        Self::Send(msg.into())
    }

    /// Creates a receive error.
    pub fn receive(msg: impl Into<String>) -> Self {
        Self::Receive(msg.into())
    }
}
