//! envstream Environment Abstraction Layer
//!
//! This crate provides the seams a streaming session needs from the outside
//! world, so the session loop can run against a real socket in production
//! and against in-memory channels in tests:
//! - Time (`now()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Transport (`send()`, `recv()`, `close()`)
//!
//! # Example
//!
//! ```ignore
//! use envstream_env::{StreamContext, Transport};
//!
//! async fn pump<Ctx: StreamContext, T: Transport>(ctx: &Ctx, transport: &T) {
//!     loop {
//!         tokio::select! {
//!             msg = transport.recv() => handle(msg),
//!             _ = ctx.sleep(Duration::from_millis(100)) => tick(),
//!         }
//!     }
//! }
//! ```

mod context;
mod error;
mod tokio_impl;
mod transport;
mod types;

pub use context::StreamContext;
pub use error::TransportError;
pub use tokio_impl::TokioContext;
pub use transport::{Transport, TransportMessage};
pub use types::SessionId;
