//! Session harness - runs a real session against an in-memory client.
//!
//! Combined with tokio's paused clock, every timing property of the
//! session loop becomes deterministic and instant to test.

use envstream_core::{EnvSpec, Session, SessionConfig, SessionError, SessionReport};
use envstream_env::{SessionId, TokioContext};
use std::panic;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::transport::{self, ClientEnd};

/// A spawned session plus the client end of its transport.
pub struct SessionHarness {
    /// The simulated remote client
    pub client: ClientEnd,

    handle: JoinHandle<Result<SessionReport, SessionError>>,
    started: Instant,
}

impl SessionHarness {
    /// Spawns a session for `spec` on the current runtime.
    pub fn spawn(spec: EnvSpec, config: SessionConfig) -> Self {
        Self::spawn_with_peer(spec, config, SessionId::new())
    }

    pub fn spawn_with_peer(spec: EnvSpec, config: SessionConfig, peer: SessionId) -> Self {
        let (transport, client) = transport::pair(peer);
        let ctx = TokioContext::shared();
        debug!(session = %peer, env = %spec.name, "harness spawning session");

        let handle =
            tokio::spawn(async move { Session::start(ctx, &spec, config, transport).await });
        Self {
            client,
            handle,
            started: Instant::now(),
        }
    }

    /// Time since the session was spawned.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the session to end. Panics inside the session propagate.
    pub async fn join(self) -> (ClientEnd, Result<SessionReport, SessionError>) {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(e) => panic!("session task cancelled: {e}"),
        };
        (self.client, result)
    }
}
