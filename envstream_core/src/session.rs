//! Session Loop - one streaming session per accepted connection.
//!
//! A session runs two activities until either of them stops it:
//!
//! ```text
//!            ┌──────────── reader ────────────┐
//! Transport ─┤ recv → ControlMessage → apply  ├─► ControlState
//!            └────────────────────────────────┘        │ snapshot
//!            ┌──────────── stepper ───────────┐        ▼
//! Transport ◄┤ send ← encode ← render ← step  │◄── Action
//!            └───────── every interval ───────┘
//! ```
//!
//! - The stepper is the only caller of the environment and the only
//!   writer of the step counter.
//! - The reader is the only writer of the control state.
//! - Either side stops the session through the [`Shutdown`] latch; the
//!   stepper then tears down in one place: join reader, close environment,
//!   close transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use envstream_env::{SessionId, StreamContext, Transport, TransportError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

use crate::control::{ControlError, ControlMessage, ControlState, KeySnapshot};
use crate::encoder::{EncodingError, FrameEncoder};
use crate::environment::{Action, Environment, EnvironmentFault};
use crate::registry::EnvSpec;
use crate::shutdown::Shutdown;

/// Default time between steps.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Per-session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time between two steps (default: 100ms)
    pub frame_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

/// Why a session ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The environment reported termination and the done frame was
    /// delivered, even if the client closed while that last step ran.
    EnvironmentDone,
    /// The client closed the connection before any done frame.
    ClientClosed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvironmentDone => "environment done",
            Self::ClientClosed => "client closed",
        }
    }
}

/// Fatal session errors. The client observes these only as a close
/// without a done frame.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("encoding: {0}")]
    Encoding(#[from] EncodingError),

    #[error("environment: {0}")]
    Environment(#[from] EnvironmentFault),
}

/// Counters gathered over a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub frames_sent: u64,
    pub controls_applied: u64,
    pub controls_unknown_key: u64,
    pub controls_malformed: u64,
}

/// Result of a session that ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: EndReason,
    pub stats: SessionStats,
}

#[derive(Debug, Default)]
struct ReaderCounters {
    applied: AtomicU64,
    unknown_key: AtomicU64,
    malformed: AtomicU64,
}

enum TickFlow {
    Continue,
    /// Terminal frame handled; the session is over.
    Finished,
    /// Shutdown began during the tick; the frame was not sent.
    Interrupted,
}

/// One client's streaming session.
pub struct Session<Ctx, T>
where
    Ctx: StreamContext,
    T: Transport,
{
    id: SessionId,
    env_name: String,
    ctx: Arc<Ctx>,
    transport: Arc<T>,
    env: Box<dyn Environment>,
    control: Arc<ControlState>,
    encoder: FrameEncoder,
    config: SessionConfig,
    shutdown: Arc<Shutdown>,
    counters: Arc<ReaderCounters>,
    /// Step index of the next frame.
    step_counter: u64,
    last_snapshot: KeySnapshot,
    /// Set once the done frame reached the transport.
    terminal_delivered: bool,
    stats: SessionStats,
}

impl<Ctx, T> Session<Ctx, T>
where
    Ctx: StreamContext,
    T: Transport,
{
    /// Runs a session for `spec` over `transport` until it terminates.
    ///
    /// The environment and the transport are each released exactly once
    /// before this returns, whatever the outcome.
    pub async fn start(
        ctx: Arc<Ctx>,
        spec: &EnvSpec,
        config: SessionConfig,
        transport: T,
    ) -> Result<SessionReport, SessionError> {
        let transport = Arc::new(transport);
        let span = info_span!("session", id = %transport.peer(), env = %spec.name);

        let env = match spec.create() {
            Ok(env) => env,
            Err(fault) => {
                span.in_scope(|| error!(error = %fault, "failed to create environment"));
                transport.close().await;
                return Err(fault.into());
            }
        };

        let control = Arc::new(ControlState::new(Arc::clone(&spec.key_whitelist)));
        let session = Session {
            id: transport.peer(),
            env_name: spec.name.clone(),
            ctx,
            transport,
            env,
            last_snapshot: control.snapshot(),
            control,
            encoder: FrameEncoder::new(),
            config,
            shutdown: Arc::new(Shutdown::new()),
            counters: Arc::new(ReaderCounters::default()),
            step_counter: 0,
            terminal_delivered: false,
            stats: SessionStats::default(),
        };

        session.run().instrument(span).await
    }

    async fn run(mut self) -> Result<SessionReport, SessionError> {
        info!(
            interval_ms = self.config.frame_interval.as_millis() as u64,
            "session started"
        );

        let reader = match self.env.reset().await {
            Ok(_) => {
                let reader = self.ctx.spawn(
                    "session-reader",
                    read_loop(
                        Arc::clone(&self.transport),
                        Arc::clone(&self.control),
                        Arc::clone(&self.shutdown),
                        Arc::clone(&self.counters),
                    )
                    .instrument(Span::current()),
                );
                self.step_loop().await;
                Some(reader)
            }
            Err(fault) => {
                error!(error = %fault, "environment reset failed");
                self.shutdown.trigger(Err(fault.into()));
                None
            }
        };

        self.teardown(reader).await
    }

    /// Ticks on absolute deadlines until the latch fires.
    async fn step_loop(&mut self) {
        let interval = self.config.frame_interval;
        let mut deadline = self.ctx.now() + interval;

        loop {
            let wait = deadline.saturating_sub(self.ctx.now());
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return,
                _ = self.ctx.sleep(wait) => {}
            }

            match self.tick().await {
                Ok(TickFlow::Continue) => {}
                Ok(TickFlow::Finished) => {
                    self.shutdown.trigger(Ok(EndReason::EnvironmentDone));
                    return;
                }
                Ok(TickFlow::Interrupted) => return,
                Err(e) => {
                    if self.shutdown.trigger(Err(e)) {
                        error!(step = self.step_counter, "stepper stopped on fatal error");
                    }
                    return;
                }
            }

            deadline += interval;
            let now = self.ctx.now();
            if deadline <= now {
                // Overran a whole interval; rebase instead of bursting
                warn!(
                    step = self.step_counter,
                    behind_ms = (now - deadline).as_millis() as u64,
                    "tick overran frame interval"
                );
                deadline = now + interval;
            }
        }
    }

    async fn tick(&mut self) -> Result<TickFlow, SessionError> {
        let snapshot = self.control.snapshot();
        let action = Action::from_snapshots(&self.last_snapshot, &snapshot);
        self.last_snapshot = snapshot;

        let outcome = self.env.step(&action).await?;
        let frame = self.env.render().await?;

        let step = self.step_counter;
        let message = self
            .encoder
            .encode(&frame, outcome.reward, step, outcome.done)?;
        self.step_counter += 1;
        self.stats.ticks += 1;

        if outcome.done {
            // Attempted even if the client is already gone; failure is not escalated.
            match self.transport.send(message.into_transport()).await {
                Ok(()) => {
                    self.stats.frames_sent += 1;
                    self.terminal_delivered = true;
                    info!(step, reward = outcome.reward, "terminal frame sent");
                }
                Err(e) => warn!(step, error = %e, "terminal frame not delivered"),
            }
            return Ok(TickFlow::Finished);
        }

        if self.shutdown.is_triggered() {
            debug!(step, "shutdown began mid-tick, frame dropped");
            return Ok(TickFlow::Interrupted);
        }

        self.transport.send(message.into_transport()).await?;
        self.stats.frames_sent += 1;
        trace!(step, reward = outcome.reward, held = ?action.held, "frame sent");
        Ok(TickFlow::Continue)
    }

    async fn teardown(
        mut self,
        reader: Option<JoinHandle<()>>,
    ) -> Result<SessionReport, SessionError> {
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!(error = %e, "reader task ended abnormally");
            }
        }

        if let Err(fault) = self.env.close().await {
            warn!(error = %fault, "environment close failed");
        }
        self.transport.close().await;

        self.stats.controls_applied = self.counters.applied.load(Ordering::Relaxed);
        self.stats.controls_unknown_key = self.counters.unknown_key.load(Ordering::Relaxed);
        self.stats.controls_malformed = self.counters.malformed.load(Ordering::Relaxed);

        // The stepper only returns once the latch holds an outcome.
        let outcome = match self.shutdown.take_outcome() {
            // A client leaving mid-step still saw the episode finish
            Some(Ok(EndReason::ClientClosed)) | None if self.terminal_delivered => {
                Ok(EndReason::EnvironmentDone)
            }
            Some(outcome) => outcome,
            None => Ok(EndReason::ClientClosed),
        };

        match outcome {
            Ok(reason) => {
                info!(
                    session = %self.id,
                    env = %self.env_name,
                    reason = reason.as_str(),
                    ticks = self.stats.ticks,
                    frames = self.stats.frames_sent,
                    "session ended"
                );
                Ok(SessionReport {
                    reason,
                    stats: self.stats,
                })
            }
            Err(e) => {
                error!(
                    session = %self.id,
                    env = %self.env_name,
                    error = %e,
                    ticks = self.stats.ticks,
                    "session failed"
                );
                Err(e)
            }
        }
    }
}

/// Absorbs control messages until the client goes away or the latch fires.
async fn read_loop<T: Transport>(
    transport: Arc<T>,
    control: Arc<ControlState>,
    shutdown: Arc<Shutdown>,
    counters: Arc<ReaderCounters>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait() => return,
            next = transport.recv() => next,
        };

        let message = match next {
            None => {
                if shutdown.trigger(Ok(EndReason::ClientClosed)) {
                    info!("client closed connection");
                }
                return;
            }
            Some(Err(e)) => {
                if shutdown.trigger(Err(SessionError::Transport(e.clone()))) {
                    error!(error = %e, "receive failed");
                }
                return;
            }
            Some(Ok(message)) => message,
        };

        match ControlMessage::from_transport(&message).and_then(|m| control.apply(&m)) {
            Ok(changed) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
                trace!(changed, "control applied");
            }
            Err(ControlError::UnknownKey(key)) => {
                counters.unknown_key.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "ignoring key outside whitelist");
            }
            Err(ControlError::Protocol(reason)) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, len = message.len(), "dropping malformed control message");
            }
        }
    }
}
