//! envstream Deterministic Simulation Harness
//!
//! Runs real sessions without sockets or wall-clock time:
//! - **Transport**: an in-memory channel pair with a scriptable client end
//!   and injectable send/receive failures
//! - **Environments**: small seeded games (`Paddle-v0`, `Gridwalk-v0`) and a
//!   scripted environment that records actions and injects faults
//! - **Harness**: spawns a session over the simulated transport; pair it
//!   with `#[tokio::test(start_paused = true)]` for exact timing
//!
//! ```text
//!  ClientEnd ──press/release──► SimTransport ──► Session ──► Environment
//!      ▲                                            │
//!      └──────────── FrameMessage (ESFM + PNG) ─────┘
//! ```

pub mod catalog;
pub mod gridwalk;
pub mod harness;
pub mod paddle;
pub mod scripted;
pub mod transport;

pub use catalog::{builtin_registry, SeedSource};
pub use gridwalk::Gridwalk;
pub use harness::SessionHarness;
pub use paddle::Paddle;
pub use scripted::{Script, ScriptLog, ScriptedEnv};
pub use transport::{pair, ClientEnd, LinkState, SimTransport};
