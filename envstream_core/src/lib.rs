//! envstream Core - interactive environment streaming sessions
//!
//! A client connects, sends key transitions, and receives one rendered
//! frame per tick while the server steps a simulation at a fixed cadence:
//! 1. **Control**: whitelisted key state fed by inbound JSON messages
//! 2. **Encoder**: deterministic PNG frames in a fixed binary envelope
//! 3. **Session**: the stepper/reader pair and their joint shutdown

pub mod control;
pub mod encoder;
pub mod environment;
pub mod registry;
pub mod session;
pub mod shutdown;

// Re-export key types for convenience
pub use control::{ControlError, ControlMessage, ControlState, KeySnapshot, KeyWhitelist};
pub use encoder::{EncodingError, FrameEncoder, FrameMessage};
pub use environment::{Action, Environment, EnvironmentFault, KeyEvent, RawFrame, StepOutcome};
pub use registry::{EnvFactory, EnvInfo, EnvRegistry, EnvSpec, RegistryError};
pub use session::{
    EndReason, Session, SessionConfig, SessionError, SessionReport, SessionStats,
    DEFAULT_FRAME_INTERVAL,
};
pub use shutdown::Shutdown;
