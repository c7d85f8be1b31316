//! Environment Handle - the contract a stepped simulation exposes to a session.
//!
//! The session treats the simulation as a black box:
//! - `reset()` once at session start
//! - `step()` then `render()` once per tick
//! - `close()` once during shutdown, never concurrently with step/render

use async_trait::async_trait;
use thiserror::Error;

use crate::control::KeySnapshot;

/// Failure reported by an environment. Always fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentFault {
    /// The factory could not build an instance.
    #[error("create failed: {0}")]
    Create(String),

    #[error("reset failed: {0}")]
    Reset(String),

    #[error("step failed: {0}")]
    Step(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("close failed: {0}")]
    Close(String),
}

/// A raw rendered frame: tightly packed RGB8, row-major, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RawFrame {
    /// Bytes per pixel (RGB8).
    pub const CHANNELS: usize = 3;

    /// Creates a frame filled with one color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * Self::CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Pixel buffer length implied by the dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * Self::CHANNELS
    }

    /// Sets one pixel; out-of-bounds writes are ignored.
    pub fn put(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        if let Some(px) = self.pixels.get_mut(offset..offset + Self::CHANNELS) {
            px.copy_from_slice(&rgb);
        }
    }

    /// Fills an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                self.put(px, py, rgb);
            }
        }
    }
}

/// Key transition since the previous tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Down(String),
    Up(String),
}

/// The action applied for one step.
///
/// `held` lists pressed keys in whitelist order. `events` lists the
/// transitions relative to the previous tick's snapshot, releases first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Action {
    pub held: Vec<String>,
    pub events: Vec<KeyEvent>,
}

impl Action {
    /// The empty action (nothing held, nothing changed).
    pub fn idle() -> Self {
        Self::default()
    }

    /// Builds the action for `current`, given the snapshot used on the
    /// previous tick.
    pub fn from_snapshots(previous: &KeySnapshot, current: &KeySnapshot) -> Self {
        let held = current.pressed_keys().map(str::to_owned).collect();

        let mut events = Vec::new();
        for key in previous.pressed_keys() {
            if !current.is_pressed(key) {
                events.push(KeyEvent::Up(key.to_owned()));
            }
        }
        for key in current.pressed_keys() {
            if !previous.is_pressed(key) {
                events.push(KeyEvent::Down(key.to_owned()));
            }
        }

        Self { held, events }
    }

    /// Returns true if `key` is held during this step.
    pub fn is_held(&self, key: &str) -> bool {
        self.held.iter().any(|k| k == key)
    }
}

/// Result of one `step()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observation: RawFrame,
    pub reward: f64,
    pub done: bool,
}

/// One instantiated simulation.
///
/// Owned exclusively by one session; the session never calls two methods
/// concurrently. Implementations doing heavy synchronous work should move
/// it onto `tokio::task::spawn_blocking` themselves.
#[async_trait]
pub trait Environment: Send + 'static {
    /// Starts a fresh episode and returns the initial observation.
    async fn reset(&mut self) -> Result<RawFrame, EnvironmentFault>;

    /// Advances the simulation by one step.
    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvironmentFault>;

    /// Renders the current state.
    async fn render(&mut self) -> Result<RawFrame, EnvironmentFault>;

    /// Releases the instance.
    async fn close(&mut self) -> Result<(), EnvironmentFault>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlState, KeyWhitelist};
    use std::sync::Arc;

    fn state() -> ControlState {
        ControlState::new(Arc::new(KeyWhitelist::new(["left", "right", "up"])))
    }

    #[test]
    fn test_action_held_follows_whitelist_order() {
        let control = state();
        let before = control.snapshot();
        control.apply_key_event("up", true).unwrap();
        control.apply_key_event("left", true).unwrap();

        let action = Action::from_snapshots(&before, &control.snapshot());
        assert_eq!(action.held, vec!["left".to_string(), "up".to_string()]);
        assert_eq!(
            action.events,
            vec![KeyEvent::Down("left".into()), KeyEvent::Down("up".into())]
        );
    }

    #[test]
    fn test_action_reports_releases_before_presses() {
        let control = state();
        control.apply_key_event("left", true).unwrap();
        let before = control.snapshot();
        control.apply_key_event("left", false).unwrap();
        control.apply_key_event("right", true).unwrap();

        let action = Action::from_snapshots(&before, &control.snapshot());
        assert_eq!(
            action.events,
            vec![KeyEvent::Up("left".into()), KeyEvent::Down("right".into())]
        );
        assert!(action.is_held("right"));
        assert!(!action.is_held("left"));
    }

    #[test]
    fn test_unchanged_snapshot_has_no_events() {
        let control = state();
        control.apply_key_event("right", true).unwrap();
        let snap = control.snapshot();

        let action = Action::from_snapshots(&snap, &snap);
        assert!(action.events.is_empty());
        assert_eq!(action.held, vec!["right".to_string()]);
    }

    #[test]
    fn test_raw_frame_fill_rect_clips() {
        let mut frame = RawFrame::filled(4, 2, [0, 0, 0]);
        frame.fill_rect(3, 1, 10, 10, [9, 8, 7]);

        assert_eq!(frame.pixels.len(), frame.expected_len());
        let last = &frame.pixels[frame.pixels.len() - 3..];
        assert_eq!(last, &[9, 8, 7]);
        assert_eq!(&frame.pixels[0..3], &[0, 0, 0]);
    }
}
