//! Control State and the inbound control protocol.
//!
//! Clients send one JSON text message per key transition:
//!
//! ```text
//! {"key": "left", "pressed": true, "timestamp": 1712.5}
//! ```
//!
//! `timestamp` is optional and informational. Keys outside the
//! environment's whitelist are ignored without touching state.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use envstream_env::TransportMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable errors on the inbound path. Never fatal for a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Malformed or unrecognized message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Key outside the environment's whitelist.
    #[error("unknown key: {0}")]
    UnknownKey(String),
}

/// Ordered set of key tokens an environment recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyWhitelist {
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl KeyWhitelist {
    /// Builds a whitelist; later duplicates are dropped.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut index = HashMap::new();
        for key in keys {
            let key = key.into();
            if index.contains_key(&key) {
                continue;
            }
            index.insert(key.clone(), ordered.len());
            ordered.push(key);
        }
        Self {
            keys: ordered,
            index,
        }
    }

    /// Position of `key`, if whitelisted.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Immutable copy of the pressed keys at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySnapshot {
    whitelist: Arc<KeyWhitelist>,
    pressed: Vec<bool>,
}

impl KeySnapshot {
    /// Snapshot with every key released.
    pub fn released(whitelist: Arc<KeyWhitelist>) -> Self {
        let pressed = vec![false; whitelist.len()];
        Self { whitelist, pressed }
    }

    pub fn is_pressed(&self, key: &str) -> bool {
        self.whitelist
            .position(key)
            .map(|i| self.pressed[i])
            .unwrap_or(false)
    }

    /// Pressed keys in whitelist order.
    pub fn pressed_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.whitelist
            .keys()
            .iter()
            .zip(self.pressed.iter())
            .filter(|(_, pressed)| **pressed)
            .map(|(key, _)| key.as_str())
    }

    pub fn pressed_count(&self) -> usize {
        self.pressed.iter().filter(|p| **p).count()
    }
}

/// Concurrency-safe record of currently pressed keys.
///
/// The session's reader is the only writer; the stepper takes one
/// snapshot per tick. Both sides hold the lock only for a copy or a
/// single bit flip.
#[derive(Debug)]
pub struct ControlState {
    whitelist: Arc<KeyWhitelist>,
    pressed: RwLock<Vec<bool>>,
}

impl ControlState {
    /// Creates a state with every key released.
    pub fn new(whitelist: Arc<KeyWhitelist>) -> Self {
        let pressed = RwLock::new(vec![false; whitelist.len()]);
        Self { whitelist, pressed }
    }

    pub fn whitelist(&self) -> &Arc<KeyWhitelist> {
        &self.whitelist
    }

    /// Sets or clears one key.
    ///
    /// Returns whether the state changed. Unknown keys are rejected
    /// before the lock is taken.
    pub fn apply_key_event(&self, key: &str, pressed: bool) -> Result<bool, ControlError> {
        let Some(i) = self.whitelist.position(key) else {
            return Err(ControlError::UnknownKey(key.to_owned()));
        };
        let mut keys = self.pressed.write().unwrap_or_else(PoisonError::into_inner);
        let changed = keys[i] != pressed;
        keys[i] = pressed;
        Ok(changed)
    }

    /// Applies a decoded control message.
    pub fn apply(&self, message: &ControlMessage) -> Result<bool, ControlError> {
        self.apply_key_event(&message.key, message.pressed)
    }

    /// Copies the current pressed set.
    pub fn snapshot(&self) -> KeySnapshot {
        let keys = self.pressed.read().unwrap_or_else(PoisonError::into_inner);
        KeySnapshot {
            whitelist: Arc::clone(&self.whitelist),
            pressed: keys.clone(),
        }
    }
}

/// One client input transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub key: String,
    pub pressed: bool,
    /// Client clock, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl ControlMessage {
    pub fn new(key: impl Into<String>, pressed: bool) -> Self {
        Self {
            key: key.into(),
            pressed,
            timestamp: None,
        }
    }

    /// Decodes a JSON text payload.
    pub fn parse(text: &str) -> Result<Self, ControlError> {
        serde_json::from_str(text).map_err(|e| ControlError::Protocol(e.to_string()))
    }

    /// Decodes a transport message. Binary frames are not part of the
    /// inbound protocol.
    pub fn from_transport(message: &TransportMessage) -> Result<Self, ControlError> {
        match message {
            TransportMessage::Text(text) => Self::parse(text),
            TransportMessage::Binary(bytes) => Err(ControlError::Protocol(format!(
                "unexpected binary message ({} bytes)",
                bytes.len()
            ))),
        }
    }

    /// Encodes as the JSON text payload clients send.
    pub fn to_json(&self) -> String {
        serde_json::json!(self).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arrows() -> Arc<KeyWhitelist> {
        Arc::new(KeyWhitelist::new(["left", "right"]))
    }

    #[test]
    fn test_whitelist_dedups_and_keeps_order() {
        let list = KeyWhitelist::new(["b", "a", "b", "c"]);
        assert_eq!(list.keys(), &["b", "a", "c"]);
        assert_eq!(list.position("c"), Some(2));
        assert!(!list.contains("d"));
    }

    #[test]
    fn test_new_state_is_all_released() {
        let state = ControlState::new(arrows());
        let snap = state.snapshot();
        assert_eq!(snap.pressed_count(), 0);
        assert!(!snap.is_pressed("left"));
    }

    #[test]
    fn test_apply_reports_change() {
        let state = ControlState::new(arrows());
        assert_eq!(state.apply_key_event("left", true), Ok(true));
        assert_eq!(state.apply_key_event("left", true), Ok(false));
        assert_eq!(state.apply_key_event("left", false), Ok(true));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let state = ControlState::new(arrows());
        state.apply_key_event("right", true).unwrap();
        let before = state.snapshot();

        let err = state.apply_key_event("jump", true).unwrap_err();
        assert_eq!(err, ControlError::UnknownKey("jump".into()));
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let state = ControlState::new(arrows());
        let snap = state.snapshot();
        state.apply_key_event("left", true).unwrap();

        assert!(!snap.is_pressed("left"));
        assert!(state.snapshot().is_pressed("left"));
    }

    #[test]
    fn test_parse_control_message() {
        let msg = ControlMessage::parse(r#"{"key":"left","pressed":true}"#).unwrap();
        assert_eq!(msg, ControlMessage::new("left", true));

        let msg =
            ControlMessage::parse(r#"{"key":"right","pressed":false,"timestamp":12.5,"x":1}"#)
                .unwrap();
        assert_eq!(msg.timestamp, Some(12.5));
        assert!(!msg.pressed);
    }

    #[test]
    fn test_malformed_messages_are_protocol_errors() {
        for text in ["", "{", "[]", r#"{"key":"left"}"#, r#"{"key":1,"pressed":true}"#] {
            assert!(matches!(
                ControlMessage::parse(text),
                Err(ControlError::Protocol(_))
            ));
        }
        assert!(matches!(
            ControlMessage::from_transport(&TransportMessage::Binary(vec![1, 2])),
            Err(ControlError::Protocol(_))
        ));
    }

    #[test]
    fn test_to_json_parses_back() {
        let msg = ControlMessage::new("right", true);
        assert_eq!(ControlMessage::parse(&msg.to_json()).unwrap(), msg);
    }

    #[test]
    fn test_concurrent_writer_and_snapshots() {
        let state = Arc::new(ControlState::new(arrows()));
        let writer = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                // "right" is only ever held while "left" is held
                for _ in 0..1000 {
                    assert_eq!(state.apply_key_event("left", true), Ok(true));
                    assert_eq!(state.apply(&ControlMessage::new("right", true)), Ok(true));
                    assert_eq!(state.apply(&ControlMessage::new("right", false)), Ok(true));
                    assert_eq!(state.apply_key_event("left", false), Ok(true));
                }
            })
        };
        for _ in 0..5000 {
            let snap = state.snapshot();
            if snap.is_pressed("right") {
                assert!(snap.is_pressed("left"), "snapshot saw right without left");
            }
        }
        writer.join().unwrap();

        assert_eq!(state.snapshot().pressed_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_unknown_keys_never_change_state(
            events in proptest::collection::vec((0usize..4, any::<bool>()), 0..40)
        ) {
            let keys = ["left", "right", "jump", "fire"];
            let state = ControlState::new(arrows());
            for (k, pressed) in events {
                let before = state.snapshot();
                let result = state.apply_key_event(keys[k], pressed);
                if k >= 2 {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(state.snapshot(), before);
                } else {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(state.snapshot().is_pressed(keys[k]), pressed);
                }
            }
        }
    }
}
