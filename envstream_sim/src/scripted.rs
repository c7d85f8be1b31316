//! Scripted environment - records what a session does to it.
//!
//! Reward equals the number of keys held in the applied action, so a
//! client can read the action back out of the frame stream.

use async_trait::async_trait;
use envstream_core::{
    Action, Environment, EnvironmentFault, EnvSpec, KeyWhitelist, RawFrame, StepOutcome,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// What the scripted environment should do, step by step.
///
/// Step numbers are zero-based: `Some(0)` affects the first step.
#[derive(Debug, Clone)]
pub struct Script {
    /// Frame size
    pub width: u32,
    pub height: u32,

    /// Report `done` on this step
    pub done_at: Option<u64>,

    /// Fail `reset()`
    pub fail_reset: bool,

    /// Fail `step()` on this step
    pub fail_step_at: Option<u64>,

    /// Fail `render()` after this step
    pub fail_render_at: Option<u64>,

    /// Render a frame with a truncated pixel buffer after this step
    pub bad_frame_at: Option<u64>,

    /// Time `step()` takes
    pub step_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            width: 4,
            height: 3,
            done_at: None,
            fail_reset: false,
            fail_step_at: None,
            fail_render_at: None,
            bad_frame_at: None,
            step_delay: None,
        }
    }
}

/// Shared record of calls made on every instance built from one spec.
#[derive(Debug, Default)]
pub struct ScriptLog {
    actions: Mutex<Vec<Action>>,
    resets: AtomicU32,
    renders: AtomicU32,
    closes: AtomicU32,
}

impl ScriptLog {
    /// Actions applied so far, in step order.
    pub fn actions(&self) -> Vec<Action> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn renders(&self) -> u32 {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Environment driven by a [`Script`].
pub struct ScriptedEnv {
    script: Script,
    log: Arc<ScriptLog>,
    /// Steps taken since reset
    steps: u64,
}

impl ScriptedEnv {
    pub fn new(script: Script, log: Arc<ScriptLog>) -> Self {
        Self {
            script,
            log,
            steps: 0,
        }
    }

    /// Builds a spec whose instances all share one log.
    pub fn spec<I, S>(name: &str, keys: I, script: Script) -> (EnvSpec, Arc<ScriptLog>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let log = Arc::new(ScriptLog::default());
        let shared = Arc::clone(&log);
        let (width, height) = (script.width, script.height);
        let factory = move |_: &EnvSpec| {
            let env = ScriptedEnv::new(script.clone(), Arc::clone(&shared));
            Ok(Box::new(env) as Box<dyn Environment>)
        };
        let spec = EnvSpec::new(name, width, height, KeyWhitelist::new(keys), factory);
        (spec, log)
    }

    fn frame(&self) -> RawFrame {
        let shade = (self.steps % 256) as u8;
        RawFrame::filled(self.script.width, self.script.height, [shade, 0, 255 - shade])
    }
}

#[async_trait]
impl Environment for ScriptedEnv {
    async fn reset(&mut self) -> Result<RawFrame, EnvironmentFault> {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_reset {
            return Err(EnvironmentFault::Reset("scripted".into()));
        }
        self.steps = 0;
        Ok(self.frame())
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome, EnvironmentFault> {
        let index = self.steps;
        if let Some(delay) = self.script.step_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.fail_step_at == Some(index) {
            return Err(EnvironmentFault::Step(format!("scripted at step {index}")));
        }

        self.log
            .actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action.clone());
        self.steps += 1;

        Ok(StepOutcome {
            observation: self.frame(),
            reward: action.held.len() as f64,
            done: self.script.done_at == Some(index),
        })
    }

    async fn render(&mut self) -> Result<RawFrame, EnvironmentFault> {
        self.log.renders.fetch_add(1, Ordering::SeqCst);
        let last = self.steps.checked_sub(1);
        if last.is_some() && self.script.fail_render_at == last {
            return Err(EnvironmentFault::Render("scripted".into()));
        }
        let mut frame = self.frame();
        if last.is_some() && self.script.bad_frame_at == last {
            frame.pixels.truncate(frame.pixels.len() / 2);
        }
        Ok(frame)
    }

    async fn close(&mut self) -> Result<(), EnvironmentFault> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
