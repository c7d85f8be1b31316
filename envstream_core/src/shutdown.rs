//! First-caller-wins shutdown latch shared by a session's two activities.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use crate::session::{EndReason, SessionError};

/// Terminal result recorded by whichever activity stops the session first.
pub type Outcome = Result<EndReason, SessionError>;

/// Shutdown latch.
///
/// `trigger` never blocks on the other activity, so either side may call
/// it at any point without deadlock. `wait` resolves for every waiter,
/// including ones that subscribe after the trigger.
#[derive(Debug)]
pub struct Shutdown {
    outcome: Mutex<Option<Outcome>>,
    fired: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            outcome: Mutex::new(None),
            fired,
        }
    }

    /// Records `outcome` and wakes all waiters.
    ///
    /// Returns `true` for the first caller only; later outcomes are dropped,
    /// including after the recorded outcome has been taken.
    pub fn trigger(&self, outcome: Outcome) -> bool {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        // The fired flag is the latch; the slot only carries the value.
        if *self.fired.borrow() {
            return false;
        }
        *slot = Some(outcome);
        self.fired.send_replace(true);
        true
    }

    pub fn is_triggered(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolves once the latch has fired. Cancel-safe.
    pub async fn wait(&self) {
        let mut rx = self.fired.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Takes the recorded outcome, leaving the latch fired.
    pub fn take_outcome(&self) -> Option<Outcome> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentFault;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_caller_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        assert!(shutdown.trigger(Ok(EndReason::ClientClosed)));
        assert!(!shutdown.trigger(Err(SessionError::Environment(
            EnvironmentFault::Step("late".into())
        ))));

        assert!(shutdown.is_triggered());
        assert!(matches!(
            shutdown.take_outcome(),
            Some(Ok(EndReason::ClientClosed))
        ));
        // Taking does not re-arm
        assert!(!shutdown.trigger(Ok(EndReason::EnvironmentDone)));
    }

    #[test]
    fn test_taking_outcome_never_rearms() {
        let shutdown = Shutdown::new();
        assert!(shutdown.trigger(Ok(EndReason::ClientClosed)));
        assert!(matches!(
            shutdown.take_outcome(),
            Some(Ok(EndReason::ClientClosed))
        ));

        for _ in 0..3 {
            assert!(!shutdown.trigger(Ok(EndReason::EnvironmentDone)));
            assert!(shutdown.take_outcome().is_none());
        }
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_concurrent_triggers_have_one_winner() {
        let shutdown = Arc::new(Shutdown::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let shutdown = Arc::clone(&shutdown);
                std::thread::spawn(move || {
                    let reason = if i % 2 == 0 {
                        EndReason::ClientClosed
                    } else {
                        EndReason::EnvironmentDone
                    };
                    let won = shutdown.trigger(Ok(reason));
                    if won {
                        // A later caller must not win once this one is taken
                        shutdown.take_outcome();
                    }
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_pending_waiters() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { shutdown.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        shutdown.trigger(Ok(EndReason::EnvironmentDone));
        tokio::time::timeout(Duration::from_millis(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger(Ok(EndReason::ClientClosed));
        shutdown.wait().await;
    }
}
