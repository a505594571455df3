//! Single-assignment value with a resettable deadline.
//!
//! A [`Correlator`] starts pending and settles exactly once: either
//! [`resolve`](Correlator::resolve) supplies the value, or the deadline
//! passes and the default value wins. Settlement happens under one lock, so
//! a resolve can never race a timeout: whichever observes the state first
//! decides, and the loser gets a [`CorrelatorError`].
//!
//! The deadline is checked lazily by every operation. A correlator nobody
//! waits on still refuses a `resolve` that arrives after its deadline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Misuse of an already settled correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    /// `resolve` already supplied a value.
    #[error("correlator was already resolved")]
    AlreadyResolved,

    /// The deadline passed and the default value was taken.
    #[error("correlator already timed out")]
    TimedOut,
}

enum State<T> {
    Pending { deadline: Instant },
    Resolved(T),
    TimedOut,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Notify,
    timeout: Duration,
    default: T,
}

/// Deadline-bound single-assignment value. Clones share the same state.
pub struct Correlator<T> {
    shared: Arc<Shared<T>>,
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now)
}

impl<T> Correlator<T> {
    /// Create a pending correlator that falls back to `default` once
    /// `timeout` elapses without a refresh.
    pub fn new(timeout: Duration, default: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending {
                    deadline: deadline_after(timeout),
                }),
                settled: Notify::new(),
                timeout,
                default,
            }),
        }
    }

    /// Lock the state, settling it as timed out if the deadline has passed.
    fn state(&self) -> MutexGuard<'_, State<T>> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let expired =
            matches!(*state, State::Pending { deadline } if Instant::now() >= deadline);
        if expired {
            *state = State::TimedOut;
            self.shared.settled.notify_waiters();
        }
        state
    }

    /// Push the deadline to now plus the original timeout.
    pub fn refresh(&self) -> Result<(), CorrelatorError> {
        match &mut *self.state() {
            State::Pending { deadline } => {
                *deadline = deadline_after(self.shared.timeout);
                Ok(())
            }
            State::Resolved(_) => Err(CorrelatorError::AlreadyResolved),
            State::TimedOut => Err(CorrelatorError::TimedOut),
        }
    }

    /// Settle with `value`. Fails if the correlator is already settled.
    pub fn resolve(&self, value: T) -> Result<(), CorrelatorError> {
        let mut state = self.state();
        match &*state {
            State::Pending { .. } => {}
            State::Resolved(_) => return Err(CorrelatorError::AlreadyResolved),
            State::TimedOut => return Err(CorrelatorError::TimedOut),
        }
        *state = State::Resolved(value);
        drop(state);
        self.shared.settled.notify_waiters();
        Ok(())
    }

    /// Whether the correlator has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state(), State::Pending { .. })
    }
}

impl<T: Clone> Correlator<T> {
    /// Wait until settled and return the resolved value, or the default on
    /// timeout. Later calls return the same outcome immediately.
    pub async fn wait(&self) -> T {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = match &*self.state() {
                State::Pending { deadline } => *deadline,
                State::Resolved(value) => return value.clone(),
                State::TimedOut => return self.shared.default.clone(),
            };

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}

impl<T> Clone for Correlator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> core::fmt::Debug for Correlator<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Correlator")
            .field("timeout_ms", &self.shared.timeout.as_millis())
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}
