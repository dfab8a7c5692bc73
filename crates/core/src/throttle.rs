//! Trailing-edge throttle for commands triggered by rapid user input.
//!
//! The first call in a quiet period runs immediately. Calls that arrive before
//! the interval has elapsed are collapsed: only the latest arguments are kept
//! and they run once when the interval expires. Nothing is dropped except
//! superseded arguments.

use crate::bus::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct ThrottleState<T> {
    last_fired: Option<Instant>,
    pending: Option<T>,
    timer_armed: bool,
}

/// Rate-limits an action to one effective call per interval.
///
/// Must be called from within a tokio runtime; the trailing call is scheduled
/// with `tokio::spawn`.
pub struct Throttle<T> {
    interval: Duration,
    action: Arc<dyn Fn(T) + Send + Sync>,
    state: Arc<Mutex<ThrottleState<T>>>,
}

impl<T> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            action: self.action.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> Throttle<T> {
    pub fn new<F>(interval: Duration, action: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            interval,
            action: Arc::new(action),
            state: Arc::new(Mutex::new(ThrottleState {
                last_fired: None,
                pending: None,
                timer_armed: false,
            })),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn call(&self, args: T) {
        let now = Instant::now();
        let mut state = lock(&self.state);

        let window_open = state
            .last_fired
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if window_open && !state.timer_armed {
            state.last_fired = Some(now);
            drop(state);
            (self.action)(args);
            return;
        }

        state.pending = Some(args);
        if state.timer_armed {
            trace!("Throttled call superseded pending arguments");
            return;
        }
        state.timer_armed = true;
        let deadline = state.last_fired.map_or(now, |last| last + self.interval);
        drop(state);

        let shared = self.state.clone();
        let action = self.action.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let args = {
                let mut state = lock(&shared);
                state.timer_armed = false;
                state.last_fired = Some(Instant::now());
                state.pending.take()
            };
            if let Some(args) = args {
                action(args);
            }
        });
    }
}
