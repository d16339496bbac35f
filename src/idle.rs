//! Idle-shutdown countdown.
//!
//! The daemon exits once the countdown elapses with no call in flight. Every
//! inbound call holds the countdown for its whole duration through
//! [`TimerHold`], which pauses on creation and resets on drop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Pause/reset contract shared by the real countdown and test doubles.
pub trait ShutdownTimer: Send + Sync {
    /// Stop the countdown. Returns whether it was armed.
    fn pause(&self) -> bool;
    /// Re-arm the countdown for `duration`. Returns whether it was armed.
    fn reset(&self, duration: Duration) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerState {
    deadline: Option<Instant>,
    in_flight: usize,
}

/// Shared countdown. Clones observe and drive the same deadline.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    state: Arc<watch::Sender<TimerState>>,
}

impl IdleTimer {
    /// Create a countdown that is already armed for `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let (tx, _) = watch::channel(TimerState {
            deadline: Some(Instant::now() + timeout),
            in_flight: 0,
        });
        Self { state: Arc::new(tx) }
    }

    pub fn is_armed(&self) -> bool {
        self.state.borrow().deadline.is_some()
    }

    /// Resolve once the deadline passes while armed. Pausing or re-arming
    /// while waiting moves the goalposts.
    pub async fn elapsed(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let deadline = rx.borrow_and_update().deadline;
            match deadline {
                None => {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            if rx.borrow().deadline == Some(at) {
                                return;
                            }
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl ShutdownTimer for IdleTimer {
    fn pause(&self) -> bool {
        let mut was_running = false;
        self.state.send_modify(|s| {
            s.in_flight += 1;
            was_running = s.deadline.take().is_some();
        });
        was_running
    }

    fn reset(&self, duration: Duration) -> bool {
        let mut was_armed = false;
        self.state.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            was_armed = s.deadline.is_some();
            // Another call still holds the countdown; its reset re-arms it.
            s.deadline = if s.in_flight == 0 {
                Some(Instant::now() + duration)
            } else {
                None
            };
        });
        was_armed
    }
}

/// Holds the countdown paused until dropped.
pub struct TimerHold {
    timer: Arc<dyn ShutdownTimer>,
    timeout: Duration,
}

impl TimerHold {
    pub fn new(timer: Arc<dyn ShutdownTimer>, timeout: Duration) -> Self {
        timer.pause();
        Self { timer, timeout }
    }
}

impl Drop for TimerHold {
    fn drop(&mut self) {
        self.timer.reset(self.timeout);
    }
}
