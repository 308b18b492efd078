//! Connection-scoped timers: the single-shot init timer and the keep-alive
//! ping interval.
//!
//! Both are polled from the connection's `select!` loop. A disarmed timer
//! never resolves, so its branch simply stays idle.

use std::{future::pending, pin::Pin, time::Duration};

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};

// ════════════════════════════════════════════════════════════════════
// InitTimer
// ════════════════════════════════════════════════════════════════════

/// Deadline for the client's `connection_init`.
pub struct InitTimer {
    timeout: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl InitTimer {
    /// A disarmed timer; `None` means the timer never fires.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            sleep: None,
        }
    }

    /// Start counting from now.
    pub fn arm(&mut self) {
        self.sleep = self
            .timeout
            .map(|timeout| Box::pin(tokio::time::sleep(timeout)));
    }

    /// Stop the timer. Returns `true` if it was pending.
    pub fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves when the deadline passes. Fires at most once per `arm`.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// KeepAlive
// ════════════════════════════════════════════════════════════════════

/// A usable ping period: zero counts as disabled.
pub(crate) fn keep_alive_period(period: Option<Duration>) -> Option<Duration> {
    period.filter(|period| !period.is_zero())
}

/// Periodic server `ping`, armed once the handshake is done.
pub struct KeepAlive {
    period: Option<Duration>,
    interval: Option<Interval>,
}

impl KeepAlive {
    /// `None` or a zero period never ticks.
    pub fn new(period: Option<Duration>) -> Self {
        Self {
            period: keep_alive_period(period),
            interval: None,
        }
    }

    /// Start ticking; the first tick is one full period from now.
    pub fn arm(&mut self) {
        self.interval = self.period.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending().await,
        }
    }
}
