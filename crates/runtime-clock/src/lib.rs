//! Injectable clock used by admission windows, cache expiry and sweepers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of the current time plus the ability to suspend until a deadline.
///
/// Everything in the workspace that reasons about windows or expiry reads time
/// through this trait so tests can drive it deterministically.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller until `now() >= deadline`.
    async fn sleep_until(&self, deadline: Instant);

    /// Suspend the caller for `duration` measured on this clock.
    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Shared pointer helper for components holding a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the tokio timer, so `tokio::time::pause` applies to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
    }
}

/// Clock that only moves when told to.
///
/// Sleepers are parked on a watch channel and re-check their deadline every
/// time [`ManualClock::advance`] publishes a new instant.
#[derive(Debug)]
pub struct ManualClock {
    current: watch::Sender<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(origin: Instant) -> Self {
        let (current, _) = watch::channel(origin);
        Self { current }
    }

    /// Move the clock forward and wake every sleeper whose deadline passed.
    pub fn advance(&self, by: Duration) {
        self.current.send_modify(|now| *now += by);
    }

    /// Jump to `instant`; instants in the past are ignored.
    pub fn advance_to(&self, instant: Instant) {
        self.current.send_if_modified(|now| {
            if instant > *now {
                *now = instant;
                true
            } else {
                false
            }
        });
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.borrow()
    }

    async fn sleep_until(&self, deadline: Instant) {
        let mut observed = self.current.subscribe();
        loop {
            let now = *observed.borrow_and_update();
            if now >= deadline {
                return;
            }
            if observed.changed().await.is_err() {
                return;
            }
        }
    }
}
