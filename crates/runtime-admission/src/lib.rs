//! Fixed-window admission control for calls into the generator.
//!
//! One [`AdmissionController`] is shared by every call site. It counts grants
//! inside a window of length `W`; once `R` grants have been handed out, callers
//! park on a FIFO queue of tickets and are released at the next boundary.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use runtime_clock::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Admission window configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionConfig {
    /// Maximum grants per window (`R`).
    pub capacity: u32,
    /// Window length (`W`).
    pub window: Duration,
    /// Utilization at or above which a warning is logged.
    pub warn_utilization_percent: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 15,
            window: Duration::from_secs(60),
            warn_utilization_percent: 80.0,
        }
    }
}

impl AdmissionConfig {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.capacity == 0 {
            return Err(AdmissionError::Misconfigured(
                "capacity must be at least 1".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(AdmissionError::Misconfigured(
                "window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Proof that a caller was admitted into a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionGrant {
    /// Start of the window the grant was counted against.
    pub window_start: Instant,
    /// Position of this grant inside its window, starting at 1.
    pub slot: u32,
    /// Time spent queued; zero for immediate grants.
    pub waited: Duration,
}

/// Read-only snapshot of the admission window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Grants counted against the current window; zero once it has expired.
    pub count: u32,
    /// Configured grants per window.
    pub limit: u32,
    /// Callers waiting for a later window.
    pub queue_depth: usize,
    /// `count` as a percentage of `limit`.
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("admission controller closed")]
    Closed,
    #[error("admission misconfigured: {0}")]
    Misconfigured(String),
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
struct WaitTicket {
    id: u64,
    enqueued_at: Instant,
    completion: oneshot::Sender<AdmissionGrant>,
}

#[derive(Debug)]
struct AdmissionState {
    window: RateWindow,
    queue: VecDeque<WaitTicket>,
    next_ticket: u64,
    closed: bool,
}

enum Admission {
    Granted(AdmissionGrant),
    Queued {
        ticket: u64,
        completion: oneshot::Receiver<AdmissionGrant>,
    },
}

/// Shared rate gate. Construct once and hand out through `Arc`.
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    clock: SharedClock,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, clock: SharedClock) -> Result<Self, AdmissionError> {
        config.validate()?;
        let window_start = clock.now();
        Ok(Self {
            config,
            clock,
            state: Mutex::new(AdmissionState {
                window: RateWindow {
                    count: 0,
                    window_start,
                },
                queue: VecDeque::new(),
                next_ticket: 0,
                closed: false,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Wait until the current or a later window has room for this caller.
    pub async fn acquire(&self) -> Result<AdmissionGrant, AdmissionError> {
        self.acquire_until(None).await
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`, leaving
    /// the queue and reporting a retry-after estimate.
    pub async fn acquire_within(
        &self,
        timeout: Duration,
    ) -> Result<AdmissionGrant, AdmissionError> {
        let deadline = self.clock.now() + timeout;
        self.acquire_until(Some(deadline)).await
    }

    async fn acquire_until(
        &self,
        deadline: Option<Instant>,
    ) -> Result<AdmissionGrant, AdmissionError> {
        let (ticket, completion) = match self.admit()? {
            Admission::Granted(grant) => return Ok(grant),
            Admission::Queued { ticket, completion } => (ticket, completion),
        };
        let mut waiter = Waiter {
            controller: self,
            ticket,
            completion,
            settled: false,
        };

        loop {
            let boundary = self.next_boundary();
            let wake_at = deadline.map_or(boundary, |deadline| deadline.min(boundary));
            tokio::select! {
                biased;
                received = &mut waiter.completion => {
                    waiter.settled = true;
                    return received.map_err(|_| AdmissionError::Closed);
                }
                () = self.clock.sleep_until(wake_at) => {
                    self.release_due();
                    if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                        return waiter.expire();
                    }
                }
            }
        }
    }

    /// Roll the window if its boundary passed and hand freed slots to the
    /// queue. Waiters call this on wake-up; it is safe to call at any time.
    pub fn release_due(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.closed {
            return;
        }
        self.roll_window(&mut state, now);
        self.release_queued(&mut state, now);
    }

    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        let now = self.clock.now();
        let state = self.lock();
        let count = if self.window_expired(&state.window, now) {
            0
        } else {
            state.window.count
        };
        AdmissionStats {
            count,
            limit: self.config.capacity,
            queue_depth: state.queue.len(),
            utilization_percent: utilization(count, self.config.capacity),
        }
    }

    /// Seconds until the current window closes, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let now = self.clock.now();
        let state = self.lock();
        self.retry_after_locked(&state, now)
    }

    /// Refuse new callers and fail every queued waiter with `Closed`.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let abandoned = state.queue.len();
        state.queue.clear();
        info!(abandoned, "admission controller shut down");
    }

    fn admit(&self) -> Result<Admission, AdmissionError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.closed {
            return Err(AdmissionError::Closed);
        }
        self.roll_window(&mut state, now);
        self.release_queued(&mut state, now);

        let admission = if state.queue.is_empty() && state.window.count < self.config.capacity {
            state.window.count += 1;
            debug!(
                count = state.window.count,
                limit = self.config.capacity,
                "admission granted"
            );
            Admission::Granted(AdmissionGrant {
                window_start: state.window.window_start,
                slot: state.window.count,
                waited: Duration::ZERO,
            })
        } else {
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (sender, completion) = oneshot::channel();
            state.queue.push_back(WaitTicket {
                id: ticket,
                enqueued_at: now,
                completion: sender,
            });
            info!(
                ticket,
                queue_depth = state.queue.len(),
                retry_after_secs = self.retry_after_locked(&state, now),
                "admission window full, request queued"
            );
            Admission::Queued { ticket, completion }
        };

        let utilization = utilization(state.window.count, self.config.capacity);
        if utilization >= self.config.warn_utilization_percent {
            warn!(
                count = state.window.count,
                limit = self.config.capacity,
                utilization,
                "admission window utilization high"
            );
        }
        Ok(admission)
    }

    fn roll_window(&self, state: &mut AdmissionState, now: Instant) {
        if self.window_expired(&state.window, now) {
            state.window.count = 0;
            state.window.window_start = now;
            debug!(queue_depth = state.queue.len(), "admission window reset");
        }
    }

    fn release_queued(&self, state: &mut AdmissionState, now: Instant) {
        while state.window.count < self.config.capacity {
            let Some(ticket) = state.queue.pop_front() else {
                break;
            };
            let grant = AdmissionGrant {
                window_start: state.window.window_start,
                slot: state.window.count + 1,
                waited: now.saturating_duration_since(ticket.enqueued_at),
            };
            // A closed receiver means the waiter is gone; its slot stays free.
            if ticket.completion.send(grant).is_ok() {
                state.window.count += 1;
                debug!(
                    ticket = ticket.id,
                    count = state.window.count,
                    "queued request admitted"
                );
            }
        }
    }

    fn abandon(&self, ticket: u64, completion: &mut oneshot::Receiver<AdmissionGrant>) {
        let mut state = self.lock();
        if let Some(position) = state.queue.iter().position(|queued| queued.id == ticket) {
            state.queue.remove(position);
            debug!(ticket, "queued request abandoned");
            return;
        }
        // Granted concurrently with the abandonment: give the slot back.
        if let Ok(grant) = completion.try_recv() {
            if grant.window_start == state.window.window_start && state.window.count > 0 {
                state.window.count -= 1;
                let now = self.clock.now();
                self.release_queued(&mut state, now);
            }
        }
    }

    fn next_boundary(&self) -> Instant {
        self.lock().window.window_start + self.config.window
    }

    fn window_expired(&self, window: &RateWindow, now: Instant) -> bool {
        now.saturating_duration_since(window.window_start) >= self.config.window
    }

    fn retry_after_locked(&self, state: &AdmissionState, now: Instant) -> u64 {
        let remaining =
            (state.window.window_start + self.config.window).saturating_duration_since(now);
        remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Waiter<'a> {
    controller: &'a AdmissionController,
    ticket: u64,
    completion: oneshot::Receiver<AdmissionGrant>,
    settled: bool,
}

impl Waiter<'_> {
    fn expire(&mut self) -> Result<AdmissionGrant, AdmissionError> {
        self.settled = true;
        let controller = self.controller;
        let now = controller.clock.now();
        let mut state = controller.lock();
        if let Some(position) = state.queue.iter().position(|queued| queued.id == self.ticket) {
            state.queue.remove(position);
            let retry_after_secs = controller.retry_after_locked(&state, now);
            warn!(ticket = self.ticket, retry_after_secs, "admission wait timed out");
            return Err(AdmissionError::RateLimitExceeded { retry_after_secs });
        }
        // Released by the same boundary that hit the deadline.
        self.completion.try_recv().map_err(|_| AdmissionError::Closed)
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.controller.abandon(self.ticket, &mut self.completion);
        }
    }
}

fn utilization(count: u32, limit: u32) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    f64::from(count) / f64::from(limit) * 100.0
}
