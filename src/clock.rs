//! Monotonic time source and the timer table driven by the event loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// Clock backed by `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant corresponding to `ms` on this clock.
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.origin + std::time::Duration::from_millis(ms)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for deterministic tests and simulations.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Every timer the core arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Periodic discovery announce while hosting.
    Announce,
    /// Periodic stale-room eviction while scanning.
    RoomCleanup,
    /// Hard deadline on a join attempt.
    JoinTimeout,
    /// Hard deadline on the host's ready check.
    ReadyCheckTimeout,
    /// End of the pre-race countdown.
    CountdownEnd,
    /// Periodic progress broadcast while racing.
    ProgressTick,
}

/// Armed timers keyed by kind; arming an armed timer replaces its deadline.
#[derive(Debug, Default)]
pub struct TimerTable {
    deadlines: HashMap<Timer, u64>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, timer: Timer, deadline_ms: u64) {
        self.deadlines.insert(timer, deadline_ms);
    }

    pub fn disarm(&mut self, timer: Timer) {
        self.deadlines.remove(&timer);
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.deadlines.contains_key(&timer)
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().copied().min()
    }

    /// Removes and returns every timer due at `now_ms`, earliest first.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<Timer> {
        let mut due: Vec<(u64, Timer)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(timer, deadline)| (*deadline, *timer))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);

        for (_, timer) in &due {
            self.deadlines.remove(timer);
        }

        due.into_iter().map(|(_, timer)| timer).collect()
    }
}
