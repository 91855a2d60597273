use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(60);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct RateLimiter<C: Clock = SystemClock> {
    clock: C,
    calls_per_window: usize,
    calls: Vec<Instant>,
}

impl RateLimiter<SystemClock> {
    pub fn new(calls_per_window: usize) -> Self {
        Self::with_clock(calls_per_window, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(calls_per_window: usize, clock: C) -> Self {
        Self {
            clock,
            calls_per_window,
            calls: Vec::with_capacity(calls_per_window),
        }
    }

    pub fn calls_per_window(&self) -> usize {
        self.calls_per_window
    }

    pub fn is_allowed(&mut self) -> bool {
        let now = self.clock.now();
        self.prune(now);
        if self.calls.len() < self.calls_per_window {
            self.calls.push(now);
            true
        } else {
            false
        }
    }

    pub fn remaining(&mut self) -> usize {
        let now = self.clock.now();
        self.prune(now);
        self.calls_per_window.saturating_sub(self.calls.len())
    }

    fn prune(&mut self, now: Instant) {
        self.calls
            .retain(|call| now.saturating_duration_since(*call) < WINDOW);
    }
}
