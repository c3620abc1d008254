//! Circuit breaker for the CRM adapter.
//!
//! Opens after N consecutive failures and stays open for the cool-off period;
//! the first call after cool-off probes the service (half-open). CRM calls are
//! best-effort, so an open circuit surfaces as a fast typed error the caller
//! logs and drops.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { until: InstantWrapper },
    HalfOpen,
}

// Instant is not Eq; wrap for the derive.
#[derive(Debug, Clone, Copy)]
struct InstantWrapper(Instant);

impl PartialEq for InstantWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for InstantWrapper {}

pub struct CircuitBreaker {
    state: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
            }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// May a call proceed right now?
    pub fn allow(&self) -> bool {
        let mut inner = self.state.lock().unwrap();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open { until } => {
                if Instant::now() >= until.0 {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.state = State::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.consecutive_failures += 1;
        if matches!(inner.state, State::HalfOpen) || inner.consecutive_failures >= self.threshold {
            inner.state = State::Open {
                until: InstantWrapper(Instant::now() + self.cooldown),
            };
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let b = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(b.allow());
        b.record_failure();
        b.record_failure();
        assert!(b.allow());
        b.record_failure();
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_the_count() {
        let b = CircuitBreaker::new(2, Duration::from_secs(60));
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert!(b.allow(), "count should have reset on success");
    }

    #[test]
    fn reopens_from_half_open_on_failure() {
        let b = CircuitBreaker::new(1, Duration::from_millis(0));
        b.record_failure();
        // Zero cooldown: immediately half-open.
        assert!(b.allow());
        b.record_failure();
        {
            let inner = b.state.lock().unwrap();
            assert!(matches!(inner.state, State::Open { .. }));
        }
    }

    #[test]
    fn closes_from_half_open_on_success() {
        let b = CircuitBreaker::new(1, Duration::from_millis(0));
        b.record_failure();
        assert!(b.allow());
        b.record_success();
        assert!(b.allow());
    }
}
