//! Retry pacing shared by the outbound HTTP clients.
//!
//! Two pieces: an exponential backoff schedule with jitter, and a client-side
//! token bucket so no external provider is hammered past its rate budget.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Exponential backoff schedule: `base * 2^attempt`, capped, plus up to 25% jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        exp + Duration::from_millis(jitter_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8))
    }
}

/// Client-side token bucket, one per external provider.
///
/// `acquire` waits until a token is available; refill is computed lazily from
/// elapsed time, so there is no background task to manage.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    /// Take one token, sleeping until the bucket refills if it is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_sec,
                    ))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        // Jitter adds at most 25%, so bounds are deterministic.
        let d0 = b.delay(0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(125));
        let d3 = b.delay(3);
        assert!(d3 >= Duration::from_millis(800));
        let d10 = b.delay(10);
        assert!(d10 <= Duration::from_millis(1250), "cap not applied: {d10:?}");
    }

    #[tokio::test]
    async fn bucket_grants_up_to_capacity_immediately() {
        let bucket = TokenBucket::new(3, 1.0);
        let start = std::time::Instant::now();
        bucket.acquire().await;
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_waits_when_empty() {
        let bucket = TokenBucket::new(1, 10.0);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        // One token at 10/s refill: ~100ms of (virtual) waiting.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
