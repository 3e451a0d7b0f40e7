//! Client-side token-bucket limiter plus provider rate-limit header
//! parsing.

use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// A token bucket admitting up to `rate_per_minute` requests per
/// minute, bursting up to the full bucket capacity.
pub struct TokenBucketLimiter {
    bucket: Mutex<Bucket>,
}

impl TokenBucketLimiter {
    pub fn new(rate_per_minute: u32) -> Self {
        let capacity = rate_per_minute as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                refill_per_sec: capacity / 60.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits (if necessary) until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / bucket.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// Parses a standard `Retry-After` response header, honored ahead of
/// the retry executor's own backoff schedule on a 429 response.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    value.parse::<u64>().ok().map(Duration::from_secs)
}
