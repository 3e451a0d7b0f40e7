//! Stage-retry backoff: `delay(a+1) = min(base·2^a, cap) × jitter(±25%)`.
//! Distinct from
//! `leadline_provider_client::RetryExecutor`, which retries within a
//! single call; this computes the delay before the *scheduler* picks a
//! Request back up, since a stage retry releases the advance-lease
//! between attempts.

use std::time::Duration;

use leadline_config::RetryConfig;
use rand::Rng;

pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay.as_secs_f64() * config.multiplier.powi(attempt as i32);
    let base = base.min(config.max_delay.as_secs_f64());
    let jitter_span = base * config.jitter_ratio;
    let jitter = rand::rng().random_range(-jitter_span..=jitter_span);
    Duration::from_secs_f64((base + jitter).max(0.0))
}
