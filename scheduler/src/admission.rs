//! Admission checks run once per inbound Request, before it ever reaches
//! a tenant queue: quota enforcement, queue capacity, and priority-based
//! shedding under sustained overload.

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;

/// Counts events in a trailing 60s window by recording their arrival
/// instants and pruning anything older on each check, the same
/// amortized-O(1)-per-call technique as `leadline_provider_client`'s
/// token bucket, but counting admissions rather than metering a rate.
pub struct SlidingWindowCounter {
    window: Duration,
    arrivals: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            arrivals: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(arrivals: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = arrivals.front() {
            if now.duration_since(front) > window {
                arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `true` and records the arrival if `limit` was not yet
    /// reached in the trailing window; otherwise returns `false` without
    /// recording it.
    pub fn try_admit(&self, limit: u32) -> bool {
        let now = Instant::now();
        let mut arrivals = self.arrivals.lock();
        Self::prune(&mut arrivals, now, self.window);
        if arrivals.len() as u32 >= limit {
            return false;
        }
        arrivals.push_back(now);
        true
    }
}
