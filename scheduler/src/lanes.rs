//! Per-tenant FIFO queues plus the weighted round-robin dequeue
//! discipline that gives each tenant worker time proportional to its
//! priority.
//!
//! Implemented as deficit round robin: each non-empty lane accrues
//! `priority` credit per scan; a lane spends `UNIT` credit to dequeue
//! one Request. A weight-1 tenant gets one turn per `UNIT` scans; a
//! weight-4 tenant gets four.

use std::collections::VecDeque;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use leadline_model::ids::RequestId;
use leadline_model::ids::TenantId;
use parking_lot::Mutex;

const UNIT: i64 = 100;

struct Lane {
    queue: Mutex<VecDeque<RequestId>>,
    priority: AtomicU32,
    in_flight: AtomicUsize,
    deficit: AtomicI64,
}

impl Lane {
    fn new(priority: u32) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            priority: AtomicU32::new(priority.max(1)),
            in_flight: AtomicUsize::new(0),
            deficit: AtomicI64::new(0),
        }
    }
}

/// Holds one lane per tenant seen so far. Lanes are created lazily on
/// first admission and never removed — a quiet tenant's empty, idle
/// lane costs one map entry.
#[derive(Default)]
pub struct TenantLanes {
    lanes: DashMap<TenantId, Lane>,
}

impl TenantLanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self, tenant_id: TenantId) -> usize {
        self.lanes
            .get(&tenant_id)
            .map(|lane| lane.queue.lock().len())
            .unwrap_or(0)
    }

    /// The last priority seen for `tenant_id`, or `1` if its lane hasn't
    /// been created yet.
    pub fn priority(&self, tenant_id: TenantId) -> u32 {
        self.lanes
            .get(&tenant_id)
            .map(|lane| lane.priority.load(Ordering::Relaxed))
            .unwrap_or(1)
    }

    pub fn push(&self, tenant_id: TenantId, priority: u32, request_id: RequestId) {
        let lane = self.lanes.entry(tenant_id).or_insert_with(|| Lane::new(priority));
        lane.priority.store(priority.max(1), Ordering::Relaxed);
        lane.queue.lock().push_back(request_id);
    }

    /// Releases a concurrency slot for `tenant_id`, used once a picked
    /// Request stops consuming a worker (it finished, or it's waiting
    /// out a retry delay off the lane entirely).
    pub fn release(&self, tenant_id: TenantId) {
        if let Some(lane) = self.lanes.get(&tenant_id) {
            lane.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Scans every known lane once, granting deficit and draining the
    /// first lane whose queue is non-empty, under its concurrency
    /// ceiling, and has accrued enough deficit. Returns the picked
    /// tenant/request with its concurrency slot already claimed — the
    /// caller must eventually call [`TenantLanes::release`].
    pub fn next_ready(&self, concurrency_limit: usize) -> Option<(TenantId, RequestId)> {
        for entry in self.lanes.iter() {
            let tenant_id = *entry.key();
            let lane = entry.value();
            let mut queue = lane.queue.lock();
            if queue.is_empty() {
                lane.deficit.store(0, Ordering::Relaxed);
                continue;
            }
            if lane.in_flight.load(Ordering::Acquire) >= concurrency_limit {
                continue;
            }
            let priority = lane.priority.load(Ordering::Relaxed) as i64;
            let deficit = lane.deficit.fetch_add(priority, Ordering::AcqRel) + priority;
            if deficit < UNIT {
                continue;
            }
            if let Some(request_id) = queue.pop_front() {
                lane.deficit.store(deficit - UNIT, Ordering::Relaxed);
                lane.in_flight.fetch_add(1, Ordering::AcqRel);
                return Some((tenant_id, request_id));
            }
        }
        None
    }
}
