// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Deadline service for the IGMP report scheduler.
//!
//! The stack is cooperative: nothing fires asynchronously. A component arms a
//! deadline some number of ticks in the future and learns about its expiry by
//! polling [`DeadlineService::poll_expired`] from the same context that arms
//! and cancels, which is what serializes expiry delivery against packet
//! processing. The tick resolution is [`TIMER_HZ`] (10 ms per tick).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timer resolution in ticks per second
pub const TIMER_HZ: u32 = 100;

const MS_PER_TICK: u32 = 1000 / TIMER_HZ;

/// Convert a millisecond delay to ticks, rounding up
pub const fn msec_to_ticks(ms: u32) -> u32 {
    ms.div_ceil(MS_PER_TICK)
}

/// Opaque handle naming an armed deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineHandle(u64);

/// Deadline arming, cancellation and randomness for the IGMP scheduler.
///
/// Injected at construction so the state machine never touches a global
/// clock. `arm_after` returns `None` when the deadline could not be armed;
/// the caller treats that as "nothing scheduled".
pub trait DeadlineService {
    /// Arm a deadline `ticks` from now. A zero delay fires on the next poll.
    fn arm_after(&mut self, ticks: u32) -> Option<DeadlineHandle>;

    /// Cancel an armed deadline. Best-effort: a handle already expired or
    /// unknown is ignored.
    fn cancel(&mut self, handle: DeadlineHandle);

    /// Uniformly distributed random value for response delay selection
    fn random_u32(&mut self) -> u32;

    /// Advance the service's notion of time by `ticks`
    fn advance(&mut self, ticks: u32);

    /// Return the next expired, uncancelled deadline, if any
    fn poll_expired(&mut self) -> Option<DeadlineHandle>;
}

#[derive(PartialEq, Eq)]
struct ScheduledDeadline {
    fire_at: u64,
    id: u64,
}

impl Ord for ScheduledDeadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScheduledDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Tick-counter deadline service.
///
/// Keeps armed deadlines in a min-heap keyed by absolute tick and resolves
/// cancellation lazily: cancelled ids are remembered and skipped when their
/// entry surfaces. Randomness comes from an xorshift generator seeded from
/// the system clock; tests use [`TickTimer::with_seed`] for determinism.
pub struct TickTimer {
    now: u64,
    next_id: u64,
    armed: BinaryHeap<Reverse<ScheduledDeadline>>,
    cancelled: HashSet<u64>,
    rng_state: u64,
}

impl TickTimer {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self::with_seed(seed | 1)
    }

    /// Deterministically seeded timer for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            now: 0,
            next_id: 1,
            armed: BinaryHeap::new(),
            cancelled: HashSet::new(),
            rng_state: seed | 1,
        }
    }

    /// Current tick count
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of armed, uncancelled deadlines
    pub fn pending(&self) -> usize {
        self.armed
            .iter()
            .filter(|Reverse(entry)| !self.cancelled.contains(&entry.id))
            .count()
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineService for TickTimer {
    fn arm_after(&mut self, ticks: u32) -> Option<DeadlineHandle> {
        let id = self.next_id;
        self.next_id += 1;
        self.armed.push(Reverse(ScheduledDeadline {
            fire_at: self.now + ticks as u64,
            id,
        }));
        Some(DeadlineHandle(id))
    }

    fn cancel(&mut self, handle: DeadlineHandle) {
        if handle.0 < self.next_id {
            self.cancelled.insert(handle.0);
        }
    }

    fn random_u32(&mut self) -> u32 {
        // xorshift64
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 32) as u32
    }

    fn advance(&mut self, ticks: u32) {
        self.now += ticks as u64;
    }

    fn poll_expired(&mut self) -> Option<DeadlineHandle> {
        while let Some(Reverse(next)) = self.armed.peek() {
            if next.fire_at > self.now {
                return None;
            }
            let entry = self.armed.pop().expect("peeked entry").0;
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            return Some(DeadlineHandle(entry.id));
        }
        None
    }
}
