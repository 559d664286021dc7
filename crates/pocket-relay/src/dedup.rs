//! Duplicate suppression
//!
//! Flooding with no topology knowledge relies entirely on each node
//! remembering which pocket ids it has already routed. Records expire after a
//! fixed TTL measured from insertion; expiry is time based only. Expired
//! records are removed by a periodic sweep and are also treated as unseen the
//! moment they pass their deadline, so a sweep that runs late never extends
//! the window.
//!
//! Insertion order equals expiry order (constant TTL), so a FIFO queue of
//! `(deadline, id)` is enough to sweep without scanning the whole map.

use crate::wire::PocketId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::trace;

/// Time-bounded set of recently routed pocket ids.
#[derive(Debug)]
pub struct SeenPockets {
    ttl: Duration,
    deadlines: HashMap<PocketId, Instant>,
    expiry_queue: VecDeque<(Instant, PocketId)>,
}

impl SeenPockets {
    /// Create a suppressor with the given window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            deadlines: HashMap::new(),
            expiry_queue: VecDeque::new(),
        }
    }

    /// Suppression window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `id` was recorded and has not expired at `now`.
    pub fn seen_at(&self, id: &PocketId, now: Instant) -> bool {
        self.deadlines
            .get(id)
            .is_some_and(|deadline| *deadline > now)
    }

    /// Record `id` at `now`, restarting its window.
    pub fn mark_seen_at(&mut self, id: PocketId, now: Instant) {
        let deadline = now + self.ttl;
        self.deadlines.insert(id.clone(), deadline);
        self.expiry_queue.push_back((deadline, id));
    }

    /// Atomic seen-check plus mark. Returns true if `id` is new.
    pub fn check_and_mark_at(&mut self, id: &PocketId, now: Instant) -> bool {
        if self.seen_at(id, now) {
            return false;
        }
        self.mark_seen_at(id.clone(), now);
        true
    }

    /// Drop every record whose window ended at or before `now`.
    ///
    /// Returns how many ids were forgotten.
    pub fn sweep_at(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((deadline, _)) = self.expiry_queue.front() {
            if *deadline > now {
                break;
            }
            let Some((deadline, id)) = self.expiry_queue.pop_front() else {
                break;
            };
            // A re-mark after expiry pushes a newer deadline; only the
            // queue entry matching the live deadline removes the record.
            if self.deadlines.get(&id) == Some(&deadline) {
                self.deadlines.remove(&id);
                removed += 1;
            }
        }

        if removed > 0 {
            trace!(removed, remaining = self.deadlines.len(), "Swept expired pocket ids");
        }
        removed
    }

    /// `seen_at` with the current time.
    pub fn seen(&self, id: &PocketId) -> bool {
        self.seen_at(id, Instant::now())
    }

    /// `mark_seen_at` with the current time.
    pub fn mark_seen(&mut self, id: PocketId) {
        self.mark_seen_at(id, Instant::now());
    }

    /// `check_and_mark_at` with the current time.
    pub fn check_and_mark(&mut self, id: &PocketId) -> bool {
        self.check_and_mark_at(id, Instant::now())
    }

    /// `sweep_at` with the current time.
    pub fn sweep(&mut self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Number of tracked ids, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Nothing tracked.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
