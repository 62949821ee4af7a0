//! Suspicious-actor tracking
//!
//! Per-address webhook counters. Each record carries a mirrored
//! `backup_count`/`backup_last_seen` pair that is written in the same lock
//! section as the primary fields, so no reader ever sees them disagree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::SharedClock;

/// Default `count >= N` cutoff for the stats listing.
pub const DEFAULT_MIN_COUNT: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousActor {
    pub address: String,
    pub count: u64,
    pub backup_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub backup_last_seen: DateTime<Utc>,
    /// Never set by this crate; reserved for a blocking policy.
    pub is_blocked: bool,
    pub notes: String,
}

impl SuspiciousActor {
    fn new(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            count: 1,
            backup_count: 1,
            first_seen: now,
            last_seen: now,
            backup_last_seen: now,
            is_blocked: false,
            notes: String::new(),
        }
    }

    /// Primary and backup fields agree.
    pub fn is_mirrored(&self) -> bool {
        self.count == self.backup_count && self.last_seen == self.backup_last_seen
    }
}

pub struct SuspiciousTracker {
    actors: RwLock<HashMap<String, SuspiciousActor>>,
    clock: SharedClock,
}

impl SuspiciousTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            actors: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Count one webhook hit from `address`, creating the record on first sight.
    pub fn record_webhook_from_address(&self, address: &str) -> SuspiciousActor {
        let now = self.clock.now();
        let mut actors = self.actors.write();

        let actor = actors
            .entry(address.to_string())
            .and_modify(|actor| {
                actor.count += 1;
                actor.last_seen = now;
                actor.backup_count = actor.count;
                actor.backup_last_seen = actor.last_seen;
            })
            .or_insert_with(|| SuspiciousActor::new(address, now));

        tracing::debug!(
            "[suspicious] [mirrored_write] ip={} count={} backup_count={}",
            address,
            actor.count,
            actor.backup_count,
        );

        actor.clone()
    }

    pub fn get(&self, address: &str) -> Option<SuspiciousActor> {
        self.actors.read().get(address).cloned()
    }

    /// Actors with `count >= min_count`, highest count first.
    pub fn list_frequent(&self, min_count: u64) -> Vec<SuspiciousActor> {
        let mut frequent: Vec<SuspiciousActor> = self
            .actors
            .read()
            .values()
            .filter(|a| a.count >= min_count)
            .cloned()
            .collect();
        frequent.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
        frequent
    }

    pub fn len(&self) -> usize {
        self.actors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn tracker() -> (Arc<ManualClock>, SuspiciousTracker) {
        let clock = Arc::new(ManualClock::starting_now());
        (clock.clone(), SuspiciousTracker::new(clock))
    }

    #[test]
    fn test_first_hit_creates_record() {
        let (clock, tracker) = tracker();
        let actor = tracker.record_webhook_from_address("10.0.0.1");

        assert_eq!(actor.count, 1);
        assert_eq!(actor.backup_count, 1);
        assert_eq!(actor.first_seen, clock.now());
        assert!(!actor.is_blocked);
        assert!(actor.is_mirrored());
    }

    #[test]
    fn test_repeat_hits_keep_mirror_in_sync() {
        let (clock, tracker) = tracker();
        let first = tracker.record_webhook_from_address("10.0.0.1");

        for _ in 0..4 {
            clock.advance_secs(1);
            let actor = tracker.record_webhook_from_address("10.0.0.1");
            assert!(actor.is_mirrored());
        }

        let actor = tracker.get("10.0.0.1").unwrap();
        assert_eq!(actor.count, 5);
        assert_eq!(actor.backup_count, 5);
        assert_eq!(actor.first_seen, first.first_seen);
        assert_eq!(actor.last_seen, clock.now());
        assert_eq!(actor.backup_last_seen, clock.now());
    }

    #[test]
    fn test_list_frequent_filters_and_orders() {
        let (_clock, tracker) = tracker();
        for _ in 0..3 {
            tracker.record_webhook_from_address("10.0.0.1");
        }
        for _ in 0..7 {
            tracker.record_webhook_from_address("10.0.0.2");
        }
        for _ in 0..5 {
            tracker.record_webhook_from_address("10.0.0.3");
        }

        let frequent = tracker.list_frequent(DEFAULT_MIN_COUNT);
        let addrs: Vec<&str> = frequent.iter().map(|a| a.address.as_str()).collect();
        assert_eq!(addrs, vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_concurrent_hits_are_counted_once_each() {
        let (_clock, tracker) = tracker();
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        tracker.record_webhook_from_address("10.0.0.9");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let actor = tracker.get("10.0.0.9").unwrap();
        assert_eq!(actor.count, 1000);
        assert!(actor.is_mirrored());
    }
}
