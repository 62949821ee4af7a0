//! Connection store
//!
//! Owns every [`Connection`] record and is the only place `status` is written.
//! Records are spread over shards keyed by source address; a shard's write
//! lock covers both its records and its plain-connection index, which makes
//! the find-or-create path for one address atomic without a store-wide lock.
//!
//! Closing a record moves it out of the shard's active map, so list, count
//! and summary scans only ever walk live records. Closed records stay
//! reachable through [`ConnectionStore::get`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use super::connection::{Connection, ConnectionId, ConnectionStatus};
use crate::clock::SharedClock;

/// Default shard count
pub const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),

    #[error("Connection already closed: {0}")]
    AlreadyClosed(ConnectionId),
}

/// Which active connections to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveFilter {
    All,
    WebhookOnly,
}

/// Active-connection counts taken in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivitySummary {
    pub total_active: usize,
    pub inactive: usize,
    pub webhook: usize,
}

#[derive(Debug, Default)]
struct Shard {
    /// ACTIVE records only.
    active: HashMap<ConnectionId, Connection>,
    closed: HashMap<ConnectionId, Connection>,
    /// Source address -> its ACTIVE plain connection.
    plain_by_address: HashMap<String, ConnectionId>,
}

pub struct ConnectionStore {
    shards: Box<[RwLock<Shard>]>,
    next_seq: AtomicU64,
    inactivity_timeout_secs: u64,
    clock: SharedClock,
}

impl ConnectionStore {
    pub fn new(clock: SharedClock, inactivity_timeout_secs: u64) -> Self {
        Self::with_shards(clock, inactivity_timeout_secs, DEFAULT_SHARDS)
    }

    pub fn with_shards(clock: SharedClock, inactivity_timeout_secs: u64, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            next_seq: AtomicU64::new(0),
            inactivity_timeout_secs,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn inactivity_timeout_secs(&self) -> u64 {
        self.inactivity_timeout_secs
    }

    fn shard_for(&self, address: &str) -> &RwLock<Shard> {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a new ACTIVE webhook record. Never merges with an existing one.
    pub fn record_webhook_activity(
        &self,
        source_address: &str,
        user_agent: &str,
        endpoint: &str,
    ) -> Connection {
        let mut shard = self.shard_for(source_address).write();
        let conn = Connection::new(
            self.next_seq(),
            source_address,
            user_agent,
            Some(endpoint),
            self.clock.now(),
        );
        shard.active.insert(conn.id, conn.clone());
        conn
    }

    /// Refresh the address's ACTIVE plain record, or create one.
    pub fn record_plain_activity(&self, source_address: &str, user_agent: &str) -> Connection {
        let mut guard = self.shard_for(source_address).write();
        let shard = &mut *guard;
        let now = self.clock.now();

        if let Some(id) = shard.plain_by_address.get(source_address).copied() {
            if let Some(conn) = shard.active.get_mut(&id) {
                conn.touch(now);
                return conn.clone();
            }
        }

        let conn = Connection::new(self.next_seq(), source_address, user_agent, None, now);
        shard
            .plain_by_address
            .insert(source_address.to_string(), conn.id);
        shard.active.insert(conn.id, conn.clone());
        conn
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.shards
            .iter()
            .find_map(|shard| {
                let shard = shard.read();
                shard
                    .active
                    .get(&id)
                    .or_else(|| shard.closed.get(&id))
                    .cloned()
            })
    }

    /// All ACTIVE records in insertion order.
    pub fn list_active(&self) -> Vec<Connection> {
        let mut active: Vec<Connection> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard.read().active.values().cloned().collect::<Vec<_>>()
            })
            .collect();
        active.sort_by_key(|c| c.seq);
        active
    }

    pub fn count_active(&self, filter: ActiveFilter) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .active
                    .values()
                    .filter(|c| filter == ActiveFilter::All || c.is_webhook)
                    .count()
            })
            .sum()
    }

    /// ACTIVE records idle for longer than the timeout. Unordered.
    pub fn list_inactive(&self) -> Vec<Connection> {
        let now = self.clock.now();
        let timeout = self.inactivity_timeout_secs;
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .active
                    .values()
                    .filter(|c| c.is_inactive(now, timeout))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn count_inactive(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.inactivity_timeout_secs;
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .read()
                    .active
                    .values()
                    .filter(|c| c.is_inactive(now, timeout))
                    .count()
            })
            .sum()
    }

    pub fn summary(&self) -> ActivitySummary {
        let now = self.clock.now();
        let timeout = self.inactivity_timeout_secs;
        let mut summary = ActivitySummary::default();

        for shard in self.shards.iter() {
            let shard = shard.read();
            for conn in shard.active.values() {
                summary.total_active += 1;
                if conn.is_webhook {
                    summary.webhook += 1;
                }
                if conn.is_inactive(now, timeout) {
                    summary.inactive += 1;
                }
            }
        }

        summary
    }

    /// Move one ACTIVE record to CLOSED.
    pub fn close_connection(&self, id: ConnectionId) -> Result<Connection, StoreError> {
        for shard in self.shards.iter() {
            let guard = shard.upgradable_read();
            if guard.closed.contains_key(&id) {
                return Err(StoreError::AlreadyClosed(id));
            }
            if !guard.active.contains_key(&id) {
                continue;
            }

            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            let shard = &mut *guard;
            let Some(mut conn) = shard.active.remove(&id) else {
                return Err(StoreError::NotFound(id));
            };
            conn.status = ConnectionStatus::Closed;

            if !conn.is_webhook && shard.plain_by_address.get(&conn.source_address) == Some(&id) {
                shard.plain_by_address.remove(&conn.source_address);
            }

            shard.closed.insert(id, conn.clone());
            return Ok(conn);
        }

        Err(StoreError::NotFound(id))
    }

    /// Close every matching ACTIVE record. Unknown and already-closed ids are
    /// skipped. Returns how many records changed.
    pub fn close(&self, ids: &HashSet<ConnectionId>) -> usize {
        ids.iter()
            .filter(|id| self.close_connection(**id).is_ok())
            .count()
    }

    /// Total records held, closed ones included.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                let s = s.read();
                s.active.len() + s.closed.len()
            })
            .sum()
    }

    pub fn count_closed(&self) -> usize {
        self.shards.iter().map(|s| s.read().closed.len()).sum()
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

    fn store_with_clock() -> (Arc<ManualClock>, ConnectionStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = ConnectionStore::new(clock.clone(), 30);
        (clock, store)
    }

    #[test]
    fn test_plain_activity_reuses_record() {
        let (clock, store) = store_with_clock();

        let first = store.record_plain_activity("10.0.0.1", "ua");
        clock.advance_secs(5);
        let second = store.record_plain_activity("10.0.0.1", "ua");
        clock.advance_secs(5);
        let third = store.record_plain_activity("10.0.0.1", "ua");

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, third.id);
        assert_eq!(third.last_activity, clock.now());
        assert_eq!(third.created_at, first.created_at);
        assert_eq!(store.count_active(ActiveFilter::All), 1);
    }

    #[test]
    fn test_plain_activity_is_per_address() {
        let (_clock, store) = store_with_clock();
        let a = store.record_plain_activity("10.0.0.1", "ua");
        let b = store.record_plain_activity("10.0.0.2", "ua");
        assert_ne!(a.id, b.id);
        assert_eq!(store.count_active(ActiveFilter::All), 2);
    }

    #[test]
    fn test_webhook_activity_always_inserts() {
        let (_clock, store) = store_with_clock();
        let ids: HashSet<_> = (0..5)
            .map(|_| store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/").id)
            .collect();

        assert_eq!(ids.len(), 5);
        assert_eq!(store.count_active(ActiveFilter::WebhookOnly), 5);
        assert_eq!(store.count_active(ActiveFilter::All), 5);
    }

    #[test]
    fn test_webhook_does_not_touch_plain_record() {
        let (clock, store) = store_with_clock();
        let plain = store.record_plain_activity("10.0.0.1", "ua");
        clock.advance_secs(40);
        store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/");

        let plain = store.get(plain.id).unwrap();
        assert!(plain.is_inactive(clock.now(), 30));
        assert_eq!(store.count_active(ActiveFilter::WebhookOnly), 1);
    }

    #[test]
    fn test_list_inactive_respects_timeout() {
        let (clock, store) = store_with_clock();
        store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/");
        clock.advance_secs(20);
        store.record_webhook_activity("10.0.0.2", "ua", "/api/webhook/");
        clock.advance_secs(11);

        let inactive = store.list_inactive();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].source_address, "10.0.0.1");
        assert_eq!(store.count_inactive(), 1);
    }

    #[test]
    fn test_list_active_in_insertion_order() {
        let (_clock, store) = store_with_clock();
        for i in 0..20 {
            store.record_webhook_activity(&format!("10.0.0.{}", i), "ua", "/api/webhook/");
        }
        let seqs: Vec<u64> = store.list_active().iter().map(|c| c.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
    }

    #[test]
    fn test_summary_counts() {
        let (clock, store) = store_with_clock();
        store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/");
        store.record_plain_activity("10.0.0.2", "ua");
        clock.advance_secs(31);
        let fresh = store.record_webhook_activity("10.0.0.3", "ua", "/api/webhook/");
        store.close_connection(fresh.id).unwrap();
        store.record_webhook_activity("10.0.0.3", "ua", "/api/webhook/");

        let summary = store.summary();
        assert_eq!(
            summary,
            ActivitySummary {
                total_active: 3,
                inactive: 2,
                webhook: 2,
            }
        );
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let (clock, store) = store_with_clock();
        let conn = store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/");
        clock.advance_secs(60);

        assert!(store.close_connection(conn.id).is_ok());
        assert_eq!(
            store.close_connection(conn.id).unwrap_err(),
            StoreError::AlreadyClosed(conn.id)
        );

        assert!(store.list_active().is_empty());
        assert!(store.list_inactive().is_empty());
        assert_eq!(store.get(conn.id).unwrap().status, ConnectionStatus::Closed);
    }

    #[test]
    fn test_closed_records_leave_the_active_set() {
        let (clock, store) = store_with_clock();
        let ids: Vec<_> = (0..10)
            .map(|i| {
                store
                    .record_webhook_activity(&format!("10.0.0.{}", i), "ua", "/api/webhook/")
                    .id
            })
            .collect();
        clock.advance_secs(60);

        for id in &ids[..6] {
            store.close_connection(*id).unwrap();
        }

        assert_eq!(store.len(), 10);
        assert_eq!(store.count_closed(), 6);
        assert_eq!(store.count_active(ActiveFilter::All), 4);
        assert_eq!(store.count_inactive(), 4);
        assert_eq!(store.summary().total_active, 4);
        assert!(store.list_active().iter().all(|c| c.is_active()));
        assert_eq!(store.get(ids[0]).unwrap().status, ConnectionStatus::Closed);
        assert_eq!(
            store.close_connection(ids[0]).unwrap_err(),
            StoreError::AlreadyClosed(ids[0])
        );
    }

    #[test]
    fn test_close_set_skips_unknown_and_closed() {
        let (_clock, store) = store_with_clock();
        let a = store.record_webhook_activity("10.0.0.1", "ua", "/api/webhook/");
        let b = store.record_webhook_activity("10.0.0.2", "ua", "/api/webhook/");
        store.close_connection(b.id).unwrap();

        let ids: HashSet<_> = [a.id, b.id, ConnectionId::new()].into_iter().collect();
        assert_eq!(store.close(&ids), 1);
        assert_eq!(store.count_active(ActiveFilter::All), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_closed_plain_record_is_replaced() {
        let (_clock, store) = store_with_clock();
        let first = store.record_plain_activity("10.0.0.1", "ua");
        store.close_connection(first.id).unwrap();

        let second = store.record_plain_activity("10.0.0.1", "ua");
        assert_ne!(first.id, second.id);
        assert!(second.is_active());
        assert_eq!(store.count_active(ActiveFilter::All), 1);
    }

    #[test]
    fn test_concurrent_plain_activity_single_record() {
        let (_clock, store) = store_with_clock();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| store.record_plain_activity("10.0.0.1", "ua").id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<ConnectionId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 1);
        assert_eq!(store.count_active(ActiveFilter::All), 1);
    }

    #[test]
    fn test_single_shard_store() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = ConnectionStore::with_shards(clock, 30, 0);
        store.record_plain_activity("10.0.0.1", "ua");
        store.record_plain_activity("10.0.0.2", "ua");
        assert_eq!(store.count_active(ActiveFilter::All), 2);
    }
}
