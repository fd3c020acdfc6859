//! In-flight request table. One entry per URL being fetched or recently
//! fetched; concurrent callers for the same URL coalesce onto the entry
//! instead of issuing their own network calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::Response;

type Slot = Option<Arc<Response>>;

enum Entry {
    /// A fetch is running. Waiters hold a clone of the receiver; the value
    /// flips to `Some` when the owner publishes.
    Pending { id: u64, rx: watch::Receiver<Slot> },
    /// A fetch finished recently. Served as-is within the freshness window.
    Done {
        response: Arc<Response>,
        completed_at: Instant,
    },
}

/// Outcome of resolving a URL against the table.
pub(crate) enum Claim {
    /// Caller owns the network call and must publish through [`InflightTable::complete`].
    Owner { id: u64, tx: watch::Sender<Slot> },
    /// Another caller owns the call; await the receiver.
    Wait { id: u64, rx: watch::Receiver<Slot> },
    /// A response completed within the freshness window.
    Fresh(Arc<Response>),
}

pub(crate) struct InflightTable {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    capacity: usize,
    next_id: AtomicU64,
}

impl InflightTable {
    pub(crate) fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `url` against the table. `use_window` is the caller's caching
    /// flag: when false, a completed entry is ignored and the caller becomes
    /// the new owner, but a pending entry is still coalesced onto.
    pub(crate) fn claim(&self, url: &str, use_window: bool) -> Claim {
        let mut entries = self.lock();

        match entries.get(url) {
            Some(Entry::Pending { id, rx }) => {
                return Claim::Wait {
                    id: *id,
                    rx: rx.clone(),
                }
            }
            Some(Entry::Done {
                response,
                completed_at,
            }) => {
                if use_window && completed_at.elapsed() <= self.ttl {
                    return Claim::Fresh(response.clone());
                }
                // Stale, or the caller wants the window skipped: the slot is
                // taken over below.
            }
            None => {}
        }

        if !entries.contains_key(url) && entries.len() >= self.capacity {
            self.evict_completed(&mut entries);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        entries.insert(url.to_string(), Entry::Pending { id, rx });
        Claim::Owner { id, tx }
    }

    /// Publish the owner's result. The table is updated before waiters are
    /// woken, so a caller arriving after the wake-up never sees a pending
    /// entry for a finished fetch. With `keep` the response stays behind for
    /// the freshness window; without it the slot is freed immediately.
    pub(crate) fn complete(
        &self,
        url: &str,
        id: u64,
        tx: watch::Sender<Slot>,
        response: Arc<Response>,
        keep: bool,
    ) {
        {
            let mut entries = self.lock();
            if matches!(entries.get(url), Some(Entry::Pending { id: current, .. }) if *current == id)
            {
                if keep {
                    entries.insert(
                        url.to_string(),
                        Entry::Done {
                            response: response.clone(),
                            completed_at: Instant::now(),
                        },
                    );
                } else {
                    entries.remove(url);
                }
            }
        }
        let _ = tx.send(Some(response));
    }

    /// Drop a pending entry whose owner went away without publishing.
    /// Removes only the entry with the matching claim id.
    pub(crate) fn forget_abandoned(&self, url: &str, id: u64) {
        let mut entries = self.lock();
        if matches!(entries.get(url), Some(Entry::Pending { id: current, .. }) if *current == id) {
            entries.remove(url);
        }
    }

    /// Half-clear: drop the oldest completed entries until the table is at
    /// half capacity. Pending entries are never touched.
    fn evict_completed(&self, entries: &mut HashMap<String, Entry>) {
        let target = self.capacity / 2;

        let mut completed: Vec<(String, Instant)> = entries
            .iter()
            .filter_map(|(url, entry)| match entry {
                Entry::Done { completed_at, .. } => Some((url.clone(), *completed_at)),
                Entry::Pending { .. } => None,
            })
            .collect();
        completed.sort_by_key(|(_, completed_at)| *completed_at);

        for (url, _) in completed {
            if entries.len() <= target {
                break;
            }
            entries.remove(&url);
        }

        tracing::debug!(remaining = entries.len(), "request table half-clear");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(status: u16) -> Arc<Response> {
        Arc::new(Response {
            status,
            body: bytes::Bytes::from_static(b"body"),
            headers: HashMap::new(),
            error: None,
        })
    }

    fn own(table: &InflightTable, url: &str) -> (u64, watch::Sender<Slot>) {
        match table.claim(url, true) {
            Claim::Owner { id, tx } => (id, tx),
            _ => panic!("expected to own the slot for {url}"),
        }
    }

    #[test]
    fn test_first_claim_owns_slot() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        assert!(matches!(table.claim("https://a", true), Claim::Owner { .. }));
    }

    #[test]
    fn test_second_claim_waits_on_pending() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let _owner = own(&table, "https://a");
        assert!(matches!(table.claim("https://a", true), Claim::Wait { .. }));
    }

    #[test]
    fn test_completed_entry_served_within_window() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (id, tx) = own(&table, "https://a");
        table.complete("https://a", id, tx, ok_response(200), true);

        match table.claim("https://a", true) {
            Claim::Fresh(response) => assert_eq!(response.status, 200),
            _ => panic!("expected fresh response"),
        }
    }

    #[test]
    fn test_failures_are_kept_like_successes() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (id, tx) = own(&table, "https://a");
        table.complete(
            "https://a",
            id,
            tx,
            Arc::new(Response::failure("connect refused")),
            true,
        );

        match table.claim("https://a", true) {
            Claim::Fresh(response) => {
                assert_eq!(response.status, 0);
                assert!(response.error.is_some());
            }
            _ => panic!("expected the failure to be replayed"),
        }
    }

    #[test]
    fn test_stale_entry_is_reclaimed() {
        let table = InflightTable::new(Duration::ZERO, 100);
        let (id, tx) = own(&table, "https://a");
        table.complete("https://a", id, tx, ok_response(200), true);

        // TTL is zero, so the completed entry is already stale.
        assert!(matches!(table.claim("https://a", true), Claim::Owner { .. }));
    }

    #[test]
    fn test_window_skipped_when_caching_disabled() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (id, tx) = own(&table, "https://a");
        table.complete("https://a", id, tx, ok_response(200), true);

        assert!(matches!(table.claim("https://a", false), Claim::Owner { .. }));
    }

    #[test]
    fn test_pending_still_coalesced_when_caching_disabled() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let _owner = own(&table, "https://a");
        assert!(matches!(table.claim("https://a", false), Claim::Wait { .. }));
    }

    #[test]
    fn test_complete_without_keep_frees_slot() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (id, tx) = own(&table, "https://a");
        table.complete("https://a", id, tx, ok_response(200), false);

        assert_eq!(table.len(), 0);
        assert!(matches!(table.claim("https://a", true), Claim::Owner { .. }));
    }

    #[test]
    fn test_waiters_wake_with_published_response() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (id, tx) = own(&table, "https://a");

        let mut rx = match table.claim("https://a", true) {
            Claim::Wait { rx, .. } => rx,
            _ => panic!("expected to wait"),
        };

        table.complete("https://a", id, tx, ok_response(204), true);
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|r| r.status),
            Some(204)
        );
    }

    #[test]
    fn test_overflow_half_clears_completed_entries() {
        let table = InflightTable::new(Duration::from_secs(60), 4);
        for i in 0..4 {
            let url = format!("https://done/{i}");
            let (id, tx) = own(&table, &url);
            table.complete(&url, id, tx, ok_response(200), true);
        }
        assert_eq!(table.len(), 4);

        // The fifth claim trips the half-clear before inserting itself.
        let _owner = own(&table, "https://new");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_half_clear_never_evicts_pending() {
        let table = InflightTable::new(Duration::from_secs(60), 2);
        let _p1 = own(&table, "https://pending/1");
        let _p2 = own(&table, "https://pending/2");

        let _p3 = own(&table, "https://pending/3");

        // Nothing was completed, so nothing could be evicted.
        assert_eq!(table.len(), 3);
        assert!(matches!(
            table.claim("https://pending/1", true),
            Claim::Wait { .. }
        ));
    }

    #[test]
    fn test_forget_abandoned_respects_claim_id() {
        let table = InflightTable::new(Duration::from_secs(5), 100);
        let (stale_id, stale_tx) = own(&table, "https://a");
        table.forget_abandoned("https://a", stale_id);

        // A new owner claims the slot; the stale id no longer matches.
        let (new_id, _tx) = own(&table, "https://a");
        table.forget_abandoned("https://a", stale_id);
        assert_eq!(table.len(), 1);
        assert!(matches!(table.claim("https://a", true), Claim::Wait { .. }));

        table.forget_abandoned("https://a", new_id);
        assert_eq!(table.len(), 0);
        drop(stale_tx);
    }
}
