//! Byte-identity dedup (C6). Keyed by a SHA-256 of the final outbound
//! body; an inflight entry carries a watch channel so every concurrent
//! duplicate observes the one stored response, and completed entries are
//! replayed for a short TTL so back-to-back retries see the same answer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::upstream::Headers;

/// Buffered response replayed to duplicates.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    pub is_stream: bool,
}

pub type DedupKey = [u8; 32];

pub fn dedup_key(body: &[u8]) -> DedupKey {
    Sha256::digest(body).into()
}

enum Entry {
    Inflight {
        tx: watch::Sender<Option<StoredResponse>>,
    },
    Completed {
        response: StoredResponse,
        at: Instant,
    },
}

/// Outcome of a lookup-or-mark call.
pub enum DedupOutcome {
    /// This request is the first; the caller owns the upstream call and
    /// must end with `complete` or `remove_inflight`.
    Primary,
    /// Another identical request is inflight; await the receiver.
    Join(watch::Receiver<Option<StoredResponse>>),
    /// A completed entry is still fresh; replay it.
    Replay(StoredResponse),
}

pub struct DedupStore {
    entries: Mutex<HashMap<DedupKey, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl DedupStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Single atomic check-and-mark; at most one inflight entry per key.
    pub fn check(&self, key: DedupKey) -> DedupOutcome {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some(Entry::Inflight { tx }) => DedupOutcome::Join(tx.subscribe()),
            Some(Entry::Completed { response, at }) if at.elapsed() < self.ttl => {
                DedupOutcome::Replay(response.clone())
            }
            _ => {
                let (tx, _rx) = watch::channel(None);
                entries.insert(key, Entry::Inflight { tx });
                self.sweep_locked(&mut entries);
                DedupOutcome::Primary
            }
        }
    }

    /// Atomically swap inflight -> completed and wake every waiter.
    pub fn complete(&self, key: DedupKey, response: StoredResponse) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Entry::Inflight { tx }) = entries.remove(&key) {
            let _ = tx.send(Some(response.clone()));
        }
        entries.insert(
            key,
            Entry::Completed {
                response,
                at: Instant::now(),
            },
        );
    }

    /// Drop an inflight entry without completing it (client disconnect,
    /// exhausted fallback). Waiters observe the closed channel.
    pub fn remove_inflight(&self, key: DedupKey) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(entries.get(&key), Some(Entry::Inflight { .. })) {
            entries.remove(&key);
        }
    }

    pub fn has_inflight(&self, key: DedupKey) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        matches!(entries.get(&key), Some(Entry::Inflight { .. }))
    }

    /// Expired completed entries go first; if the map is still over the
    /// bound, oldest completed entries are evicted. Inflight entries are
    /// never evicted here.
    fn sweep_locked(&self, entries: &mut HashMap<DedupKey, Entry>) {
        entries.retain(|_, entry| match entry {
            Entry::Completed { at, .. } => at.elapsed() < self.ttl,
            Entry::Inflight { .. } => true,
        });
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .filter_map(|(key, entry)| match entry {
                    Entry::Completed { at, .. } => Some((*key, *at)),
                    Entry::Inflight { .. } => None,
                })
                .min_by_key(|(_, at)| *at)
                .map(|(key, _)| key);
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Await an inflight entry's completion. `None` means the primary request
/// was cancelled before completing.
pub async fn await_completion(
    mut rx: watch::Receiver<Option<StoredResponse>>,
) -> Option<StoredResponse> {
    loop {
        if let Some(response) = rx.borrow().clone() {
            return Some(response);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(body: &str) -> StoredResponse {
        StoredResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
            is_stream: false,
        }
    }

    #[tokio::test]
    async fn duplicate_joins_and_sees_primary_bytes() {
        let store = DedupStore::new(Duration::from_secs(30), 16);
        let key = dedup_key(b"payload");

        assert!(matches!(store.check(key), DedupOutcome::Primary));
        let DedupOutcome::Join(rx) = store.check(key) else {
            panic!("expected join");
        };

        let waiter = tokio::spawn(await_completion(rx));
        store.complete(key, stored("answer"));
        let replayed = waiter.await.unwrap().unwrap();
        assert_eq!(replayed.body, Bytes::from("answer"));
    }

    #[tokio::test]
    async fn completed_entry_replays_within_ttl() {
        let store = DedupStore::new(Duration::from_secs(30), 16);
        let key = dedup_key(b"payload");
        assert!(matches!(store.check(key), DedupOutcome::Primary));
        store.complete(key, stored("answer"));

        match store.check(key) {
            DedupOutcome::Replay(response) => assert_eq!(response.body, Bytes::from("answer")),
            _ => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn expired_entry_makes_the_next_caller_primary() {
        let store = DedupStore::new(Duration::from_millis(20), 16);
        let key = dedup_key(b"payload");
        assert!(matches!(store.check(key), DedupOutcome::Primary));
        store.complete(key, stored("answer"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(store.check(key), DedupOutcome::Primary));
    }

    #[tokio::test]
    async fn removed_inflight_unblocks_waiters_with_none() {
        let store = DedupStore::new(Duration::from_secs(30), 16);
        let key = dedup_key(b"payload");
        assert!(matches!(store.check(key), DedupOutcome::Primary));
        let DedupOutcome::Join(rx) = store.check(key) else {
            panic!("expected join");
        };

        store.remove_inflight(key);
        assert!(await_completion(rx).await.is_none());
        assert!(!store.has_inflight(key));
    }

    #[test]
    fn size_bound_evicts_completed_not_inflight() {
        let store = DedupStore::new(Duration::from_secs(30), 2);
        for i in 0..4u8 {
            let key = dedup_key(&[i]);
            assert!(matches!(store.check(key), DedupOutcome::Primary));
            store.complete(key, stored("x"));
        }
        let inflight_key = dedup_key(b"inflight");
        assert!(matches!(store.check(inflight_key), DedupOutcome::Primary));
        assert!(store.has_inflight(inflight_key));
    }
}
