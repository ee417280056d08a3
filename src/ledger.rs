use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::SignalStore;
use crate::types::{Signal, SignalKind};

/// Record of every signal ever forwarded downstream.
///
/// Safe to share between schedulers: `is_new_and_mark` holds one lock across
/// the check, the durable append and the in-memory insert, so two callers
/// racing on the same key see exactly one `true`. The set never shrinks.
pub struct DedupLedger {
    seen: Mutex<HashSet<String>>,
    store: Arc<dyn SignalStore>,
}

impl DedupLedger {
    /// Load the full seen set from the store.
    pub fn load(store: Arc<dyn SignalStore>) -> Result<Self, StoreError> {
        let seen = store.load_seen()?;
        info!("Loaded {} seen signal(s) from store", seen.len());
        Ok(Self {
            seen: Mutex::new(seen),
            store,
        })
    }

    /// Returns `true` the first time a signal's key is seen, `false` after.
    ///
    /// The key is appended to the store before `true` is returned. If that
    /// append fails the signal stays unmarked and the error is returned, so the
    /// caller must not forward it.
    pub fn is_new_and_mark(&self, signal: &Signal<'_>) -> Result<bool, StoreError> {
        self.mark_key(signal.ledger_key(), signal.kind, &signal.value)
    }

    /// Same as [`is_new_and_mark`](Self::is_new_and_mark), run on the blocking
    /// pool so the store write does not stall a runtime worker.
    pub async fn mark_new(self: &Arc<Self>, signal: &Signal<'_>) -> Result<bool, StoreError> {
        let ledger = Arc::clone(self);
        let key = signal.ledger_key();
        let kind = signal.kind;
        let value = signal.value.clone();
        tokio::task::spawn_blocking(move || ledger.mark_key(key, kind, &value)).await?
    }

    fn mark_key(&self, key: String, kind: SignalKind, value: &str) -> Result<bool, StoreError> {
        let mut seen = self.seen.lock().map_err(|_| StoreError::Poisoned)?;
        if seen.contains(&key) {
            debug!(key = %key, "Signal already forwarded");
            return Ok(false);
        }
        self.store.append_seen(&key, kind, value)?;
        seen.insert(key);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::types::{AlertRecord, ContentItem, ItemId};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const ADDR: &str = "ABC123defghijkmnopqrstuvwxyzABCXYZ";

    fn item(id: &str, target: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            text: None,
            permalink: String::new(),
            published_at: None,
            is_repost: false,
            target: target.to_string(),
        }
    }

    fn address<'a>(value: &str, source: &'a ContentItem) -> Signal<'a> {
        Signal {
            kind: SignalKind::ContractAddress,
            value: value.to_string(),
            source,
        }
    }

    struct BrokenStore;

    impl SignalStore for BrokenStore {
        fn load_seen(&self) -> Result<HashSet<String>, StoreError> {
            Ok(HashSet::new())
        }
        fn append_seen(&self, _: &str, _: SignalKind, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        fn load_watermarks(&self) -> Result<HashMap<String, ItemId>, StoreError> {
            Ok(HashMap::new())
        }
        fn save_watermark(&self, _: &str, _: &ItemId) -> Result<(), StoreError> {
            Ok(())
        }
        fn append_alert(&self, _: &AlertRecord) -> Result<(), StoreError> {
            Ok(())
        }
        fn alert_count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn first_sighting_only() {
        let ledger = DedupLedger::load(Arc::new(MemoryStore::new())).unwrap();
        let a = item("1", "alice");
        let b = item("2", "bob");
        assert!(ledger.is_new_and_mark(&address(ADDR, &a)).unwrap());
        assert!(!ledger.is_new_and_mark(&address(ADDR, &a)).unwrap());
        // Same address from another target, different case and padding
        assert!(!ledger.is_new_and_mark(&address(&format!(" {} ", ADDR.to_lowercase()), &b)).unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        let a = item("1", "alice");
        {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let ledger = DedupLedger::load(store).unwrap();
            assert!(ledger.is_new_and_mark(&address(ADDR, &a)).unwrap());
        }
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let ledger = DedupLedger::load(store).unwrap();
        assert!(!ledger.is_new_and_mark(&address(ADDR, &a)).unwrap());
    }

    #[test]
    fn failed_persist_leaves_signal_unmarked() {
        let ledger = DedupLedger::load(Arc::new(BrokenStore)).unwrap();
        let a = item("1", "alice");
        assert!(ledger.is_new_and_mark(&address(ADDR, &a)).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn concurrent_callers_get_one_true() {
        let ledger = Arc::new(DedupLedger::load(Arc::new(MemoryStore::new())).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let src = item(&i.to_string(), &format!("target{i}"));
                    ledger.is_new_and_mark(&address(ADDR, &src)).unwrap()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
    #[tokio::test]
    async fn async_marking_shares_the_same_set() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(DedupLedger::load(store.clone()).unwrap());
        let a = item("1", "alice");
        assert!(ledger.mark_new(&address(ADDR, &a)).await.unwrap());
        assert!(!ledger.mark_new(&address(ADDR, &a)).await.unwrap());
        assert!(!ledger.is_new_and_mark(&address(ADDR, &a)).unwrap());
        assert!(store.load_seen().unwrap().contains(&format!("ca:{}", ADDR.to_lowercase())));
    }
}
