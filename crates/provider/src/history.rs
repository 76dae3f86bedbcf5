//! History Store port with an in-memory implementation.
//!
//! The durable store is external; the core only needs a small key/list API.
//! [`InMemoryHistory`] backs tests and single-process deployments, honoring
//! the same per-record TTL and list-cap semantics a Redis-style store would.

use alloy_primitives::Address;
use async_trait::async_trait;
use sentinel_core::error::HistoryError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Records live this long before they are considered expired.
pub const RECORD_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Per-address history lists are trimmed to this many records.
pub const HISTORY_CAP: usize = 100;

/// Key for the per-address scan list.
pub fn history_key(address: &Address) -> String {
    format!("history:{address:#x}")
}

/// Key for one scan snapshot.
pub fn scan_key(address: &Address, timestamp_ms: u64) -> String {
    format!("scan:{address:#x}:{timestamp_ms}")
}

/// The key/list operations the core uses. Records are line-size JSON.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn list_push_front(&self, key: &str, record: String) -> Result<(), HistoryError>;
    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), HistoryError>;
    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, HistoryError>;
    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), HistoryError>;
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, HistoryError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local history store.
///
/// One mutex over both maps: writes from concurrent scans to the same
/// address are serialized, so trimming and TTL stay consistent.
#[derive(Default)]
pub struct InMemoryHistory {
    inner: Mutex<Maps>,
}

#[derive(Default)]
struct Maps {
    lists: HashMap<String, VecDeque<Entry>>,
    kv: HashMap<String, Entry>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn list_push_front(&self, key: &str, record: String) -> Result<(), HistoryError> {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        maps.lists.entry(key.to_string()).or_default().push_front(Entry {
            value: record,
            expires_at: Instant::now() + RECORD_TTL,
        });
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), HistoryError> {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = maps.lists.get_mut(key) {
            let now = Instant::now();
            list.retain(|e| e.expires_at > now);
            if start == 0 {
                list.truncate(stop + 1);
            } else {
                let kept: VecDeque<Entry> = list
                    .drain(..)
                    .skip(start)
                    .take(stop.saturating_sub(start) + 1)
                    .collect();
                *list = kept;
            }
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, HistoryError> {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(list) = maps.lists.get_mut(key) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        list.retain(|e| e.expires_at > now);
        Ok(list
            .iter()
            .skip(start)
            .take(stop.saturating_sub(start) + 1)
            .map(|e| e.value.clone())
            .collect())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), HistoryError> {
        let mut maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        maps.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, HistoryError> {
        let maps = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let mut out: Vec<String> = maps
            .kv
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .chain(
                maps.lists
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned(),
            )
            .collect();
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_front_orders_newest_first() {
        let store = InMemoryHistory::new();
        store.list_push_front("history:0xab", "first".into()).await.unwrap();
        store.list_push_front("history:0xab", "second".into()).await.unwrap();

        let range = store.list_range("history:0xab", 0, 10).await.unwrap();
        assert_eq!(range, vec!["second".to_string(), "first".to_string()]);
    }

    #[tokio::test]
    async fn trim_caps_the_list() {
        let store = InMemoryHistory::new();
        for i in 0..10 {
            store
                .list_push_front("k", format!("r{i}"))
                .await
                .unwrap();
        }
        store.list_trim("k", 0, 2).await.unwrap();

        let range = store.list_range("k", 0, 99).await.unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[0], "r9");
    }

    #[tokio::test]
    async fn missing_key_yields_empty_range() {
        let store = InMemoryHistory::new();
        assert!(store.list_range("absent", 0, 99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_matches_prefix() {
        let store = InMemoryHistory::new();
        store
            .set_with_ttl("scan:0xab:1", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();
        store.list_push_front("history:0xab", "{}".into()).await.unwrap();

        let keys = store.keys("scan:").await.unwrap();
        assert_eq!(keys, vec!["scan:0xab:1".to_string()]);
    }

    #[test]
    fn key_formats_are_lowercase_hex() {
        let addr = Address::repeat_byte(0xAB);
        let key = history_key(&addr);
        assert!(key.starts_with("history:0xab"));
        assert_eq!(key, key.to_lowercase());
    }
}
