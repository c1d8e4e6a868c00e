//! Audio artifact cache
//!
//! Process-wide store for synthesized audio, keyed by opaque id. Entries
//! expire after a TTL and the total size is held under a soft bound by
//! LRU eviction. A background reaper enforces both on an interval; on
//! session close the session's entries are dropped eagerly.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
// tokio's Instant so the TTL tests can drive a paused clock.
use tokio::time::Instant;

use voiceline_config::CacheSettings;
use voiceline_pipeline::ArtifactStore;

struct CacheEntry {
    bytes: Vec<u8>,
    content_type: String,
    session_id: String,
    created: Instant,
    last_access: Instant,
}

/// In-memory artifact cache with TTL and LRU bounds.
pub struct AudioCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_bytes: u64,
}

impl AudioCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(settings.ttl_secs),
            max_bytes: settings.max_bytes,
        }
    }

    /// Store an artifact; returns its opaque id.
    pub fn insert(&self, session_id: &str, bytes: Vec<u8>, content_type: String) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.insert(
            id.clone(),
            CacheEntry {
                bytes,
                content_type,
                session_id: session_id.to_string(),
                created: now,
                last_access: now,
            },
        );
        Self::evict_over_budget(&mut entries, self.max_bytes);
        id
    }

    /// Fetch an artifact; expired entries are dropped on access.
    pub fn get(&self, id: &str) -> Option<(Vec<u8>, String)> {
        let mut entries = self.entries.write();
        let expired = entries
            .get(id)
            .map(|e| e.created.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            entries.remove(id);
            return None;
        }
        entries.get_mut(id).map(|entry| {
            entry.last_access = Instant::now();
            (entry.bytes.clone(), entry.content_type.clone())
        })
    }

    /// Drop every artifact created by a session.
    pub fn drop_session(&self, session_id: &str) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.session_id != session_id);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(session_id, dropped, "dropped session artifacts");
        }
    }

    /// Evict expired entries, then LRU-evict down to the size budget.
    pub fn reap(&self) {
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.created.elapsed() <= ttl);
        Self::evict_over_budget(&mut entries, self.max_bytes);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "cache reaped");
        }
    }

    fn evict_over_budget(entries: &mut HashMap<String, CacheEntry>, max_bytes: u64) {
        let mut total: u64 = entries.values().map(|e| e.bytes.len() as u64).sum();
        while total > max_bytes {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(removed) = entries.remove(&oldest) {
                total -= removed.bytes.len() as u64;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.read().values().map(|e| e.bytes.len() as u64).sum()
    }

    /// Start the background reaper. Returns a shutdown sender.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => cache.reap(),
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("cache reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

impl ArtifactStore for AudioCache {
    fn put(&self, session_id: &str, bytes: Vec<u8>, content_type: String) -> String {
        self.insert(session_id, bytes, content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ttl_secs: u64, max_bytes: u64) -> CacheSettings {
        CacheSettings {
            ttl_secs,
            max_bytes,
            reap_interval_secs: 60,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = AudioCache::new(&settings(300, 1024 * 1024));
        let id = cache.insert("s1", vec![1, 2, 3], "audio/mpeg".to_string());

        let (bytes, content_type) = cache.get(&id).expect("artifact present");
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type, "audio/mpeg");
    }

    #[test]
    fn missing_id_is_none() {
        let cache = AudioCache::new(&settings(300, 1024));
        assert!(cache.get("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_gone_after_ttl() {
        let cache = AudioCache::new(&settings(1, 1024 * 1024));
        let id = cache.insert("s1", vec![0u8; 16], "audio/mpeg".to_string());

        assert!(cache.get(&id).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;

        // Expiry applies on access even before the reaper runs.
        assert!(cache.get(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_expired_entries() {
        let cache = AudioCache::new(&settings(1, 1024 * 1024));
        cache.insert("s1", vec![0u8; 16], "audio/mpeg".to_string());
        cache.insert("s1", vec![0u8; 16], "audio/mpeg".to_string());

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.reap();
        assert!(cache.is_empty());
    }

    #[test]
    fn size_budget_evicts_least_recently_used() {
        let cache = AudioCache::new(&settings(300, 100));
        let first = cache.insert("s1", vec![0u8; 60], "audio/mpeg".to_string());
        let second = cache.insert("s1", vec![0u8; 60], "audio/mpeg".to_string());

        // 120 bytes > 100: the older entry was evicted on insert.
        assert!(cache.get(&first).is_none());
        assert!(cache.get(&second).is_some());
        assert!(cache.total_bytes() <= 100);
    }

    #[test]
    fn session_close_drops_only_that_session() {
        let cache = AudioCache::new(&settings(300, 1024 * 1024));
        let mine = cache.insert("s1", vec![1], "audio/mpeg".to_string());
        let other = cache.insert("s2", vec![2], "audio/mpeg".to_string());

        cache.drop_session("s1");
        assert!(cache.get(&mine).is_none());
        assert!(cache.get(&other).is_some());
    }
}
