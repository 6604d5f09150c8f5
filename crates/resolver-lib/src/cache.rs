//! In-memory image metadata cache
//!
//! Entries are keyed by (image id, region) and expire after a TTL that is
//! checked lazily on read, with an optional periodic sweep. Capacity is
//! enforced on every write by evicting the least recently read entries.
//! Values are copied on the way in and on the way out so no caller ever
//! shares state with the cache.

use crate::models::ImageInfo;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default time-to-live for cached entries (30 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum number of cached images
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied by `put`
    pub default_ttl: Duration,
    /// Maximum number of entries, 0 for unbounded
    pub max_size: usize,
    /// Interval of the background sweep, if one should run
    pub cleanup_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
            cleanup_interval: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    image_id: String,
    region: String,
}

impl CacheKey {
    fn new(image_id: &str, region: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            region: region.to_string(),
        }
    }
}

/// Cached image plus access metadata
#[derive(Debug, Clone)]
pub struct CachedImageInfo {
    image: ImageInfo,
    cached_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_access: Instant,
    /// Logical access clock; orders eviction even when `Instant`s collide
    access_seq: u64,
}

impl CachedImageInfo {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) > self.ttl
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// 0.0 to 1.0
    pub hit_ratio: f64,
    pub ttl_secs: u64,
}

/// Concurrent image cache
pub struct ImageCache {
    entries: DashMap<CacheKey, CachedImageInfo>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    access_clock: AtomicU64,
    /// Serializes eviction passes so concurrent writers don't over-evict
    eviction: Mutex<()>,
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache {
    /// Create a cache with the default 30 minute TTL and 1000 entry limit
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            eviction: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up an image; expired entries are removed and count as misses
    pub fn get(&self, image_id: &str, region: &str) -> Option<ImageInfo> {
        let key = CacheKey::new(image_id, region);
        let now = Instant::now();

        if let Some(mut entry) = self.entries.get_mut(&key) {
            if !entry.is_expired(now) {
                entry.access_count += 1;
                entry.last_access = now;
                entry.access_seq = self.tick();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.image.deep_copy());
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Expired: the shard guard is released above before removing
        self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(image_id = %image_id, region = %region, "Cache entry expired");
        None
    }

    /// Store an image with the default TTL
    pub fn put(&self, image_id: &str, region: &str, image: &ImageInfo) {
        self.put_with_ttl(image_id, region, image, self.config.default_ttl);
    }

    /// Store an image with a custom TTL
    pub fn put_with_ttl(&self, image_id: &str, region: &str, image: &ImageInfo, ttl: Duration) {
        let now = Instant::now();
        let cached = CachedImageInfo {
            image: image.deep_copy(),
            cached_at: now,
            ttl,
            access_count: 0,
            last_access: now,
            access_seq: self.tick(),
        };

        self.entries.insert(CacheKey::new(image_id, region), cached);
        self.enforce_max_size();
    }

    /// Remove a single entry
    pub fn invalidate(&self, image_id: &str, region: &str) {
        self.entries.remove(&CacheKey::new(image_id, region));
    }

    /// Remove every entry cached for `region`
    pub fn invalidate_region(&self, region: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.region != region);
        let removed = before.saturating_sub(self.entries.len());
        debug!(region = %region, removed = removed, "Invalidated cached region");
        removed
    }

    /// Remove all entries and reset statistics
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Access metadata for an entry, without touching statistics
    pub fn entry_metadata(&self, image_id: &str, region: &str) -> Option<CachedImageInfo> {
        self.entries
            .get(&CacheKey::new(image_id, region))
            .map(|entry| entry.value().clone())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            size: self.entries.len(),
            max_size: self.config.max_size,
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            ttl_secs: self.config.default_ttl.as_secs(),
        }
    }

    fn enforce_max_size(&self) {
        let max_size = self.config.max_size;
        if max_size == 0 || self.entries.len() <= max_size {
            return;
        }

        let _guard = self.eviction.lock().unwrap_or_else(|e| e.into_inner());

        let mut by_access: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().access_seq))
            .collect();

        let excess = by_access.len().saturating_sub(max_size);
        if excess == 0 {
            return;
        }

        by_access.sort_unstable_by_key(|(_, seq)| *seq);
        for (key, seq) in by_access.into_iter().take(excess) {
            self.evict_if_unchanged(&key, seq);
        }
    }

    /// Remove `key` only if it was not read or rewritten since `seq` was taken
    fn evict_if_unchanged(&self, key: &CacheKey, seq: u64) -> bool {
        let evicted = self
            .entries
            .remove_if(key, |_, entry| entry.access_seq == seq)
            .is_some();
        if evicted {
            debug!(image_id = %key.image_id, region = %key.region, "Evicting least recently used image");
        }
        evicted
    }

    /// Start a background sweep of expired entries.
    ///
    /// The task holds only a weak reference, so it also ends once the cache
    /// itself is dropped.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let cache: Weak<ImageCache> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            info!(event = "cache_swept", removed = removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("Cache sweep stopped");
        });

        CleanupHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to the background sweep; dropping it stops the sweep
pub struct CleanupHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Stop the sweep and wait for the task to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Architecture, CommunityInfo, ImageReview};
    use chrono::Utc;

    fn create_test_image(id: &str, region: &str) -> ImageInfo {
        let mut image = ImageInfo::new(id, region, Architecture::X86_64);
        image.name = format!("image-{}", id);
        image.tags.insert("Version".to_string(), "1.0".to_string());
        image.community_info = Some(CommunityInfo {
            creator: "lab".to_string(),
            version: "1.0".to_string(),
            rating: 4.5,
            review_count: 1,
            download_count: 10,
            verified: true,
            last_updated: Utc::now(),
            reviews: vec![ImageReview {
                user_id: "u1".to_string(),
                rating: 5,
                review: "works".to_string(),
                helpful: 2,
                created_at: Utc::now(),
            }],
        });
        image
    }

    #[test]
    fn test_refreshed_entry_survives_stale_eviction() {
        let cache = small_cache(10);
        cache.put("ami-1", "us-east-1", &create_test_image("ami-1", "us-east-1"));

        let key = CacheKey::new("ami-1", "us-east-1");
        let seq = cache.entries.get(&key).unwrap().access_seq;

        assert!(cache.get("ami-1", "us-east-1").is_some());
        assert!(!cache.evict_if_unchanged(&key, seq));
        assert_eq!(cache.len(), 1);

        let seq = cache.entries.get(&key).unwrap().access_seq;
        assert!(cache.evict_if_unchanged(&key, seq));
        assert!(cache.is_empty());
    }

    fn small_cache(max_size: usize) -> ImageCache {
        ImageCache::with_config(CacheConfig {
            max_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_put_then_get_returns_equal_copy() {
        let cache = ImageCache::new();
        let image = create_test_image("ami-11111111", "us-east-1");

        cache.put("ami-11111111", "us-east-1", &image);
        let cached = cache.get("ami-11111111", "us-east-1").unwrap();

        assert_eq!(cached, image);
    }

    #[test]
    fn test_mutating_returned_copy_does_not_affect_cache() {
        let cache = ImageCache::new();
        cache.put("ami-11111111", "us-east-1", &create_test_image("ami-11111111", "us-east-1"));

        let mut first = cache.get("ami-11111111", "us-east-1").unwrap();
        first.tags.insert("Version".to_string(), "tampered".to_string());
        let community = first.community_info.as_mut().unwrap();
        let extra = community.reviews[0].clone();
        community.reviews.push(extra);

        let second = cache.get("ami-11111111", "us-east-1").unwrap();
        assert_eq!(second.tags["Version"], "1.0");
        assert_eq!(second.community_info.unwrap().reviews.len(), 1);
    }

    #[test]
    fn test_mutating_input_after_put_does_not_affect_cache() {
        let cache = ImageCache::new();
        let mut image = create_test_image("ami-11111111", "us-east-1");
        cache.put("ami-11111111", "us-east-1", &image);

        image.tags.clear();
        image.name = "changed".to_string();

        let cached = cache.get("ami-11111111", "us-east-1").unwrap();
        assert_eq!(cached.name, "image-ami-11111111");
        assert_eq!(cached.tags.len(), 1);
    }

    #[test]
    fn test_key_is_per_region() {
        let cache = ImageCache::new();
        cache.put("ami-11111111", "us-east-1", &create_test_image("ami-11111111", "us-east-1"));

        assert!(cache.get("ami-11111111", "us-west-2").is_none());
        assert!(cache.get("ami-11111111", "us-east-1").is_some());
    }

    #[test]
    fn test_expired_entry_is_removed_and_counted_as_miss() {
        let cache = ImageCache::new();
        let image = create_test_image("ami-11111111", "us-east-1");
        cache.put_with_ttl("ami-11111111", "us-east-1", &image, Duration::from_millis(5));

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("ami-11111111", "us-east-1").is_none());
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = small_cache(3);
        for i in 0..10 {
            let id = format!("ami-{:08x}", i);
            cache.put(&id, "us-east-1", &create_test_image(&id, "us-east-1"));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_eviction_removes_least_recently_read() {
        let cache = small_cache(3);
        for id in ["ami-aaaaaaaa", "ami-bbbbbbbb", "ami-cccccccc"] {
            cache.put(id, "us-east-1", &create_test_image(id, "us-east-1"));
        }

        // Reading the oldest entry makes ami-bbbbbbbb the eviction candidate
        assert!(cache.get("ami-aaaaaaaa", "us-east-1").is_some());

        cache.put("ami-dddddddd", "us-east-1", &create_test_image("ami-dddddddd", "us-east-1"));

        assert!(cache.entry_metadata("ami-bbbbbbbb", "us-east-1").is_none());
        assert!(cache.entry_metadata("ami-aaaaaaaa", "us-east-1").is_some());
        assert!(cache.entry_metadata("ami-cccccccc", "us-east-1").is_some());
        assert!(cache.entry_metadata("ami-dddddddd", "us-east-1").is_some());
    }

    #[test]
    fn test_overwrite_resets_access_metadata() {
        let cache = ImageCache::new();
        let image = create_test_image("ami-11111111", "us-east-1");
        cache.put("ami-11111111", "us-east-1", &image);
        cache.get("ami-11111111", "us-east-1");
        cache.get("ami-11111111", "us-east-1");
        assert_eq!(cache.entry_metadata("ami-11111111", "us-east-1").unwrap().access_count(), 2);

        cache.put("ami-11111111", "us-east-1", &image);
        assert_eq!(cache.entry_metadata("ami-11111111", "us-east-1").unwrap().access_count(), 0);
    }

    #[test]
    fn test_unbounded_cache() {
        let cache = small_cache(0);
        for i in 0..50 {
            let id = format!("ami-{:08x}", i);
            cache.put(&id, "us-east-1", &create_test_image(&id, "us-east-1"));
        }
        assert_eq!(cache.len(), 50);
    }

    #[test]
    fn test_invalidate_region() {
        let cache = ImageCache::new();
        cache.put("ami-11111111", "us-east-1", &create_test_image("ami-11111111", "us-east-1"));
        cache.put("ami-22222222", "us-east-1", &create_test_image("ami-22222222", "us-east-1"));
        cache.put("ami-11111111", "eu-east-1", &create_test_image("ami-11111111", "eu-east-1"));

        // A region that is a suffix of another must not match it
        assert_eq!(cache.invalidate_region("east-1"), 0);
        assert_eq!(cache.invalidate_region("us-east-1"), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_single_entry() {
        let cache = ImageCache::new();
        cache.put("ami-11111111", "us-east-1", &create_test_image("ami-11111111", "us-east-1"));
        cache.invalidate("ami-11111111", "us-east-1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = ImageCache::new();
        cache.put("ami-11111111", "us-east-1", &create_test_image("ami-11111111", "us-east-1"));

        cache.get("ami-11111111", "us-east-1");
        cache.get("ami-11111111", "us-east-1");
        cache.get("ami-99999999", "us-east-1");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.ttl_secs, 30 * 60);
        assert_eq!(stats.max_size, DEFAULT_MAX_SIZE);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_ratio, 0.0);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = ImageCache::new();
        let image = create_test_image("ami-11111111", "us-east-1");
        cache.put_with_ttl("ami-11111111", "us-east-1", &image, Duration::from_millis(1));
        cache.put("ami-22222222", "us-east-1", &image);

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        // Sweeping does not count as a miss
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_background_sweep_start_stop() {
        let cache = Arc::new(ImageCache::new());
        let image = create_test_image("ami-11111111", "us-east-1");
        cache.put_with_ttl("ami-11111111", "us-east-1", &image, Duration::from_millis(1));

        let handle = cache.start_cleanup(Duration::from_millis(10));
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        handle.stop().await;
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(small_cache(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let id = format!("ami-{:04x}{:04x}", t, i % 32);
                        cache.put(&id, "us-east-1", &create_test_image(&id, "us-east-1"));
                        cache.get(&id, "us-east-1");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }
}
