//! In-memory providers backed by a static inventory
//!
//! Used by the daemon when no cloud account is configured and by tests,
//! which can also inject failures, latency and slow copies.

use super::{async_trait, CloudImageProvider, MarketplaceCriteria, ParameterStore, SearchCriteria};
use crate::error::ProviderError;
use crate::models::{ImageInfo, ImageState};
use anyhow::{Context, Result};
use chrono::{NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// First id handed out to copied images
const COPY_ID_SEED: u64 = 0x0c0_0000_0000_0000;

/// A marketplace product version and the image behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceListing {
    pub product_code: String,
    pub version: String,
    #[serde(default)]
    pub publisher: String,
    pub image: ImageInfo,
}

/// Static inventory file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub images: Vec<ImageInfo>,
    #[serde(default)]
    pub marketplace: Vec<MarketplaceListing>,
    /// region -> parameter path -> value
    #[serde(default)]
    pub parameters: HashMap<String, HashMap<String, String>>,
}

impl Inventory {
    /// Load a JSON inventory file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse inventory {}", path.display()))
    }
}

type ImageKey = (String, String);

fn key(region: &str, image_id: &str) -> ImageKey {
    (region.to_string(), image_id.to_string())
}

/// Image provider over an in-memory inventory
pub struct InMemoryImageProvider {
    images: DashMap<ImageKey, ImageInfo>,
    marketplace: DashMap<String, Vec<MarketplaceListing>>,
    /// Describe calls remaining before a copied image becomes available
    pending_polls: DashMap<ImageKey, u32>,
    copy_pending_polls: AtomicU32,
    failing_regions: DashMap<String, ProviderError>,
    failing_copy_sources: DashMap<String, ProviderError>,
    latency_ms: AtomicU64,
    next_copy_id: AtomicU64,
    describe_calls: AtomicUsize,
    search_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    searches: Mutex<Vec<SearchCriteria>>,
}

impl Default for InMemoryImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryImageProvider {
    pub fn new() -> Self {
        Self {
            images: DashMap::new(),
            marketplace: DashMap::new(),
            pending_polls: DashMap::new(),
            copy_pending_polls: AtomicU32::new(0),
            failing_regions: DashMap::new(),
            failing_copy_sources: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            next_copy_id: AtomicU64::new(COPY_ID_SEED),
            describe_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn from_inventory(inventory: &Inventory) -> Self {
        let provider = Self::new();
        for image in &inventory.images {
            provider.insert_image(image.clone());
        }
        for listing in &inventory.marketplace {
            provider.insert_listing(listing.clone());
        }
        provider
    }

    /// Add or replace an image in its region
    pub fn insert_image(&self, image: ImageInfo) {
        self.images
            .insert(key(&image.region, &image.image_id), image);
    }

    pub fn insert_listing(&self, listing: MarketplaceListing) {
        self.marketplace
            .entry(listing.image.region.clone())
            .or_default()
            .push(listing);
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Fail every call touching `region`
    pub fn fail_region(&self, region: &str, error: ProviderError) {
        self.failing_regions.insert(region.to_string(), error);
    }

    /// Fail copies out of `region`
    pub fn fail_copies_from(&self, region: &str, error: ProviderError) {
        self.failing_copy_sources.insert(region.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.failing_regions.clear();
        self.failing_copy_sources.clear();
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of describe calls a copied image stays pending for
    pub fn set_copy_pending_polls(&self, polls: u32) {
        self.copy_pending_polls.store(polls, Ordering::Relaxed);
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::Relaxed)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::Relaxed)
    }

    /// Every search issued so far, in order
    pub async fn recorded_searches(&self) -> Vec<SearchCriteria> {
        self.searches.lock().await.clone()
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_region(&self, region: &str) -> Result<(), ProviderError> {
        match self.failing_regions.get(region) {
            Some(error) => Err(error.value().clone()),
            None => Ok(()),
        }
    }

    fn matches(&self, image: &ImageInfo, criteria: &SearchCriteria, pattern: Option<&glob::Pattern>) -> bool {
        if image.region != criteria.region || !image.state.is_usable() {
            return false;
        }
        if !criteria.owner.is_empty() && image.owner != criteria.owner {
            return false;
        }
        if let Some(pattern) = pattern {
            if !pattern.matches(&image.name) {
                return false;
            }
        }
        if !criteria.architectures.is_empty() && !criteria.architectures.contains(&image.architecture) {
            return false;
        }
        if !criteria
            .required_tags
            .iter()
            .all(|(k, v)| image.tags.get(k) == Some(v))
        {
            return false;
        }
        if let Some(min_date) = criteria.min_creation_date {
            let min = Utc.from_utc_datetime(&min_date.and_time(NaiveTime::MIN));
            match image.creation_date {
                Some(created) if created >= min => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
impl CloudImageProvider for InMemoryImageProvider {
    async fn describe_image(&self, image_id: &str, region: &str) -> Result<ImageInfo, ProviderError> {
        self.simulate_latency().await;
        self.describe_calls.fetch_add(1, Ordering::Relaxed);
        self.check_region(region)?;

        let image_key = key(region, image_id);
        let remaining = self.pending_polls.get_mut(&image_key).map(|mut polls| {
            let current = *polls;
            *polls = current.saturating_sub(1);
            current
        });
        if remaining == Some(0) {
            self.pending_polls.remove(&image_key);
            if let Some(mut image) = self.images.get_mut(&image_key) {
                image.state = ImageState::Available;
            }
        }

        self.images
            .get(&image_key)
            .map(|image| image.value().clone())
            .ok_or_else(|| ProviderError::NotFound(format!("{} in {}", image_id, region)))
    }

    async fn search_images(&self, criteria: &SearchCriteria) -> Result<Option<ImageInfo>, ProviderError> {
        self.simulate_latency().await;
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        self.searches.lock().await.push(criteria.clone());
        self.check_region(&criteria.region)?;

        let pattern = if criteria.name_pattern.is_empty() {
            None
        } else {
            Some(glob::Pattern::new(&criteria.name_pattern).map_err(|e| {
                ProviderError::Transport(format!(
                    "invalid name pattern '{}': {}",
                    criteria.name_pattern, e
                ))
            })?)
        };

        let newest = self
            .images
            .iter()
            .filter(|entry| self.matches(entry.value(), criteria, pattern.as_ref()))
            .map(|entry| entry.value().clone())
            .max_by(|a, b| {
                a.creation_date
                    .cmp(&b.creation_date)
                    .then_with(|| a.image_id.cmp(&b.image_id))
            });

        Ok(newest)
    }

    async fn search_marketplace(
        &self,
        criteria: &MarketplaceCriteria,
    ) -> Result<Option<ImageInfo>, ProviderError> {
        self.simulate_latency().await;
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        self.check_region(&criteria.region)?;

        let Some(listings) = self.marketplace.get(&criteria.region) else {
            return Ok(None);
        };

        let best = listings
            .iter()
            .filter(|l| l.product_code == criteria.product_code)
            .filter(|l| l.image.architecture == criteria.architecture)
            .filter(|l| l.image.state.is_usable())
            .filter(|l| match &criteria.publisher {
                Some(publisher) => &l.publisher == publisher,
                None => true,
            })
            .filter(|l| match &criteria.version_constraint {
                Some(constraint) => version_satisfies(constraint, &l.version),
                None => true,
            })
            .max_by_key(|l| parse_version(&l.version).unwrap_or_default())
            .map(|l| l.image.clone());

        Ok(best)
    }

    async fn copy_image(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
    ) -> Result<ImageInfo, ProviderError> {
        self.simulate_latency().await;
        self.copy_calls.fetch_add(1, Ordering::Relaxed);
        self.check_region(source_region)?;
        self.check_region(target_region)?;
        if let Some(error) = self.failing_copy_sources.get(source_region) {
            return Err(error.value().clone());
        }

        let source = self
            .images
            .get(&key(source_region, image_id))
            .map(|image| image.value().clone())
            .ok_or_else(|| {
                ProviderError::CopyFailed(format!("{} not found in {}", image_id, source_region))
            })?;

        let polls = self.copy_pending_polls.load(Ordering::Relaxed);
        let new_id = format!("ami-{:017x}", self.next_copy_id.fetch_add(1, Ordering::Relaxed));

        let mut copy = source;
        copy.image_id = new_id.clone();
        copy.region = target_region.to_string();
        copy.source_region = Some(source_region.to_string());
        copy.creation_date = Some(Utc::now());
        copy.state = if polls > 0 {
            ImageState::Pending
        } else {
            ImageState::Available
        };

        if polls > 0 {
            self.pending_polls.insert(key(target_region, &new_id), polls);
        }
        self.insert_image(copy.clone());

        debug!(
            source_image = %image_id,
            image_id = %new_id,
            source_region = %source_region,
            target_region = %target_region,
            "Copied image"
        );
        Ok(copy)
    }
}

/// Parameter store over an in-memory map
#[derive(Default)]
pub struct InMemoryParameterStore {
    parameters: DashMap<ImageKey, String>,
    failing_regions: DashMap<String, ProviderError>,
    calls: AtomicUsize,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: &Inventory) -> Self {
        let store = Self::new();
        for (region, params) in &inventory.parameters {
            for (path, value) in params {
                store.set(region, path, value);
            }
        }
        store
    }

    pub fn set(&self, region: &str, path: &str, value: &str) {
        self.parameters.insert(key(region, path), value.to_string());
    }

    pub fn fail_region(&self, region: &str, error: ProviderError) {
        self.failing_regions.insert(region.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn get_parameter(&self, region: &str, path: &str) -> Result<Option<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.failing_regions.get(region) {
            return Err(error.value().clone());
        }
        Ok(self
            .parameters
            .get(&key(region, path))
            .map(|v| v.value().clone()))
    }
}

/// Check `version` against a constraint such as `>=2.0.0`
pub fn version_satisfies(constraint: &str, version: &str) -> bool {
    let constraint = constraint.trim();
    let (op, wanted) = ["<=", ">=", "<", ">", "="]
        .iter()
        .find_map(|op| constraint.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("=", constraint));

    let (Some(wanted), Some(actual)) = (parse_version(wanted), parse_version(version)) else {
        return false;
    };

    match op {
        ">=" => actual >= wanted,
        ">" => actual > wanted,
        "<=" => actual <= wanted,
        "<" => actual < wanted,
        _ => actual == wanted,
    }
}

fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
