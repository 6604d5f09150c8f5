//! Resolver health
//!
//! Each daemon component (template catalog, image provider, cache,
//! discovery) keeps a status. `/healthz` reports the worst of them and
//! `/readyz` additionally requires that startup has finished. The cache and
//! catalog are judged from their own numbers rather than set by hand.

use crate::cache::CacheStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Hit ratio below which a well-used cache is reported degraded
const LOW_HIT_RATIO: f64 = 0.1;
/// Lookups needed before the hit ratio is meaningful
const MIN_LOOKUPS_FOR_RATIO: u64 = 100;

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, e.g. every resolution falls back to scripts
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// A cache that keeps missing, or is pinned at capacity, is degraded
    pub fn from_cache_stats(stats: &CacheStats) -> Self {
        let lookups = stats.hits + stats.misses;
        if lookups >= MIN_LOOKUPS_FOR_RATIO && stats.hit_ratio < LOW_HIT_RATIO {
            return Self::degraded(format!(
                "cache hit ratio {:.2} over {} lookups",
                stats.hit_ratio, lookups
            ));
        }
        if stats.max_size > 0 && stats.size >= stats.max_size {
            return Self::degraded(format!("cache full at {} entries", stats.size));
        }
        Self::healthy()
    }

    /// An empty catalog can only answer "unknown template"
    pub fn from_catalog_size(templates: usize) -> Self {
        if templates == 0 {
            Self::degraded("no workload templates loaded")
        } else {
            Self::healthy()
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    pub fn summarize(components: BTreeMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    /// `name: message` for every unhealthy component
    fn unhealthy_reasons(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|(_, health)| health.status == ComponentStatus::Unhealthy)
            .map(|(name, health)| match &health.message {
                Some(message) => format!("{}: {}", name, message),
                None => name.clone(),
            })
            .collect()
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const CATALOG: &str = "template_catalog";
    pub const PROVIDER: &str = "image_provider";
    pub const CACHE: &str = "image_cache";
    pub const DISCOVERY: &str = "discovery";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    started: bool,
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `name`, starting healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn record_cache_stats(&self, stats: &CacheStats) {
        self.update(components::CACHE, ComponentHealth::from_cache_stats(stats))
            .await;
    }

    pub async fn record_catalog_size(&self, templates: usize) {
        self.update(components::CATALOG, ComponentHealth::from_catalog_size(templates))
            .await;
    }

    /// Mark startup finished (or shutdown begun)
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse::summarize(components)
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let started = self.state.read().await.started;
        if !started {
            return ReadinessResponse {
                ready: false,
                reason: Some("resolver still starting".to_string()),
            };
        }

        let reasons = self.health().await.unhealthy_reasons();
        if reasons.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(reasons.join("; ")),
            }
        }
    }
}
