//! Observability infrastructure for image resolution
//!
//! Provides:
//! - Prometheus metrics (resolutions by method, tier failures, latency, copies, cache state)
//! - Structured JSON logging with tracing

use crate::cache::CacheStats;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for resolution latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ResolverMetricsInner> = OnceLock::new();

struct ResolverMetricsInner {
    resolutions: IntCounterVec,
    tier_failures: IntCounterVec,
    resolution_latency_seconds: Histogram,
    cross_region_copies: IntCounterVec,
    strategy_violations: IntCounter,
    provider_timeouts: IntCounter,
    discovery_fallbacks: IntCounter,
    cache_entries: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
}

impl ResolverMetricsInner {
    fn new() -> Self {
        Self {
            resolutions: register_int_counter_vec!(
                "image_resolver_resolutions_total",
                "Completed resolutions by resolution method",
                &["method"]
            )
            .expect("Failed to register resolutions_total"),

            tier_failures: register_int_counter_vec!(
                "image_resolver_tier_failures_total",
                "Tier attempts that produced no image",
                &["tier"]
            )
            .expect("Failed to register tier_failures_total"),

            resolution_latency_seconds: register_histogram!(
                "image_resolver_resolution_latency_seconds",
                "Time spent resolving a template in a region",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register resolution_latency_seconds"),

            cross_region_copies: register_int_counter_vec!(
                "image_resolver_cross_region_copies_total",
                "Cross-region image copies by outcome",
                &["outcome"]
            )
            .expect("Failed to register cross_region_copies_total"),

            strategy_violations: register_int_counter!(
                "image_resolver_strategy_violations_total",
                "Resolutions that failed because the strategy required an image"
            )
            .expect("Failed to register strategy_violations_total"),

            provider_timeouts: register_int_counter!(
                "image_resolver_provider_timeouts_total",
                "Provider calls abandoned because of a timeout or deadline"
            )
            .expect("Failed to register provider_timeouts_total"),

            discovery_fallbacks: register_int_counter!(
                "image_resolver_discovery_fallbacks_total",
                "Discovery lookups answered from a static fallback"
            )
            .expect("Failed to register discovery_fallbacks_total"),

            cache_entries: register_int_gauge!(
                "image_resolver_cache_entries",
                "Number of images currently cached"
            )
            .expect("Failed to register cache_entries"),

            cache_hits: register_int_gauge!(
                "image_resolver_cache_hits",
                "Cache hits since the last clear"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_gauge!(
                "image_resolver_cache_misses",
                "Cache misses since the last clear"
            )
            .expect("Failed to register cache_misses"),
        }
    }
}

/// Resolver metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ResolverMetrics {
    _private: (),
}

impl Default for ResolverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ResolverMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ResolverMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_resolution(&self, method: &str) {
        self.inner().resolutions.with_label_values(&[method]).inc();
    }

    pub fn inc_tier_failure(&self, tier: &str) {
        self.inner().tier_failures.with_label_values(&[tier]).inc();
    }

    pub fn observe_resolution_latency(&self, duration_secs: f64) {
        self.inner().resolution_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cross_region_copy(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .cross_region_copies
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_strategy_violation(&self) {
        self.inner().strategy_violations.inc();
    }

    pub fn inc_provider_timeout(&self) {
        self.inner().provider_timeouts.inc();
    }

    pub fn inc_discovery_fallback(&self) {
        self.inner().discovery_fallbacks.inc();
    }

    /// Mirror cache statistics into gauges
    pub fn set_cache_stats(&self, stats: &CacheStats) {
        self.inner().cache_entries.set(stats.size as i64);
        self.inner().cache_hits.set(stats.hits as i64);
        self.inner().cache_misses.set(stats.misses as i64);
    }
}

/// Structured logger for resolution events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a successful image resolution
    pub fn log_image_resolved(
        &self,
        template: &str,
        region: &str,
        method: &str,
        image_id: &str,
        fallback_chain: &[String],
        duration_ms: u64,
    ) {
        info!(
            event = "image_resolved",
            instance = %self.instance,
            template = %template,
            region = %region,
            method = %method,
            image_id = %image_id,
            fallback_chain = %fallback_chain.join(","),
            duration_ms = duration_ms,
            "Resolved template image"
        );
    }

    /// Log a resolution that ended in script provisioning
    pub fn log_script_fallback(&self, template: &str, region: &str, reason: &str) {
        info!(
            event = "script_fallback",
            instance = %self.instance,
            template = %template,
            region = %region,
            reason = %reason,
            "Using script provisioning"
        );
    }

    /// Log a tier that produced no image
    pub fn log_tier_failed(&self, template: &str, region: &str, tier: &str, reason: &str) {
        info!(
            event = "tier_failed",
            instance = %self.instance,
            template = %template,
            region = %region,
            tier = %tier,
            reason = %reason,
            "Resolution tier failed"
        );
    }

    /// Log a completed cross-region copy
    pub fn log_image_copied(
        &self,
        source_image: &str,
        image_id: &str,
        source_region: &str,
        target_region: &str,
        estimated_cost: f64,
    ) {
        info!(
            event = "image_copied",
            instance = %self.instance,
            source_image = %source_image,
            image_id = %image_id,
            source_region = %source_region,
            target_region = %target_region,
            estimated_cost = estimated_cost,
            "Copied image across regions"
        );
    }

    /// Log a strategy violation surfaced to the caller
    pub fn log_strategy_violation(&self, template: &str, region: &str, fallback_chain: &[String]) {
        warn!(
            event = "strategy_violation",
            instance = %self.instance,
            template = %template,
            region = %region,
            fallback_chain = %fallback_chain.join(","),
            "No image available and strategy forbids script provisioning"
        );
    }

    /// Log daemon startup
    pub fn log_startup(&self, version: &str, region: &str, templates: usize) {
        info!(
            event = "resolver_started",
            instance = %self.instance,
            version = %version,
            region = %region,
            templates = templates,
            "Image resolver started"
        );
    }

    /// Log daemon shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "resolver_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Image resolver shutting down"
        );
    }
}
