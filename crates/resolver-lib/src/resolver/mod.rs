//! Tiered image resolution
//!
//! Turns a workload template and a target region into either a concrete
//! machine image or a decision to provision by script. Tiers are tried in
//! order and every attempt is recorded in the fallback chain:
//! - direct mapping from the template's tables
//! - dynamic search by owner, name pattern and tags
//! - marketplace search by product code
//! - cross-region search in neighbour regions followed by a copy

mod copy;
mod tiers;

#[cfg(test)]
mod tests;

pub use copy::CopyPolicy;
pub use tiers::{LocalTier, Tier};

use crate::cache::{CacheStats, ImageCache};
use crate::cost::CostEstimator;
use crate::error::ResolverError;
use crate::models::{
    AvailabilityReport, AvailabilityStatus, CostAnalysis, RegionAvailability, ResolutionMethod,
    ResolutionResult,
};
use crate::observability::{ResolverMetrics, StructuredLogger};
use crate::provider::CloudImageProvider;
use crate::region::RegionFallbackMap;
use crate::template::{ResolutionStrategy, TemplateCatalog, TemplateValidator, WorkloadTemplate};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tiers::{Attempt, Found, Mode};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Warning attached when a template has no image configuration
pub const NO_IMAGE_CONFIG_WARNING: &str = "No image configuration found, using script provisioning";
/// Warning attached when a preferred image could not be found
pub const IMAGE_UNAVAILABLE_WARNING: &str = "Image not available, using script provisioning";
/// Warning attached when the fallback strategy had to use an image
pub const SCRIPT_UNAVAILABLE_WARNING: &str = "Script provisioning not available, using image";

/// Deadline used when neither the template nor the default budget fits in an `Instant`
const MAX_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_AVAILABILITY_REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "ap-south-1"];

/// Configuration for the resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Bound on any single provider call (default: 30 seconds)
    pub provider_timeout: Duration,
    /// Resolution deadline when the template sets no fallback timeout (default: 10 minutes)
    pub default_deadline: Duration,
    /// Cross-region copy completion polling
    pub copy_policy: CopyPolicy,
    /// Regions tested when an availability test names none
    pub availability_regions: Vec<String>,
    /// Instance name attached to structured log records
    pub instance: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            default_deadline: Duration::from_secs(10 * 60),
            copy_policy: CopyPolicy::default(),
            availability_regions: DEFAULT_AVAILABILITY_REGIONS
                .iter()
                .map(|r| r.to_string())
                .collect(),
            instance: "image-resolver".to_string(),
        }
    }
}

/// Resolves workload templates to machine images.
///
/// Cheap to share: every collaborator sits behind an `Arc` or is a
/// lightweight handle, so one instance serves concurrent requests.
pub struct ImageResolver {
    provider: Arc<dyn CloudImageProvider>,
    catalog: Arc<dyn TemplateCatalog>,
    cache: Arc<ImageCache>,
    regions: Arc<RegionFallbackMap>,
    cost: CostEstimator,
    validator: TemplateValidator,
    config: ResolverConfig,
    metrics: ResolverMetrics,
    logger: StructuredLogger,
}

impl ImageResolver {
    pub fn new(
        provider: Arc<dyn CloudImageProvider>,
        catalog: Arc<dyn TemplateCatalog>,
        cache: Arc<ImageCache>,
        regions: Arc<RegionFallbackMap>,
        cost: CostEstimator,
        config: ResolverConfig,
    ) -> Self {
        let validator = TemplateValidator::new(&regions);
        let logger = StructuredLogger::new(config.instance.clone());

        Self {
            provider,
            catalog,
            cache,
            regions,
            cost,
            validator,
            config,
            metrics: ResolverMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn catalog(&self) -> &Arc<dyn TemplateCatalog> {
        &self.catalog
    }

    pub fn regions(&self) -> &RegionFallbackMap {
        &self.regions
    }

    pub fn cost_estimator(&self) -> &CostEstimator {
        &self.cost
    }

    /// Resolve `template` in `region`, copying across regions if needed
    pub async fn resolve(
        &self,
        template: &WorkloadTemplate,
        region: &str,
    ) -> Result<ResolutionResult, ResolverError> {
        let deadline = self.deadline_for(template);
        self.run(template, region, deadline, Mode::Resolve).await
    }

    /// Resolve with an explicit deadline for the whole pipeline
    pub async fn resolve_with_deadline(
        &self,
        template: &WorkloadTemplate,
        region: &str,
        deadline: Instant,
    ) -> Result<ResolutionResult, ResolverError> {
        self.run(template, region, deadline, Mode::Resolve).await
    }

    /// Run the pipeline without mutating provider state
    pub async fn preview(
        &self,
        template: &WorkloadTemplate,
        region: &str,
    ) -> Result<ResolutionResult, ResolverError> {
        let deadline = self.deadline_for(template);
        self.run(template, region, deadline, Mode::Preview).await
    }

    pub async fn resolve_by_name(
        &self,
        name: &str,
        region: &str,
    ) -> Result<ResolutionResult, ResolverError> {
        let template = self.catalog.get(name)?;
        self.resolve(&template, region).await
    }

    pub async fn preview_by_name(
        &self,
        name: &str,
        region: &str,
    ) -> Result<ResolutionResult, ResolverError> {
        let template = self.catalog.get(name)?;
        self.preview(&template, region).await
    }

    /// Compare image and script provisioning for a catalog template.
    ///
    /// Strategy violations yield a script-only analysis; unknown or invalid
    /// templates are still errors.
    pub async fn analyze(&self, name: &str, region: &str) -> Result<CostAnalysis, ResolverError> {
        let template = self.catalog.get(name)?;
        let script_setup = template.script_setup_estimate();

        match self.resolve(&template, region).await {
            Ok(result) => match &result.image {
                Some(image) => Ok(self.cost.analyze(name, region, image, script_setup)),
                None => Ok(CostAnalysis::script_only(name, region, script_setup)),
            },
            Err(ResolverError::ImageRequired { .. }) | Err(ResolverError::NoProvisioningPath { .. }) => {
                Ok(CostAnalysis::script_only(name, region, script_setup))
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a catalog template in each region and aggregate the outcome.
    ///
    /// An empty region list tests the configured default regions.
    pub async fn test_availability(
        &self,
        name: &str,
        regions: &[String],
    ) -> Result<AvailabilityReport, ResolverError> {
        let template = self.catalog.get(name)?;
        let regions = if regions.is_empty() {
            self.config.availability_regions.as_slice()
        } else {
            regions
        };

        let mut outcomes = Vec::with_capacity(regions.len());
        for region in regions {
            let started = std::time::Instant::now();
            let outcome = self.resolve(&template, region).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            outcomes.push(match outcome {
                Ok(result) => {
                    let status = if result.image.is_some() {
                        AvailabilityStatus::Passed
                    } else {
                        AvailabilityStatus::Failed
                    };
                    RegionAvailability {
                        region: region.clone(),
                        status,
                        resolution_method: Some(result.resolution_method),
                        error: result.warning,
                        image: result.image,
                        duration_ms,
                    }
                }
                Err(e) => RegionAvailability {
                    region: region.clone(),
                    status: AvailabilityStatus::Failed,
                    resolution_method: None,
                    image: None,
                    error: Some(e.to_string()),
                    duration_ms,
                },
            });
        }

        Ok(AvailabilityReport::from_regions(name, outcomes))
    }

    /// Describe `image_ids` in `region` and cache the usable ones.
    ///
    /// Each describe is bounded by the provider timeout. Returns how many
    /// images were cached.
    pub async fn warm_cache<I>(&self, image_ids: I, region: &str) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut warmed = 0;
        for image_id in image_ids {
            let image_id = image_id.as_ref();
            let described = tokio::time::timeout(
                self.config.provider_timeout,
                self.provider.describe_image(image_id, region),
            )
            .await;

            match described {
                Ok(Ok(mut image)) if image.state.is_usable() => {
                    image.region = region.to_string();
                    self.cache.put(image_id, region, &image);
                    warmed += 1;
                }
                Ok(Ok(image)) => {
                    debug!(image_id = %image_id, state = ?image.state, "Skipping unusable image");
                }
                Ok(Err(e)) => {
                    warn!(image_id = %image_id, error = %e, "Image could not be described");
                }
                Err(_) => {
                    self.metrics.inc_provider_timeout();
                    warn!(image_id = %image_id, "Describing image timed out");
                }
            }
        }
        self.metrics.set_cache_stats(&self.cache.stats());
        warmed
    }

    pub fn invalidate_region(&self, region: &str) -> usize {
        self.cache.invalidate_region(region)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        self.metrics.set_cache_stats(&self.cache.stats());
    }

    pub fn cleanup_expired(&self) -> usize {
        let removed = self.cache.cleanup_expired();
        self.metrics.set_cache_stats(&self.cache.stats());
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn deadline_for(&self, template: &WorkloadTemplate) -> Instant {
        let budget = template
            .image_config()
            .and_then(|config| config.fallback_timeout())
            .unwrap_or(self.config.default_deadline);
        let now = Instant::now();
        now.checked_add(budget)
            .or_else(|| now.checked_add(self.config.default_deadline))
            .unwrap_or_else(|| now + MAX_DEADLINE)
    }

    async fn run(
        &self,
        template: &WorkloadTemplate,
        region: &str,
        deadline: Instant,
        mode: Mode,
    ) -> Result<ResolutionResult, ResolverError> {
        let started = std::time::Instant::now();
        let mut result = ResolutionResult::new(region);

        let Some(config) = template.image_config() else {
            let result = self.script_fallback(result, template, Some(NO_IMAGE_CONFIG_WARNING));
            self.metrics.inc_resolution(result.resolution_method.as_str());
            return Ok(result);
        };

        let errors = self.validator.validate(template);
        if !errors.is_empty() {
            return Err(ResolverError::InvalidTemplate {
                template: template.name.clone(),
                errors,
            });
        }

        let attempt = Attempt {
            template,
            config,
            deadline,
            mode,
        };

        let outcome = match config.strategy() {
            ResolutionStrategy::AmiRequired => {
                match self.search(&attempt, region, &mut result.fallback_chain).await {
                    Some(found) => Ok(self.with_image(result, found, region)),
                    None => Err(ResolverError::ImageRequired {
                        region: region.to_string(),
                        chain: result.fallback_chain,
                    }),
                }
            }
            ResolutionStrategy::AmiFallback => {
                if template.has_script_package_manager() {
                    Ok(self.script_fallback(result, template, None))
                } else {
                    match self.search(&attempt, region, &mut result.fallback_chain).await {
                        Some(found) => {
                            let mut result = self.with_image(result, found, region);
                            result.warning = Some(match result.warning.take() {
                                Some(copy) => format!("{}; {}", SCRIPT_UNAVAILABLE_WARNING, copy),
                                None => SCRIPT_UNAVAILABLE_WARNING.to_string(),
                            });
                            Ok(result)
                        }
                        None => Err(ResolverError::NoProvisioningPath {
                            region: region.to_string(),
                            chain: result.fallback_chain,
                        }),
                    }
                }
            }
            ResolutionStrategy::AmiPreferred => {
                match self.search(&attempt, region, &mut result.fallback_chain).await {
                    Some(found) => Ok(self.with_image(result, found, region)),
                    None => Ok(self.script_fallback(result, template, Some(IMAGE_UNAVAILABLE_WARNING))),
                }
            }
        };

        self.metrics
            .observe_resolution_latency(started.elapsed().as_secs_f64());
        self.metrics.set_cache_stats(&self.cache.stats());

        match &outcome {
            Ok(result) => {
                self.metrics.inc_resolution(result.resolution_method.as_str());
                if let Some(image_id) = result.image_id() {
                    self.logger.log_image_resolved(
                        &template.name,
                        region,
                        result.resolution_method.as_str(),
                        image_id,
                        &result.fallback_chain,
                        started.elapsed().as_millis() as u64,
                    );
                }
            }
            Err(e) => {
                if let Some(chain) = e.fallback_chain() {
                    self.metrics.inc_strategy_violation();
                    self.logger
                        .log_strategy_violation(&template.name, region, chain);
                }
            }
        }

        outcome
    }

    fn with_image(&self, mut result: ResolutionResult, found: Found, region: &str) -> ResolutionResult {
        result.launch_time = found.image.launch_time();
        result.estimated_cost = self.cost.estimate_image_cost(&found.image, region);
        result.resolution_method = found.method;
        result.source_region = found.source_region;
        result.warning = found.warning;
        result.image = Some(found.image);
        result
    }

    fn script_fallback(
        &self,
        mut result: ResolutionResult,
        template: &WorkloadTemplate,
        warning: Option<&str>,
    ) -> ResolutionResult {
        result.resolution_method = ResolutionMethod::FallbackScript;
        result.launch_time = template.script_setup_estimate();
        result.warning = warning.map(str::to_string);
        self.logger.log_script_fallback(
            &template.name,
            &result.target_region,
            warning.unwrap_or("script package manager declared"),
        );
        result
    }
}

/// Builder for the image resolver
pub struct ImageResolverBuilder {
    provider: Option<Arc<dyn CloudImageProvider>>,
    catalog: Option<Arc<dyn TemplateCatalog>>,
    cache: Option<Arc<ImageCache>>,
    regions: Option<Arc<RegionFallbackMap>>,
    cost: CostEstimator,
    config: ResolverConfig,
}

impl ImageResolverBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            provider: None,
            catalog: None,
            cache: None,
            regions: None,
            cost: CostEstimator::default(),
            config: ResolverConfig::default(),
        }
    }

    /// Set the cloud image provider
    pub fn provider(mut self, provider: Arc<dyn CloudImageProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the template catalog
    pub fn catalog(mut self, catalog: Arc<dyn TemplateCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an existing cache (default: a fresh cache with default limits)
    pub fn cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the region fallback map (default: built-in table)
    pub fn regions(mut self, regions: Arc<RegionFallbackMap>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn cost_estimator(mut self, cost: CostEstimator) -> Self {
        self.cost = cost;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-call provider timeout
    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout = timeout;
        self
    }

    /// Set the default resolution deadline
    pub fn default_deadline(mut self, deadline: Duration) -> Self {
        self.config.default_deadline = deadline;
        self
    }

    /// Set the copy completion polling policy
    pub fn copy_policy(mut self, policy: CopyPolicy) -> Self {
        self.config.copy_policy = policy;
        self
    }

    /// Build the resolver
    pub fn build(self) -> Result<ImageResolver> {
        let provider = self
            .provider
            .ok_or_else(|| anyhow::anyhow!("Image provider is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| anyhow::anyhow!("Template catalog is required"))?;
        let cache = self.cache.unwrap_or_else(|| Arc::new(ImageCache::new()));
        let regions = self
            .regions
            .unwrap_or_else(|| Arc::new(RegionFallbackMap::default()));

        Ok(ImageResolver::new(
            provider,
            catalog,
            cache,
            regions,
            self.cost,
            self.config,
        ))
    }
}

impl Default for ImageResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
