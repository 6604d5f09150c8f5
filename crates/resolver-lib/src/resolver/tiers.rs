//! The ordered tier pipeline
//!
//! Each tier either yields an image or a miss reason. Misses are recorded
//! and never escape the pipeline.

use super::ImageResolver;
use crate::error::ProviderError;
use crate::models::{ImageInfo, ResolutionMethod};
use crate::provider::{MarketplaceCriteria, SearchCriteria};
use crate::template::{ImageConfig, WorkloadTemplate};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tiers searched in a single region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTier {
    DirectMapping,
    DynamicSearch,
    MarketplaceSearch,
}

impl LocalTier {
    pub const ALL: [LocalTier; 3] = [
        LocalTier::DirectMapping,
        LocalTier::DynamicSearch,
        LocalTier::MarketplaceSearch,
    ];

    pub fn method(&self) -> ResolutionMethod {
        match self {
            LocalTier::DirectMapping => ResolutionMethod::DirectMapping,
            LocalTier::DynamicSearch => ResolutionMethod::DynamicSearch,
            LocalTier::MarketplaceSearch => ResolutionMethod::Marketplace,
        }
    }
}

/// One step of the resolution pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local(LocalTier),
    CrossRegionSearch,
}

impl Tier {
    /// Pipeline order
    pub const PIPELINE: [Tier; 4] = [
        Tier::Local(LocalTier::DirectMapping),
        Tier::Local(LocalTier::DynamicSearch),
        Tier::Local(LocalTier::MarketplaceSearch),
        Tier::CrossRegionSearch,
    ];

    /// Name recorded in the fallback chain
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Local(LocalTier::DirectMapping) => "direct_mapping",
            Tier::Local(LocalTier::DynamicSearch) => "dynamic_search",
            Tier::Local(LocalTier::MarketplaceSearch) => "marketplace_search",
            Tier::CrossRegionSearch => "cross_region_search",
        }
    }
}

/// Whether provider mutations are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Resolve,
    Preview,
}

/// State shared by every tier of one resolution
pub(crate) struct Attempt<'a> {
    pub template: &'a WorkloadTemplate,
    pub config: &'a ImageConfig,
    pub deadline: Instant,
    pub mode: Mode,
}

/// An image produced by the pipeline
#[derive(Debug, Clone)]
pub(crate) struct Found {
    pub image: ImageInfo,
    pub method: ResolutionMethod,
    pub source_region: Option<String>,
    pub warning: Option<String>,
}

type TierResult = Result<ImageInfo, String>;

impl ImageResolver {
    /// Run every tier in order, appending each tier name to `chain`
    pub(crate) async fn search(
        &self,
        attempt: &Attempt<'_>,
        region: &str,
        chain: &mut Vec<String>,
    ) -> Option<Found> {
        for tier in Tier::PIPELINE {
            chain.push(tier.name().to_string());

            let outcome = match tier {
                Tier::Local(local) => self
                    .run_local(local, attempt, region)
                    .await
                    .map(|image| Found {
                        image,
                        method: local.method(),
                        source_region: None,
                        warning: None,
                    }),
                Tier::CrossRegionSearch => self.cross_region_search(attempt, region).await,
            };

            match outcome {
                Ok(found) => return Some(found),
                Err(reason) => {
                    self.metrics.inc_tier_failure(tier.name());
                    self.logger
                        .log_tier_failed(&attempt.template.name, region, tier.name(), &reason);
                }
            }
        }
        None
    }

    /// Tiers 1-3 against one region, with their own trace
    pub(crate) async fn search_local(
        &self,
        attempt: &Attempt<'_>,
        region: &str,
        chain: &mut Vec<String>,
    ) -> Option<(LocalTier, ImageInfo)> {
        for local in LocalTier::ALL {
            chain.push(Tier::Local(local).name().to_string());
            match self.run_local(local, attempt, region).await {
                Ok(image) => return Some((local, image)),
                Err(reason) => {
                    debug!(region = %region, tier = Tier::Local(local).name(), reason = %reason, "Neighbour tier failed");
                }
            }
        }
        None
    }

    async fn run_local(&self, tier: LocalTier, attempt: &Attempt<'_>, region: &str) -> TierResult {
        match tier {
            LocalTier::DirectMapping => self.direct_mapping(attempt, region).await,
            LocalTier::DynamicSearch => self.dynamic_search(attempt, region).await,
            LocalTier::MarketplaceSearch => self.marketplace_search(attempt, region).await,
        }
    }

    async fn direct_mapping(&self, attempt: &Attempt<'_>, region: &str) -> TierResult {
        let config = attempt.config;

        if let Some(id) = config.image_mappings.get(region) {
            return self.validate_image(attempt, id, region).await;
        }

        let Some(by_arch) = config.images.get(region) else {
            return Err(format!("no direct mapping for region {}", region));
        };

        // Preferred architecture first, then the rest in table order
        let preferred = config.preferred_architecture();
        let candidates = by_arch
            .get(preferred.as_str())
            .into_iter()
            .chain(
                by_arch
                    .iter()
                    .filter(|(arch, _)| arch.as_str() != preferred.as_str())
                    .map(|(_, id)| id),
            );

        let mut last_error = format!("no images listed for region {}", region);
        for id in candidates {
            match self.validate_image(attempt, id, region).await {
                Ok(image) => return Ok(image),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn dynamic_search(&self, attempt: &Attempt<'_>, region: &str) -> TierResult {
        let Some(search) = &attempt.config.image_search else {
            return Err("no image search configured".to_string());
        };

        let mut required_tags = HashMap::new();
        if let Some(version) = &search.version_tag {
            required_tags.insert("Version".to_string(), version.clone());
        }
        // Explicit tags override the version tag
        required_tags.extend(search.required_tags.clone());

        let criteria = SearchCriteria {
            region: region.to_string(),
            owner: search.owner.clone(),
            name_pattern: search.name_pattern.clone(),
            architectures: search
                .architectures
                .iter()
                .filter_map(|arch| arch.parse().ok())
                .collect(),
            required_tags,
            min_creation_date: search
                .min_creation_date
                .as_deref()
                .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()),
        };

        let found = self
            .call_provider(attempt, "search_images", self.provider.search_images(&criteria))
            .await
            .map_err(|e| format!("image search failed: {}", e))?;

        match found {
            Some(image) => self.accept_search_result(image, region),
            None => Err(format!("no image matched '{}'", search.name_pattern)),
        }
    }

    async fn marketplace_search(&self, attempt: &Attempt<'_>, region: &str) -> TierResult {
        let Some(search) = &attempt.config.marketplace_search else {
            return Err("no marketplace search configured".to_string());
        };

        let criteria = MarketplaceCriteria {
            region: region.to_string(),
            product_code: search.product_code.clone(),
            version_constraint: search.version_constraint.clone(),
            publisher: search.publisher.clone(),
            architecture: attempt.config.preferred_architecture(),
        };

        let found = self
            .call_provider(
                attempt,
                "search_marketplace",
                self.provider.search_marketplace(&criteria),
            )
            .await
            .map_err(|e| format!("marketplace search failed: {}", e))?;

        match found {
            Some(image) => self.accept_search_result(image, region),
            None => Err(format!("no marketplace listing for {}", search.product_code)),
        }
    }

    fn accept_search_result(&self, mut image: ImageInfo, region: &str) -> TierResult {
        if !image.state.is_usable() {
            return Err(format!("image {} is not usable", image.image_id));
        }
        image.region = region.to_string();
        self.cache.put(&image.image_id, region, &image);
        Ok(image)
    }

    async fn cross_region_search(&self, attempt: &Attempt<'_>, region: &str) -> Result<Found, String> {
        if !attempt.config.allows_cross_region() {
            return Err("cross-region search not enabled".to_string());
        }

        let neighbours = self.regions.neighbors(region);
        if neighbours.is_empty() {
            return Err(format!("no fallback regions for {}", region));
        }

        for source in neighbours {
            let mut scratch = Vec::new();
            let Some((tier, image)) = self.search_local(attempt, source, &mut scratch).await else {
                continue;
            };

            let surcharge = self.cost.estimate_cross_region_cost(None, source, region);
            debug!(
                source_region = %source,
                image_id = %image.image_id,
                tier = Tier::Local(tier).name(),
                "Found image in neighbour region"
            );

            match attempt.mode {
                Mode::Preview => {
                    return Ok(Found {
                        image,
                        method: ResolutionMethod::CrossRegion,
                        source_region: Some(source.clone()),
                        warning: Some(format!(
                            "Image would be copied from {} (additional cost: ${:.3})",
                            source, surcharge
                        )),
                    });
                }
                Mode::Resolve => {
                    match self.copy_and_wait(attempt, &image, source, region).await {
                        Ok(copied) => {
                            self.metrics.inc_cross_region_copy(true);
                            self.logger.log_image_copied(
                                &image.image_id,
                                &copied.image_id,
                                source,
                                region,
                                surcharge,
                            );
                            return Ok(Found {
                                image: copied,
                                method: ResolutionMethod::CrossRegion,
                                source_region: Some(source.clone()),
                                warning: Some(format!(
                                    "Image copied from {} (additional cost: ${:.3})",
                                    source, surcharge
                                )),
                            });
                        }
                        Err(e) => {
                            self.metrics.inc_cross_region_copy(false);
                            warn!(
                                source_region = %source,
                                target_region = %region,
                                image_id = %image.image_id,
                                error = %e,
                                "Cross-region copy failed, trying next region"
                            );
                        }
                    }
                }
            }
        }

        Err(format!("no image found in fallback regions of {}", region))
    }

    /// Cache first, then `describe_image`; unusable states are rejected
    pub(crate) async fn validate_image(
        &self,
        attempt: &Attempt<'_>,
        image_id: &str,
        region: &str,
    ) -> TierResult {
        if let Some(image) = self.cache.get(image_id, region) {
            if image.state.is_usable() {
                return Ok(image);
            }
            debug!(image_id = %image_id, region = %region, state = ?image.state, "Dropping unusable cached image");
            self.cache.invalidate(image_id, region);
        }

        let mut image = self
            .call_provider(
                attempt,
                "describe_image",
                self.provider.describe_image(image_id, region),
            )
            .await
            .map_err(|e| format!("failed to validate {}: {}", image_id, e))?;

        if !image.state.is_usable() {
            return Err(format!(
                "image {} is {:?}",
                image_id, image.state
            ));
        }

        image.region = region.to_string();
        self.cache.put(image_id, region, &image);
        Ok(image)
    }

    /// Bound a provider call by the provider timeout and the attempt deadline
    pub(crate) async fn call_provider<T, F>(
        &self,
        attempt: &Attempt<'_>,
        operation: &'static str,
        call: F,
    ) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let remaining = attempt.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.metrics.inc_provider_timeout();
            return Err(ProviderError::Timeout(remaining));
        }

        let limit = remaining.min(self.config.provider_timeout);
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.inc_provider_timeout();
                warn!(operation = operation, timeout_ms = limit.as_millis() as u64, "Provider call timed out");
                Err(ProviderError::Timeout(limit))
            }
        }
    }
}
