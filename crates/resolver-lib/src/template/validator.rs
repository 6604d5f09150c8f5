//! Image configuration validation
//!
//! Validation collects every problem instead of stopping at the first, so
//! operators can fix a template in one pass.

use super::{parse_duration, ImageConfig, ResolutionStrategy, WorkloadTemplate};
use crate::region::RegionFallbackMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const IMAGE_ID_PATTERN: &str = r"^ami-[a-f0-9]{8,17}$";
const VERSION_CONSTRAINT_PATTERN: &str = r"^(>=|>|<=|<|=)?\d+\.\d+\.\d+$";

/// A single validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateValidationError {
    pub field: String,
    pub message: String,
}

impl TemplateValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TemplateValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates a template's image configuration
#[derive(Debug, Clone)]
pub struct TemplateValidator {
    regions: HashSet<String>,
    image_id: Regex,
    version_constraint: Regex,
}

impl TemplateValidator {
    /// Validator accepting every region known to `regions`
    pub fn new(regions: &RegionFallbackMap) -> Self {
        Self::with_regions(regions.known_regions())
    }

    pub fn with_regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            regions: regions.into_iter().map(Into::into).collect(),
            image_id: Regex::new(IMAGE_ID_PATTERN).expect("Invalid image id pattern"),
            version_constraint: Regex::new(VERSION_CONSTRAINT_PATTERN)
                .expect("Invalid version constraint pattern"),
        }
    }

    pub fn is_valid_image_id(&self, id: &str) -> bool {
        self.image_id.is_match(id)
    }

    /// Validate a whole template; templates without image intent are valid
    pub fn validate(&self, template: &WorkloadTemplate) -> Vec<TemplateValidationError> {
        let Some(config) = template.image_config() else {
            return Vec::new();
        };

        let mut errors = self.validate_config(config);

        if config.strategy() == ResolutionStrategy::AmiRequired {
            if !config.has_resolution_method() {
                errors.push(TemplateValidationError::new(
                    "image_config",
                    "when strategy is 'ami_required', at least one resolution method must be provided (image_mappings, images, image_search or marketplace_search)",
                ));
            }
            if template.has_script_package_manager() {
                errors.push(TemplateValidationError::new(
                    "image_config.strategy",
                    "template cannot combine 'ami_required' with a script-based package manager, use 'ami_preferred' or 'ami_fallback'",
                ));
            }
        }

        errors
    }

    /// Validate the image configuration on its own
    pub fn validate_config(&self, config: &ImageConfig) -> Vec<TemplateValidationError> {
        let mut errors = Vec::new();

        for (region, id) in &config.image_mappings {
            let field = format!("image_config.image_mappings.{}", region);
            self.check_region(&field, region, &mut errors);
            self.check_image_id(&field, id, &mut errors);
        }

        for (region, by_arch) in &config.images {
            self.check_region(&format!("image_config.images.{}", region), region, &mut errors);
            for (arch, id) in by_arch {
                let field = format!("image_config.images.{}.{}", region, arch);
                if arch.parse::<crate::models::Architecture>().is_err() {
                    errors.push(TemplateValidationError::new(
                        &field,
                        format!("invalid architecture '{}', must be 'x86_64' or 'arm64'", arch),
                    ));
                }
                self.check_image_id(&field, id, &mut errors);
            }
        }

        if let Some(search) = &config.image_search {
            if search.owner.is_empty() {
                errors.push(TemplateValidationError::new(
                    "image_config.image_search.owner",
                    "owner is required for image search",
                ));
            }
            if search.name_pattern.is_empty() {
                errors.push(TemplateValidationError::new(
                    "image_config.image_search.name_pattern",
                    "name_pattern is required for image search",
                ));
            }
            for (i, arch) in search.architectures.iter().enumerate() {
                if arch.parse::<crate::models::Architecture>().is_err() {
                    errors.push(TemplateValidationError::new(
                        format!("image_config.image_search.architectures[{}]", i),
                        format!("invalid architecture '{}', must be 'x86_64' or 'arm64'", arch),
                    ));
                }
            }
            if let Some(date) = &search.min_creation_date {
                if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                    errors.push(TemplateValidationError::new(
                        "image_config.image_search.min_creation_date",
                        format!("invalid date format '{}', must be YYYY-MM-DD", date),
                    ));
                }
            }
            for (key, value) in &search.required_tags {
                if key.is_empty() {
                    errors.push(TemplateValidationError::new(
                        "image_config.image_search.required_tags",
                        "tag key cannot be empty",
                    ));
                }
                if value.is_empty() {
                    errors.push(TemplateValidationError::new(
                        format!("image_config.image_search.required_tags.{}", key),
                        "tag value cannot be empty",
                    ));
                }
            }
        }

        if let Some(marketplace) = &config.marketplace_search {
            if marketplace.product_code.is_empty() {
                errors.push(TemplateValidationError::new(
                    "image_config.marketplace_search.product_code",
                    "product_code is required for marketplace search",
                ));
            }
            if let Some(constraint) = &marketplace.version_constraint {
                if !self.version_constraint.is_match(constraint) {
                    errors.push(TemplateValidationError::new(
                        "image_config.marketplace_search.version_constraint",
                        format!(
                            "invalid version constraint '{}', must be semver with optional operator (e.g. '>=2.0.0')",
                            constraint
                        ),
                    ));
                }
            }
        }

        if let Some(timeout) = &config.fallback_timeout {
            if parse_duration(timeout).is_none() {
                errors.push(TemplateValidationError::new(
                    "image_config.fallback_timeout",
                    format!("invalid timeout '{}', must be a duration such as '10m' or '30s'", timeout),
                ));
            }
        }

        errors
    }

    fn check_region(&self, field: &str, region: &str, errors: &mut Vec<TemplateValidationError>) {
        if !self.regions.contains(region) {
            errors.push(TemplateValidationError::new(
                field,
                format!("unknown region '{}'", region),
            ));
        }
    }

    fn check_image_id(&self, field: &str, id: &str, errors: &mut Vec<TemplateValidationError>) {
        if !self.is_valid_image_id(id) {
            errors.push(TemplateValidationError::new(
                field,
                format!("invalid image id '{}', must match 'ami-' followed by 8 to 17 hex digits", id),
            ));
        }
    }
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new(&RegionFallbackMap::default())
    }
}
