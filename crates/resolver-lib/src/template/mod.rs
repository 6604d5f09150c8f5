//! Workload templates and their image configuration
//!
//! Templates are read-only inputs loaded from a catalog. Only the image
//! configuration and package lists matter for resolution; everything else a
//! template may carry is ignored here.

pub mod catalog;
pub mod validator;

pub use catalog::{DirectoryCatalog, InMemoryCatalog, TemplateCatalog};
pub use validator::{TemplateValidationError, TemplateValidator};

use crate::models::Architecture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Base time of a script-provisioned launch before any package installs
pub const SCRIPT_BASE_SETUP: Duration = Duration::from_secs(3 * 60);
const SYSTEM_PACKAGE_SETUP: Duration = Duration::from_secs(10);
const CONDA_PACKAGE_SETUP: Duration = Duration::from_secs(20);
const PIP_PACKAGE_SETUP: Duration = Duration::from_secs(5);

/// How a template trades images against script provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Try an image first, fall back to scripts
    #[default]
    AmiPreferred,
    /// Image only; failing to find one is an error
    AmiRequired,
    /// Scripts first, image only when no package manager is available
    AmiFallback,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::AmiPreferred => "ami_preferred",
            ResolutionStrategy::AmiRequired => "ami_required",
            ResolutionStrategy::AmiFallback => "ami_fallback",
        }
    }
}

/// What to do when no local image exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    ScriptProvisioning,
    Error,
    CrossRegion,
}

/// Dynamic image search parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSearch {
    #[serde(default)]
    pub owner: String,
    /// Glob-style name pattern, e.g. `wsi-python-ml-*`
    #[serde(default)]
    pub name_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    /// `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_creation_date: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub required_tags: HashMap<String, String>,
}

/// Marketplace search parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceSearch {
    #[serde(default)]
    pub product_code: String,
    /// Semver with optional operator, e.g. `>=2.0.0`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

/// Image resolution configuration of a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResolutionStrategy>,

    /// region -> image id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub image_mappings: BTreeMap<String, String>,

    /// Legacy table: region -> architecture -> image id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_search: Option<ImageSearch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_search: Option<MarketplaceSearch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<FallbackStrategy>,

    /// Upper bound for a whole resolution, e.g. `10m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_architecture: Option<Architecture>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
}

impl ImageConfig {
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy.unwrap_or_default()
    }

    pub fn preferred_architecture(&self) -> Architecture {
        self.preferred_architecture.unwrap_or_default()
    }

    /// True if any tier has something to work with
    pub fn has_resolution_method(&self) -> bool {
        !self.image_mappings.is_empty()
            || !self.images.is_empty()
            || self.image_search.is_some()
            || self.marketplace_search.is_some()
    }

    /// Empty or `cross_region` allows the cross-region tier
    pub fn allows_cross_region(&self) -> bool {
        matches!(self.fallback_strategy, None | Some(FallbackStrategy::CrossRegion))
    }

    /// Parsed `fallback_timeout`; `None` when unset or malformed
    pub fn fallback_timeout(&self) -> Option<Duration> {
        self.fallback_timeout.as_deref().and_then(parse_duration)
    }
}

/// Package lists installed by script provisioning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packages {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conda: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pip: Vec<String>,
}

/// A workload template as supplied by the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// apt, dnf, conda, pip, spack or ami
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default)]
    pub packages: Packages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

impl WorkloadTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Image configuration, if the template declares any resolution intent
    pub fn image_config(&self) -> Option<&ImageConfig> {
        self.image_config
            .as_ref()
            .filter(|config| config.strategy.is_some() || config.has_resolution_method())
    }

    /// A package manager other than `ami` means scripts can provision
    pub fn has_script_package_manager(&self) -> bool {
        matches!(self.package_manager.as_deref(), Some(pm) if !pm.is_empty() && pm != "ami")
    }

    /// Estimated script provisioning time from package counts
    pub fn script_setup_estimate(&self) -> Duration {
        let count = |n: usize| n as u32;
        SCRIPT_BASE_SETUP
            + SYSTEM_PACKAGE_SETUP * count(self.packages.system.len())
            + CONDA_PACKAGE_SETUP * count(self.packages.conda.len())
            + PIP_PACKAGE_SETUP * count(self.packages.pip.len())
    }
}

/// Parse durations such as `30s`, `10m`, `1h` or `1m30s`
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(unit)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}
