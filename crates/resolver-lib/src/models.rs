//! Core data models for image resolution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Default launch time assumed for an image that does not report one
pub const DEFAULT_IMAGE_LAUNCH_TIME: Duration = Duration::from_secs(30);

/// CPU architecture of a machine image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }
}

impl Default for Architecture {
    /// ARM64 instances are the cheaper default
    fn default() -> Self {
        Architecture::Arm64
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(format!(
                "invalid architecture '{}', must be 'x86_64' or 'arm64'",
                other
            )),
        }
    }
}

/// Availability state reported by the cloud provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    #[default]
    Available,
    Pending,
    Failed,
    Deregistered,
}

impl ImageState {
    /// Images in these states can still back a launch (pending copies finish)
    pub fn is_usable(&self) -> bool {
        matches!(self, ImageState::Available | ImageState::Pending)
    }
}

/// A community review attached to a shared image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReview {
    pub user_id: String,
    pub rating: u8,
    pub review: String,
    pub helpful: u32,
    pub created_at: DateTime<Utc>,
}

/// Community metadata for shared images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityInfo {
    pub creator: String,
    pub version: String,
    pub rating: f64,
    pub review_count: u32,
    pub download_count: u64,
    pub verified: bool,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviews: Vec<ImageReview>,
}

/// Detailed information about a machine image
///
/// Every field is owned, so `Clone` produces a fully independent copy,
/// nested tag map and community reviews included. The cache relies on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub region: String,
    pub architecture: Architecture,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: ImageState,
    #[serde(default)]
    pub public: bool,
    /// Expected launch time in seconds
    #[serde(default = "default_launch_time_secs")]
    pub launch_time_secs: u64,
    /// Marketplace hourly surcharge, zero for non-marketplace images
    #[serde(default)]
    pub marketplace_cost: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Set when the image was copied from another region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_info: Option<CommunityInfo>,
}

fn default_launch_time_secs() -> u64 {
    DEFAULT_IMAGE_LAUNCH_TIME.as_secs()
}

impl ImageInfo {
    /// Minimal image record; remaining metadata defaults
    pub fn new(
        image_id: impl Into<String>,
        region: impl Into<String>,
        architecture: Architecture,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            name: String::new(),
            description: String::new(),
            region: region.into(),
            architecture,
            owner: String::new(),
            creation_date: None,
            state: ImageState::Available,
            public: false,
            launch_time_secs: default_launch_time_secs(),
            marketplace_cost: 0.0,
            tags: HashMap::new(),
            source_region: None,
            community_info: None,
        }
    }

    /// Explicit deep copy used at every cache boundary
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Expected launch time, falling back to the default for unset values
    pub fn launch_time(&self) -> Duration {
        if self.launch_time_secs > 0 {
            Duration::from_secs(self.launch_time_secs)
        } else {
            DEFAULT_IMAGE_LAUNCH_TIME
        }
    }
}

/// How an image (or the script fallback) was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    DirectMapping,
    DynamicSearch,
    Marketplace,
    CrossRegion,
    FallbackScript,
    Failed,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::DirectMapping => "direct_mapping",
            ResolutionMethod::DynamicSearch => "dynamic_search",
            ResolutionMethod::Marketplace => "marketplace",
            ResolutionMethod::CrossRegion => "cross_region",
            ResolutionMethod::FallbackScript => "fallback_script",
            ResolutionMethod::Failed => "failed",
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one template in one region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    pub resolution_method: ResolutionMethod,
    /// Tier names in the order they were attempted
    pub fallback_chain: Vec<String>,
    pub launch_time: Duration,
    /// Estimated hourly cost of running from the chosen image
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub target_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_region: Option<String>,
}

impl ResolutionResult {
    pub fn new(target_region: impl Into<String>) -> Self {
        Self {
            image: None,
            resolution_method: ResolutionMethod::Failed,
            fallback_chain: Vec::new(),
            launch_time: Duration::ZERO,
            estimated_cost: 0.0,
            warning: None,
            target_region: target_region.into(),
            source_region: None,
        }
    }

    pub fn is_script_fallback(&self) -> bool {
        self.resolution_method == ResolutionMethod::FallbackScript
    }

    pub fn image_id(&self) -> Option<&str> {
        self.image.as_ref().map(|i| i.image_id.as_str())
    }
}

/// Image-vs-script recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    AmiRecommended,
    ScriptRecommended,
    Neutral,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::AmiRecommended => "ami_recommended",
            Recommendation::ScriptRecommended => "script_recommended",
            Recommendation::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost comparison between image-based and script-based provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub template_name: String,
    pub region: String,

    /// Per hour
    pub ami_launch_cost: f64,
    /// Per month
    pub ami_storage_cost: f64,
    /// One-time
    pub ami_setup_cost: f64,

    /// Per hour
    pub script_launch_cost: f64,
    /// One-time
    pub script_setup_cost: f64,
    /// Minutes
    pub script_setup_time: u64,

    /// Hours of runtime at which both paths cost the same
    pub break_even_point: f64,
    pub cost_savings_1h: f64,
    pub cost_savings_8h: f64,
    /// Minutes saved by launching from an image
    pub time_savings: u64,

    pub recommendation: Recommendation,
    pub reasoning: String,
}

impl CostAnalysis {
    /// Analysis for templates where only script provisioning is possible
    pub fn script_only(
        template_name: impl Into<String>,
        region: impl Into<String>,
        script_setup: Duration,
    ) -> Self {
        Self {
            template_name: template_name.into(),
            region: region.into(),
            ami_launch_cost: 0.0,
            ami_storage_cost: 0.0,
            ami_setup_cost: 0.0,
            script_launch_cost: 0.0,
            script_setup_cost: 0.0,
            script_setup_time: script_setup.as_secs() / 60,
            break_even_point: 0.0,
            cost_savings_1h: 0.0,
            cost_savings_8h: 0.0,
            time_savings: 0,
            recommendation: Recommendation::ScriptRecommended,
            reasoning: "Image not available, script provisioning is the only option".to_string(),
        }
    }
}

/// Availability outcome for one region or for a whole test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Passed,
    Partial,
    Failed,
}

/// Availability of a template's image in one region
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionAvailability {
    pub region: String,
    pub status: AvailabilityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_method: Option<ResolutionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Availability of a template's image across regions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub template_name: String,
    pub overall_status: AvailabilityStatus,
    pub regions: Vec<RegionAvailability>,
    pub tested_at: DateTime<Utc>,
    pub total_regions: usize,
    pub available_regions: usize,
}

impl AvailabilityReport {
    /// Aggregate per-region outcomes into an overall status
    pub fn from_regions(template_name: impl Into<String>, regions: Vec<RegionAvailability>) -> Self {
        let total = regions.len();
        let available = regions
            .iter()
            .filter(|r| r.status == AvailabilityStatus::Passed)
            .count();

        let overall_status = if available == 0 {
            AvailabilityStatus::Failed
        } else if available == total {
            AvailabilityStatus::Passed
        } else {
            AvailabilityStatus::Partial
        };

        Self {
            template_name: template_name.into(),
            overall_status,
            regions,
            tested_at: Utc::now(),
            total_regions: total,
            available_regions: available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_parsing() {
        assert_eq!("x86_64".parse::<Architecture>(), Ok(Architecture::X86_64));
        assert_eq!("amd64".parse::<Architecture>(), Ok(Architecture::X86_64));
        assert_eq!("arm64".parse::<Architecture>(), Ok(Architecture::Arm64));
        assert!("sparc".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_image_info_deserializes_with_defaults() {
        let json = r#"{"image_id":"ami-0123456789abcdef0","region":"us-east-1","architecture":"arm64"}"#;
        let image: ImageInfo = serde_json::from_str(json).unwrap();

        assert_eq!(image.state, ImageState::Available);
        assert_eq!(image.launch_time(), DEFAULT_IMAGE_LAUNCH_TIME);
        assert!(image.tags.is_empty());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let mut original = ImageInfo::new("ami-12345678", "us-east-1", Architecture::X86_64);
        original.tags.insert("Team".to_string(), "genomics".to_string());

        let mut copy = original.deep_copy();
        copy.tags.insert("Team".to_string(), "physics".to_string());

        assert_eq!(original.tags["Team"], "genomics");
    }

    #[test]
    fn test_availability_report_status() {
        let region = |name: &str, status| RegionAvailability {
            region: name.to_string(),
            status,
            resolution_method: None,
            image: None,
            error: None,
            duration_ms: 0,
        };

        let report = AvailabilityReport::from_regions(
            "python-ml",
            vec![
                region("us-east-1", AvailabilityStatus::Passed),
                region("eu-west-1", AvailabilityStatus::Failed),
            ],
        );
        assert_eq!(report.overall_status, AvailabilityStatus::Partial);
        assert_eq!(report.available_regions, 1);

        let report = AvailabilityReport::from_regions("python-ml", vec![]);
        assert_eq!(report.overall_status, AvailabilityStatus::Failed);
    }

    #[test]
    fn test_method_serialization() {
        let json = serde_json::to_string(&ResolutionMethod::FallbackScript).unwrap();
        assert_eq!(json, "\"fallback_script\"");
        assert_eq!(Recommendation::AmiRecommended.to_string(), "ami_recommended");
    }
}
