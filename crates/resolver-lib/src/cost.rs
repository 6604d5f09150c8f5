//! Image-versus-script cost estimation
//!
//! Pricing is a static table modelled on public on-demand prices. All
//! amounts are USD; instance and storage prorations assume a 720 hour month.

use crate::models::{CostAnalysis, ImageInfo, Recommendation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Hours in the month used to prorate storage
pub const HOURS_PER_MONTH: f64 = 720.0;

const FALLBACK_INSTANCE_RATE: f64 = 0.05;
const FALLBACK_STORAGE_RATE: f64 = 0.10;
const FALLBACK_TRANSFER_RATE: f64 = 0.02;
const DEFAULT_MARKETPLACE_RATE: f64 = 0.05;

const US_REGIONS: &[&str] = &["us-east-1", "us-east-2", "us-west-1", "us-west-2"];
const EU_REGIONS: &[&str] = &["eu-west-1", "eu-west-2", "eu-central-1"];
const AP_REGIONS: &[&str] = &["ap-south-1", "ap-southeast-1", "ap-northeast-1"];

/// us-east-1 on-demand hourly prices
const BASE_INSTANCE_PRICES: &[(&str, f64)] = &[
    ("t4g.small", 0.0168),
    ("t4g.medium", 0.0336),
    ("t4g.large", 0.0672),
    ("t4g.xlarge", 0.1344),
    ("t3.small", 0.0208),
    ("t3.medium", 0.0416),
    ("t3.large", 0.0832),
    ("m6i.large", 0.0864),
    ("m6i.xlarge", 0.1728),
    ("c6i.large", 0.0765),
    ("c6i.xlarge", 0.1530),
    ("r6i.large", 0.1008),
    ("r6i.xlarge", 0.2016),
];

/// Region-specific prices with fallbacks for unknown entries
#[derive(Debug, Clone)]
pub struct PricingTable {
    /// region -> instance type -> hourly
    instance: HashMap<String, HashMap<String, f64>>,
    /// region -> $/GB-month
    storage: HashMap<String, f64>,
    /// region -> $/GB
    transfer: HashMap<String, f64>,
    marketplace_rate: f64,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::empty();

        let regional = [
            (US_REGIONS, 0.10, 0.02),
            (EU_REGIONS, 0.11, 0.02),
            (AP_REGIONS, 0.12, 0.03),
        ];
        for (regions, storage, transfer) in regional {
            for region in regions {
                table.storage.insert(region.to_string(), storage);
                table.transfer.insert(region.to_string(), transfer);
            }
        }

        for (i, region) in US_REGIONS.iter().enumerate() {
            // us-east-1 is the baseline
            let factor = if i == 0 { 1.0 } else { 1.02 };
            table.insert_scaled_prices(region, factor);
        }
        for region in EU_REGIONS {
            table.insert_scaled_prices(region, 1.05);
        }
        for region in AP_REGIONS {
            table.insert_scaled_prices(region, 1.08);
        }

        table
    }
}

impl PricingTable {
    /// Table with no entries; every lookup uses the fallback rates
    pub fn empty() -> Self {
        Self {
            instance: HashMap::new(),
            storage: HashMap::new(),
            transfer: HashMap::new(),
            marketplace_rate: DEFAULT_MARKETPLACE_RATE,
        }
    }

    fn insert_scaled_prices(&mut self, region: &str, factor: f64) {
        let prices = BASE_INSTANCE_PRICES
            .iter()
            .map(|(instance_type, price)| (instance_type.to_string(), price * factor))
            .collect();
        self.instance.insert(region.to_string(), prices);
    }

    pub fn with_instance_rate(mut self, region: &str, instance_type: &str, hourly: f64) -> Self {
        self.instance
            .entry(region.to_string())
            .or_default()
            .insert(instance_type.to_string(), hourly);
        self
    }

    pub fn with_storage_rate(mut self, region: &str, per_gb_month: f64) -> Self {
        self.storage.insert(region.to_string(), per_gb_month);
        self
    }

    pub fn with_transfer_rate(mut self, region: &str, per_gb: f64) -> Self {
        self.transfer.insert(region.to_string(), per_gb);
        self
    }

    pub fn instance_rate(&self, instance_type: &str, region: &str) -> f64 {
        self.instance
            .get(region)
            .and_then(|prices| prices.get(instance_type))
            .copied()
            .unwrap_or(FALLBACK_INSTANCE_RATE)
    }

    pub fn storage_rate(&self, region: &str) -> f64 {
        self.storage
            .get(region)
            .copied()
            .unwrap_or(FALLBACK_STORAGE_RATE)
    }

    pub fn transfer_rate(&self, region: &str) -> f64 {
        self.transfer
            .get(region)
            .copied()
            .unwrap_or(FALLBACK_TRANSFER_RATE)
    }

    pub fn marketplace_rate(&self) -> f64 {
        self.marketplace_rate
    }
}

/// Estimation parameters
#[derive(Debug, Clone)]
pub struct CostConfig {
    pub instance_type: String,
    pub image_size_gb: f64,
    pub image_setup: Duration,
    pub marketplace_setup: Duration,
    /// Script setup used by strategy comparisons
    pub typical_script_setup: Duration,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            instance_type: "t4g.medium".to_string(),
            image_size_gb: 8.0,
            image_setup: Duration::from_secs(30),
            marketplace_setup: Duration::from_secs(45),
            typical_script_setup: Duration::from_secs(6 * 60),
        }
    }
}

/// Deployment approaches compared by [`CostEstimator::compare_deployment_costs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStrategy {
    Ami,
    Script,
    Marketplace,
}

/// Computes hourly and setup costs for image and script provisioning
#[derive(Debug, Clone, Default)]
pub struct CostEstimator {
    pricing: PricingTable,
    config: CostConfig,
}

impl CostEstimator {
    pub fn new(pricing: PricingTable, config: CostConfig) -> Self {
        Self { pricing, config }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    fn base_rate(&self, region: &str) -> f64 {
        self.pricing.instance_rate(&self.config.instance_type, region)
    }

    /// Monthly storage cost of one image
    fn monthly_storage(&self, region: &str) -> f64 {
        self.pricing.storage_rate(region) * self.config.image_size_gb
    }

    /// Hourly storage cost of one image
    pub fn hourly_storage_cost(&self, region: &str) -> f64 {
        self.monthly_storage(region) / HOURS_PER_MONTH
    }

    /// Hourly cost of running from `image`
    pub fn estimate_image_cost(&self, image: &ImageInfo, region: &str) -> f64 {
        self.base_rate(region) + self.hourly_storage_cost(region) + image.marketplace_cost.max(0.0)
    }

    /// Compare image-based and script-based provisioning
    pub fn analyze(
        &self,
        template_name: &str,
        region: &str,
        image: &ImageInfo,
        script_setup: Duration,
    ) -> CostAnalysis {
        let base = self.base_rate(region);
        let hourly_storage = self.hourly_storage_cost(region);

        let ami_launch_cost = self.estimate_image_cost(image, region);
        let ami_setup_cost = base * self.config.image_setup.as_secs_f64() / 3600.0;
        let script_launch_cost = base;
        let script_minutes = script_setup.as_secs_f64() / 60.0;
        let script_setup_cost = base * script_minutes / 60.0;

        let savings = |hours: f64| {
            (script_setup_cost + script_launch_cost * hours) - (ami_setup_cost + ami_launch_cost * hours)
        };
        let cost_savings_1h = savings(1.0);
        let cost_savings_8h = savings(8.0);

        let break_even_point = if hourly_storage <= 0.0 {
            0.0
        } else {
            (script_setup_cost - ami_setup_cost) / hourly_storage
        };

        let script_setup_time = script_setup.as_secs() / 60;
        let time_savings = script_setup_time.saturating_sub(self.config.image_setup.as_secs() / 60);
        let (recommendation, reasoning) = recommend(cost_savings_1h, cost_savings_8h, time_savings);

        CostAnalysis {
            template_name: template_name.to_string(),
            region: region.to_string(),
            ami_launch_cost,
            ami_storage_cost: self.monthly_storage(region),
            ami_setup_cost,
            script_launch_cost,
            script_setup_cost,
            script_setup_time,
            break_even_point,
            cost_savings_1h,
            cost_savings_8h,
            time_savings,
            recommendation,
            reasoning: reasoning.to_string(),
        }
    }

    /// Total cost of running `hours` under each strategy
    pub fn compare_deployment_costs(
        &self,
        strategies: &[DeploymentStrategy],
        hours: f64,
        region: &str,
    ) -> BTreeMap<DeploymentStrategy, f64> {
        let base = self.base_rate(region);
        let runtime = base * hours;

        strategies
            .iter()
            .map(|strategy| {
                let total = match strategy {
                    DeploymentStrategy::Ami => {
                        let setup = base * self.config.image_setup.as_secs_f64() / 3600.0;
                        setup + runtime + self.hourly_storage_cost(region) * hours
                    }
                    DeploymentStrategy::Script => {
                        let setup = base * self.config.typical_script_setup.as_secs_f64() / 3600.0;
                        setup + runtime
                    }
                    DeploymentStrategy::Marketplace => {
                        let setup = base * self.config.marketplace_setup.as_secs_f64() / 3600.0;
                        setup + (base + self.pricing.marketplace_rate()) * hours
                    }
                };
                (*strategy, total)
            })
            .collect()
    }

    /// Transfer cost plus one prorated hour of storage in the target region.
    ///
    /// `size_gb` defaults to the average image size.
    pub fn estimate_cross_region_cost(
        &self,
        size_gb: Option<f64>,
        source_region: &str,
        target_region: &str,
    ) -> f64 {
        let size = size_gb
            .filter(|s| *s > 0.0)
            .unwrap_or(self.config.image_size_gb);
        self.pricing.transfer_rate(source_region) * size
            + self.pricing.storage_rate(target_region) * size / HOURS_PER_MONTH
    }
}

fn recommend(savings_1h: f64, savings_8h: f64, minutes_saved: u64) -> (Recommendation, &'static str) {
    if savings_1h > 0.01 {
        if minutes_saved > 3 {
            return (
                Recommendation::AmiRecommended,
                "Image provides significant time and cost savings",
            );
        }
        return (
            Recommendation::AmiRecommended,
            "Image provides cost savings and faster deployment",
        );
    }

    if savings_8h < -0.05 {
        return (
            Recommendation::ScriptRecommended,
            "Script provisioning is more cost-effective for longer sessions",
        );
    }

    if minutes_saved >= 3 {
        return (
            Recommendation::AmiRecommended,
            "Image saves several minutes of setup for a negligible cost difference",
        );
    }

    (
        Recommendation::Neutral,
        "Image and script provisioning have similar cost and time profiles",
    )
}
