//! Cloud provider interfaces
//!
//! The resolver never talks to a cloud SDK directly. It consumes these
//! traits, which a deployment backs with a real provider client and tests
//! back with the in-memory inventory in [`memory`].

mod memory;

pub use memory::{
    version_satisfies, InMemoryImageProvider, InMemoryParameterStore, Inventory,
    MarketplaceListing,
};

use crate::error::ProviderError;
use crate::models::{Architecture, ImageInfo};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Filters for a dynamic image search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub region: String,
    pub owner: String,
    pub name_pattern: String,
    /// Empty matches any architecture
    pub architectures: Vec<Architecture>,
    pub required_tags: HashMap<String, String>,
    pub min_creation_date: Option<NaiveDate>,
}

/// Filters for a marketplace search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceCriteria {
    pub region: String,
    pub product_code: String,
    pub version_constraint: Option<String>,
    pub publisher: Option<String>,
    pub architecture: Architecture,
}

/// Machine image operations of a cloud provider
#[async_trait]
pub trait CloudImageProvider: Send + Sync {
    /// Look up an image by id; `NotFound` when it does not exist in `region`
    async fn describe_image(&self, image_id: &str, region: &str) -> Result<ImageInfo, ProviderError>;

    /// Newest image matching the criteria, if any
    async fn search_images(&self, criteria: &SearchCriteria) -> Result<Option<ImageInfo>, ProviderError>;

    /// Best marketplace listing matching the criteria, if any
    async fn search_marketplace(
        &self,
        criteria: &MarketplaceCriteria,
    ) -> Result<Option<ImageInfo>, ProviderError>;

    /// Start copying an image to another region.
    ///
    /// The returned image lives in `target_region` and may still be pending.
    async fn copy_image(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
    ) -> Result<ImageInfo, ProviderError>;
}

/// Regional key/value parameter store publishing "latest image" ids
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// `Ok(None)` when the parameter does not exist
    async fn get_parameter(&self, region: &str, path: &str) -> Result<Option<String>, ProviderError>;
}
