//! Image resolution library for cloud workstations
//!
//! This crate provides the core functionality for:
//! - Tiered resolution of workload templates to machine images
//! - A TTL/LRU image cache with background sweeping
//! - Latest-image discovery through the provider parameter store
//! - Cost estimation for image versus script provisioning
//! - Health checks and observability

pub mod cache;
pub mod cost;
pub mod discovery;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod provider;
pub mod region;
pub mod resolver;
pub mod template;

pub use cache::{CacheConfig, CacheStats, CleanupHandle, ImageCache};
pub use cost::{CostConfig, CostEstimator, DeploymentStrategy, PricingTable};
pub use discovery::{DiscoveredImage, DiscoverySource, ImageDiscovery};
pub use error::{CatalogError, DiscoveryError, ProviderError, ResolverError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ResolverMetrics, StructuredLogger};
pub use provider::{CloudImageProvider, InMemoryImageProvider, InMemoryParameterStore, ParameterStore};
pub use region::RegionFallbackMap;
pub use resolver::{CopyPolicy, ImageResolver, ImageResolverBuilder, ResolverConfig};
pub use template::{
    DirectoryCatalog, InMemoryCatalog, TemplateCatalog, TemplateValidator, WorkloadTemplate,
};
