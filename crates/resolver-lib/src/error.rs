//! Error types for image resolution
//!
//! Tier failures never surface through these types; only strategy
//! violations and malformed template input escape the resolver.

use crate::template::TemplateValidationError;

/// Errors reported by cloud and parameter-store providers
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("image copy failed: {0}")]
    CopyFailed(String),

    #[error("invalid inventory: {0}")]
    InvalidInventory(String),
}

/// Errors loading templates from a catalog
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("failed to read template catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse template {path}: {message}")]
    Parse { path: String, message: String },
}

/// Errors surfaced by the tiered resolver
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template catalog error: {0}")]
    Catalog(CatalogError),

    #[error("invalid image configuration for template {template}: {}", format_validation(.errors))]
    InvalidTemplate {
        template: String,
        errors: Vec<TemplateValidationError>,
    },

    #[error("image required but not available in region {region}: attempted [{}]", .chain.join(", "))]
    ImageRequired { region: String, chain: Vec<String> },

    #[error("neither script provisioning nor an image is available in region {region}: attempted [{}]", .chain.join(", "))]
    NoProvisioningPath { region: String, chain: Vec<String> },
}

impl From<CatalogError> for ResolverError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(name) => ResolverError::TemplateNotFound(name),
            other => ResolverError::Catalog(other),
        }
    }
}

impl ResolverError {
    /// Fallback chain attached to strategy violations
    pub fn fallback_chain(&self) -> Option<&[String]> {
        match self {
            ResolverError::ImageRequired { chain, .. }
            | ResolverError::NoProvisioningPath { chain, .. } => Some(chain),
            _ => None,
        }
    }
}

/// Errors from discovery with static fallback
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no image discovered and no static fallback available for {distro} {version} {region} {arch}")]
    NoImage {
        distro: String,
        version: String,
        region: String,
        arch: String,
    },
}

fn format_validation(errors: &[TemplateValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
