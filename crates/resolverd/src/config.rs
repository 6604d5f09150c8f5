//! Daemon configuration

use anyhow::{Context, Result};
use resolver_lib::{CacheConfig, CopyPolicy, ResolverConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "RESOLVER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "image-resolverd.toml";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverdConfig {
    /// Instance name attached to log records
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Region used when a request names none
    #[serde(default = "default_region")]
    pub region: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory of workload templates
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// JSON image inventory backing the in-memory provider
    #[serde(default)]
    pub inventory_path: Option<PathBuf>,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,

    /// Interval of the expired-entry sweep
    #[serde(default = "default_cache_sweep_interval")]
    pub cache_sweep_interval_secs: u64,

    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Deadline for templates without a fallback timeout
    #[serde(default = "default_resolution_deadline")]
    pub resolution_deadline_secs: u64,

    #[serde(default = "default_copy_poll_interval")]
    pub copy_poll_interval_secs: u64,

    #[serde(default = "default_copy_max_attempts")]
    pub copy_max_attempts: u32,

    /// Discover well-known images at startup and cache them
    #[serde(default)]
    pub warm_cache: bool,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "image-resolverd".to_string())
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_cache_ttl() -> u64 {
    30 * 60
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_sweep_interval() -> u64 {
    5 * 60
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_resolution_deadline() -> u64 {
    10 * 60
}

fn default_copy_poll_interval() -> u64 {
    15
}

fn default_copy_max_attempts() -> u32 {
    40
}

impl Default for ResolverdConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            region: default_region(),
            api_port: default_api_port(),
            template_dir: default_template_dir(),
            inventory_path: None,
            cache_ttl_secs: default_cache_ttl(),
            cache_max_size: default_cache_max_size(),
            cache_sweep_interval_secs: default_cache_sweep_interval(),
            provider_timeout_secs: default_provider_timeout(),
            resolution_deadline_secs: default_resolution_deadline(),
            copy_poll_interval_secs: default_copy_poll_interval(),
            copy_max_attempts: default_copy_max_attempts(),
            warm_cache: false,
        }
    }
}

impl ResolverdConfig {
    /// Load configuration from the config file and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (optional) with `RESOLVER_*` overrides
    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("RESOLVER"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Invalid resolver configuration")
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache_ttl_secs),
            max_size: self.cache_max_size,
            cleanup_interval: Some(self.sweep_interval()),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            default_deadline: Duration::from_secs(self.resolution_deadline_secs),
            copy_policy: CopyPolicy {
                poll_interval: Duration::from_secs(self.copy_poll_interval_secs),
                max_attempts: self.copy_max_attempts,
            },
            instance: self.instance.clone(),
            ..ResolverConfig::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }
}
