//! API client for the image resolver daemon

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// Error returned by the daemon for a non-2xx response
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

/// API client for the image resolver daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            // Error routes answer {"error": "..."}; anything else is shown raw
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ApiError { status, message }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn resolve(&self, template: &str, region: Option<&str>) -> Result<ResolutionSummary> {
        self.get(&resolution_path("resolve", template, region, false)).await
    }

    /// Full resolution result including the image record
    pub async fn resolve_details(
        &self,
        template: &str,
        region: Option<&str>,
    ) -> Result<serde_json::Value> {
        self.get(&resolution_path("resolve", template, region, true)).await
    }

    pub async fn preview(&self, template: &str, region: Option<&str>) -> Result<ResolutionSummary> {
        self.get(&resolution_path("preview", template, region, false)).await
    }

    pub async fn costs(&self, template: &str, region: Option<&str>) -> Result<CostAnalysis> {
        let mut path = format!("api/v1/images/costs/{}", template);
        if let Some(region) = region {
            path.push_str(&format!("?region={}", region));
        }
        self.get(&path).await
    }

    pub async fn test_availability(
        &self,
        template: &str,
        regions: Vec<String>,
    ) -> Result<AvailabilityReport> {
        let request = AvailabilityRequest {
            template_name: template.to_string(),
            regions,
        };
        self.post("api/v1/images/test", &request).await
    }

    pub async fn discover(&self, query: &DiscoverQuery<'_>) -> Result<DiscoverResponse> {
        let mut url = self
            .base_url
            .join("api/v1/images/discover")
            .context("Invalid path")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("distro", query.distro);
            pairs.append_pair("version", query.version);
            if let Some(arch) = query.arch {
                pairs.append_pair("arch", arch);
            }
            if let Some(region) = query.region {
                pairs.append_pair("region", region);
            }
            if let Some(fallback) = query.fallback {
                pairs.append_pair("fallback", fallback);
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.get("api/v1/images/cache/stats").await
    }

    pub async fn cache_clear(&self) -> Result<ClearResponse> {
        self.post("api/v1/images/cache/clear", &serde_json::json!({}))
            .await
    }

    pub async fn cache_invalidate(&self, region: &str) -> Result<InvalidateResponse> {
        let request = InvalidateRequest {
            region: region.to_string(),
        };
        self.post("api/v1/images/cache/invalidate", &request).await
    }

    pub async fn cache_cleanup(&self) -> Result<CleanupResponse> {
        self.post("api/v1/images/cache/cleanup", &serde_json::json!({}))
            .await
    }
}

fn resolution_path(action: &str, template: &str, region: Option<&str>, details: bool) -> String {
    let mut params = Vec::new();
    if let Some(region) = region {
        params.push(format!("region={}", region));
    }
    if details {
        params.push("details=true".to_string());
    }

    let mut path = format!("api/v1/images/{}/{}", action, template);
    if !params.is_empty() {
        path.push('?');
        path.push_str(&params.join("&"));
    }
    path
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub template: String,
    pub target_region: String,
    #[serde(default)]
    pub image_id: Option<String>,
    pub resolution_method: String,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    pub launch_time_secs: u64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub source_region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub template_name: String,
    pub region: String,
    pub ami_launch_cost: f64,
    pub ami_storage_cost: f64,
    pub ami_setup_cost: f64,
    pub script_launch_cost: f64,
    pub script_setup_cost: f64,
    pub script_setup_time: u64,
    pub break_even_point: f64,
    pub cost_savings_1h: f64,
    pub cost_savings_8h: f64,
    pub time_savings: u64,
    pub recommendation: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub template_name: String,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub image_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionAvailability {
    pub region: String,
    pub status: String,
    #[serde(default)]
    pub resolution_method: Option<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub template_name: String,
    pub overall_status: String,
    pub regions: Vec<RegionAvailability>,
    pub tested_at: String,
    pub total_regions: usize,
    pub available_regions: usize,
}

/// Parameters of a discovery lookup
#[derive(Debug, Default)]
pub struct DiscoverQuery<'a> {
    pub distro: &'a str,
    pub version: &'a str,
    pub arch: Option<&'a str>,
    pub region: Option<&'a str>,
    pub fallback: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub distro: String,
    pub version: String,
    pub region: String,
    pub architecture: String,
    pub image_id: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub region: String,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}
