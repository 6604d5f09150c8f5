//! HTTP API for image resolution, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use resolver_lib::{
    health::{ComponentStatus, HealthRegistry},
    Architecture, DiscoverySource, ImageDiscovery, ImageResolver, ResolutionMethod,
    ResolutionResult, ResolverError, ResolverMetrics,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<ImageResolver>,
    pub discovery: ImageDiscovery,
    pub health_registry: HealthRegistry,
    pub metrics: ResolverMetrics,
    /// Region used when a request names none
    pub default_region: String,
}

impl AppState {
    pub fn new(
        resolver: Arc<ImageResolver>,
        discovery: ImageDiscovery,
        health_registry: HealthRegistry,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            discovery,
            health_registry,
            metrics: ResolverMetrics::new(),
            default_region: default_region.into(),
        }
    }

    fn region(&self, requested: Option<String>) -> Result<String, ApiError> {
        match requested {
            Some(region) if region.trim().is_empty() => {
                Err(ApiError::bad_request("region must not be empty"))
            }
            Some(region) => Ok(region),
            None => Ok(self.default_region.clone()),
        }
    }
}

/// Error body returned by every API route
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ResolverError> for ApiError {
    fn from(err: ResolverError) -> Self {
        let status = match &err {
            ResolverError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            ResolverError::InvalidTemplate { .. } => StatusCode::BAD_REQUEST,
            ResolverError::ImageRequired { .. } | ResolverError::NoProvisioningPath { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ResolverError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub region: Option<String>,
    #[serde(default)]
    pub details: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegionQuery {
    pub region: Option<String>,
}

/// Compact resolution response
#[derive(Debug, Serialize)]
pub struct ResolutionSummary {
    pub template: String,
    pub target_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub resolution_method: ResolutionMethod,
    pub fallback_chain: Vec<String>,
    pub launch_time_secs: u64,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_region: Option<String>,
}

impl ResolutionSummary {
    fn new(template: &str, result: ResolutionResult) -> Self {
        Self {
            template: template.to_string(),
            image_id: result.image_id().map(str::to_string),
            target_region: result.target_region,
            resolution_method: result.resolution_method,
            fallback_chain: result.fallback_chain,
            launch_time_secs: result.launch_time.as_secs(),
            estimated_cost: result.estimated_cost,
            warning: result.warning,
            source_region: result.source_region,
        }
    }
}

fn resolution_response(template: &str, result: ResolutionResult, details: bool) -> Response {
    if details {
        Json(result).into_response()
    } else {
        Json(ResolutionSummary::new(template, result)).into_response()
    }
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(template): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    let region = state.region(query.region)?;
    let result = state.resolver.resolve_by_name(&template, &region).await?;
    Ok(resolution_response(&template, result, query.details))
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Path(template): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    let region = state.region(query.region)?;
    let result = state.resolver.preview_by_name(&template, &region).await?;
    Ok(resolution_response(&template, result, query.details))
}

async fn costs(
    State(state): State<Arc<AppState>>,
    Path(template): Path<String>,
    Query(query): Query<RegionQuery>,
) -> Result<Response, ApiError> {
    let region = state.region(query.region)?;
    let analysis = state.resolver.analyze(&template, &region).await?;
    Ok(Json(analysis).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub template_name: String,
    #[serde(default)]
    pub regions: Vec<String>,
}

async fn test_availability(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Response, ApiError> {
    if request.template_name.is_empty() {
        return Err(ApiError::bad_request("template_name is required"));
    }
    let report = state
        .resolver
        .test_availability(&request.template_name, &request.regions)
        .await?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    pub distro: Option<String>,
    pub version: Option<String>,
    pub arch: Option<String>,
    pub region: Option<String>,
    /// Static image id used when nothing is published
    pub fallback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub distro: String,
    pub version: String,
    pub region: String,
    pub architecture: Architecture,
    pub image_id: String,
    pub source: DiscoverySource,
}

async fn discover(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Response, ApiError> {
    let distro = query
        .distro
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::bad_request("distro is required"))?;
    let version = query
        .version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("version is required"))?;
    let architecture = match query.arch.as_deref() {
        Some(arch) => arch.parse::<Architecture>().map_err(ApiError::bad_request)?,
        None => Architecture::default(),
    };
    let region = state.region(query.region)?;

    let (image_id, source) = state
        .discovery
        .lookup_with_fallback(&distro, &version, &region, architecture, query.fallback.as_deref())
        .await
        .map_err(|e| ApiError::not_found(e.to_string()))?;

    if source == DiscoverySource::Static {
        state.metrics.inc_discovery_fallback();
    }

    Ok(Json(DiscoverResponse {
        distro,
        version,
        region,
        architecture,
        image_id,
        source,
    })
    .into_response())
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.resolver.cache_stats())
}

async fn cache_clear(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.resolver.clear_cache();
    info!("Image cache cleared");
    Json(json!({ "cleared": true }))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub region: String,
}

async fn cache_invalidate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Response, ApiError> {
    if request.region.is_empty() {
        return Err(ApiError::bad_request("region is required"));
    }
    let removed = state.resolver.invalidate_region(&request.region);
    info!(region = %request.region, removed = removed, "Invalidated cached images");
    Ok(Json(json!({ "region": request.region, "removed": removed })).into_response())
}

async fn cache_cleanup(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let removed = state.resolver.cleanup_expired();
    Json(json!({ "removed": removed }))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/images/resolve/:template", get(resolve))
        .route("/api/v1/images/preview/:template", get(preview))
        .route("/api/v1/images/costs/:template", get(costs))
        .route("/api/v1/images/test", post(test_availability))
        .route("/api/v1/images/discover", get(discover))
        .route("/api/v1/images/cache/stats", get(cache_stats))
        .route("/api/v1/images/cache/clear", post(cache_clear))
        .route("/api/v1/images/cache/invalidate", post(cache_invalidate))
        .route("/api/v1/images/cache/cleanup", post(cache_cleanup))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
