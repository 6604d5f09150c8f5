//! Image resolver daemon
//!
//! Loads workload templates and an image inventory, then serves image
//! resolution, cost analysis and discovery over HTTP.

use anyhow::{Context, Result};
use image_resolverd::{api, config::ResolverdConfig};
use resolver_lib::{
    health::{components, HealthRegistry},
    provider::Inventory,
    DirectoryCatalog, ImageCache, ImageDiscovery, ImageResolver,
    ImageResolverBuilder, InMemoryCatalog, InMemoryImageProvider, InMemoryParameterStore,
    ResolverMetrics, StructuredLogger, TemplateCatalog,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const RESOLVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting image-resolverd");

    let config = ResolverdConfig::load()?;
    info!(region = %config.region, port = config.api_port, "Resolver configured");

    let health_registry = HealthRegistry::new();
    for component in [components::CATALOG, components::PROVIDER, components::CACHE, components::DISCOVERY] {
        health_registry.register(component).await;
    }

    let catalog: Arc<dyn TemplateCatalog> = match DirectoryCatalog::load(&config.template_dir) {
        Ok(catalog) => {
            health_registry
                .record_catalog_size(catalog.names().len())
                .await;
            Arc::new(catalog)
        }
        Err(e) => {
            warn!(dir = %config.template_dir.display(), error = %e, "Failed to load templates");
            health_registry
                .set_unhealthy(components::CATALOG, e.to_string())
                .await;
            Arc::new(InMemoryCatalog::new())
        }
    };

    let inventory = match &config.inventory_path {
        Some(path) => Inventory::load(path)?,
        None => {
            health_registry
                .set_degraded(components::PROVIDER, "No image inventory configured")
                .await;
            Inventory::default()
        }
    };
    let provider = Arc::new(InMemoryImageProvider::from_inventory(&inventory));
    let store = Arc::new(InMemoryParameterStore::from_inventory(&inventory));

    let cache = Arc::new(ImageCache::with_config(config.cache_config()));
    let resolver = Arc::new(
        ImageResolverBuilder::new()
            .provider(provider)
            .catalog(catalog.clone())
            .cache(cache.clone())
            .config(config.resolver_config())
            .build()
            .context("Failed to build resolver")?,
    );
    let discovery = ImageDiscovery::new(store);

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(RESOLVER_VERSION, &config.region, catalog.names().len());

    let sweep = cache.start_cleanup(config.sweep_interval());

    if config.warm_cache {
        let warmed = warm_cache(&resolver, &discovery, &config.region).await;
        info!(region = %config.region, images = warmed, "Warmed image cache");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reporter = tokio::spawn(report_cache_health(
        resolver.clone(),
        health_registry.clone(),
        config.sweep_interval(),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(
        resolver,
        discovery,
        health_registry.clone(),
        config.region.clone(),
    ));

    // Mark resolver as ready after initialization
    health_registry.set_ready(true).await;

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = server_shutdown.recv().await;
    }));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    let _ = shutdown_tx.send(());
    sweep.stop().await;
    let _ = reporter.await;
    server.await.context("API server task failed")??;

    info!("Shutdown complete");
    Ok(())
}

/// Cache the images discovered for every well-known release in `region`
async fn warm_cache(resolver: &ImageResolver, discovery: &ImageDiscovery, region: &str) -> usize {
    let discovered = discovery.bulk_discover(region).await;
    resolver
        .warm_cache(discovered.iter().map(|found| found.image_id.as_str()), region)
        .await
}

/// Mirror cache statistics into the health registry and metrics
async fn report_cache_health(
    resolver: Arc<ImageResolver>,
    health_registry: HealthRegistry,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let metrics = ResolverMetrics::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = resolver.cache_stats();
                metrics.set_cache_stats(&stats);
                health_registry.record_cache_stats(&stats).await;
            }
            _ = shutdown.recv() => break,
        }
    }
}
