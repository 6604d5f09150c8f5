//! Tests for the tiered resolver
//!
//! These run the full pipeline against the in-memory provider, which can
//! inject region failures, slow calls and slow copies.

use super::*;
use crate::models::{Architecture, ImageInfo, ImageState, Recommendation};
use crate::provider::{InMemoryImageProvider, MarketplaceListing};
use crate::template::{FallbackStrategy, ImageConfig, ImageSearch, InMemoryCatalog, MarketplaceSearch};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};

const OWNER: &str = "123456789012";
const EAST_IMAGE: &str = "ami-0a1b2c3d4e5f60718";
const ARM_IMAGE: &str = "ami-0fedcba9876543210";

fn image(id: &str, region: &str, arch: Architecture) -> ImageInfo {
    let mut image = ImageInfo::new(id, region, arch);
    image.owner = OWNER.to_string();
    image.name = "wsi-python-ml-2024.06".to_string();
    image.creation_date = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    image.launch_time_secs = 45;
    image
}

fn template_with(name: &str, config: ImageConfig) -> WorkloadTemplate {
    let mut template = WorkloadTemplate::new(name);
    template.packages.system = vec!["build-essential".to_string(), "git".to_string()];
    template.packages.pip = vec!["numpy".to_string()];
    template.image_config = Some(config);
    template
}

fn mapping(region: &str, id: &str) -> ImageConfig {
    ImageConfig {
        image_mappings: BTreeMap::from([(region.to_string(), id.to_string())]),
        ..Default::default()
    }
}

fn search_config() -> ImageConfig {
    ImageConfig {
        image_search: Some(ImageSearch {
            owner: OWNER.to_string(),
            name_pattern: "wsi-python-ml-*".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

struct Fixture {
    provider: Arc<InMemoryImageProvider>,
    resolver: ImageResolver,
}

fn fixture_with(templates: Vec<WorkloadTemplate>, configure: impl FnOnce(ImageResolverBuilder) -> ImageResolverBuilder) -> Fixture {
    let provider = Arc::new(InMemoryImageProvider::new());
    let catalog = Arc::new(InMemoryCatalog::with_templates(templates));
    let builder = ImageResolverBuilder::new()
        .provider(provider.clone())
        .catalog(catalog)
        .copy_policy(CopyPolicy {
            poll_interval: Duration::from_millis(1),
            max_attempts: 5,
        });

    let resolver = configure(builder).build().unwrap();
    Fixture { provider, resolver }
}

fn fixture() -> Fixture {
    fixture_with(Vec::new(), |builder| builder)
}

#[cfg(test)]
mod strategy_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_image_config_uses_script_without_touching_cache() {
        let f = fixture();
        let mut template = WorkloadTemplate::new("plain-scripts");
        template.packages.system = vec!["gcc".to_string()];
        template.packages.conda = vec!["r-base".to_string()];
        template.packages.pip = vec!["jupyter".to_string()];

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::FallbackScript);
        assert_eq!(result.warning.as_deref(), Some(NO_IMAGE_CONFIG_WARNING));
        // 3 min + 10 s + 20 s + 5 s
        assert_eq!(result.launch_time, Duration::from_secs(215));
        assert!(result.fallback_chain.is_empty());

        let stats = f.resolver.cache_stats();
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(stats.size, 0);
        assert_eq!(f.provider.describe_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_image_config_counts_as_absent() {
        let f = fixture();
        let template = template_with("empty-config", ImageConfig::default());

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert!(result.is_script_fallback());
        assert_eq!(result.warning.as_deref(), Some(NO_IMAGE_CONFIG_WARNING));
    }

    #[tokio::test]
    async fn test_required_failure_carries_full_chain() {
        let f = fixture();
        let mut config = mapping("us-east-1", EAST_IMAGE);
        config.strategy = Some(ResolutionStrategy::AmiRequired);
        let template = template_with("required", config);

        let err = f.resolver.resolve(&template, "us-east-1").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "image required but not available in region us-east-1: attempted [direct_mapping, dynamic_search, marketplace_search, cross_region_search]"
        );
        assert_eq!(err.fallback_chain().map(|c| c.len()), Some(4));
    }

    #[tokio::test]
    async fn test_preferred_failure_falls_back_with_warning() {
        let f = fixture();
        let template = template_with("preferred", mapping("us-east-1", EAST_IMAGE));

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert!(result.is_script_fallback());
        assert_eq!(result.warning.as_deref(), Some(IMAGE_UNAVAILABLE_WARNING));
        assert_eq!(result.fallback_chain.len(), 4);
        assert_eq!(result.launch_time, template.script_setup_estimate());
        assert!(result.image.is_none());
    }

    #[tokio::test]
    async fn test_fallback_strategy_prefers_scripts_when_available() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));

        let mut config = mapping("us-east-1", EAST_IMAGE);
        config.strategy = Some(ResolutionStrategy::AmiFallback);
        let mut template = template_with("fallback", config);
        template.package_manager = Some("conda".to_string());

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert!(result.is_script_fallback());
        assert!(result.warning.is_none());
        assert!(result.fallback_chain.is_empty());
        assert_eq!(f.provider.describe_calls(), 0);

        // Declaring "ami" leaves no script path
        template.package_manager = Some("ami".to_string());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.resolution_method, ResolutionMethod::DirectMapping);
        assert_eq!(result.warning.as_deref(), Some(SCRIPT_UNAVAILABLE_WARNING));
    }

    #[tokio::test]
    async fn test_fallback_strategy_without_any_path_is_an_error() {
        let f = fixture();
        let mut config = mapping("us-east-1", EAST_IMAGE);
        config.strategy = Some(ResolutionStrategy::AmiFallback);
        let template = template_with("fallback", config);

        let err = f.resolver.resolve(&template, "us-east-1").await.unwrap_err();
        assert!(matches!(err, ResolverError::NoProvisioningPath { .. }));
        assert_eq!(err.fallback_chain().map(|c| c.len()), Some(4));
    }

    #[tokio::test]
    async fn test_invalid_template_is_rejected_before_any_provider_call() {
        let f = fixture();
        let mut config = mapping("us-east-1", "ami-xyz");
        config.image_search = Some(ImageSearch::default());
        let template = template_with("broken", config);

        let err = f.resolver.resolve(&template, "us-east-1").await.unwrap_err();
        match err {
            ResolverError::InvalidTemplate { template, errors } => {
                assert_eq!(template, "broken");
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"image_config.image_mappings.us-east-1"));
                assert!(fields.contains(&"image_config.image_search.owner"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(f.provider.describe_calls(), 0);
        assert_eq!(f.provider.search_calls(), 0);
    }
}

#[cfg(test)]
mod tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_mapping_success_sets_cost_and_launch_time() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let template = template_with("mapped", mapping("us-east-1", EAST_IMAGE));

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::DirectMapping);
        assert_eq!(result.image_id(), Some(EAST_IMAGE));
        assert_eq!(result.fallback_chain, vec!["direct_mapping".to_string()]);
        assert_eq!(result.launch_time, Duration::from_secs(45));
        assert!(result.estimated_cost > 0.0);
        assert!(result.warning.is_none());
    }

    #[tokio::test]
    async fn test_validated_images_are_served_from_cache() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let template = template_with("mapped", mapping("us-east-1", EAST_IMAGE));

        f.resolver.resolve(&template, "us-east-1").await.unwrap();
        f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(f.provider.describe_calls(), 1);
        let stats = f.resolver.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_unusable_image_fails_direct_mapping() {
        let f = fixture();
        let mut deregistered = image(EAST_IMAGE, "us-east-1", Architecture::Arm64);
        deregistered.state = ImageState::Deregistered;
        f.provider.insert_image(deregistered);
        let template = template_with("mapped", mapping("us-east-1", EAST_IMAGE));

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert!(result.is_script_fallback());
        assert!(f.resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cached_image_is_never_served() {
        let f = fixture();
        let mut failed = image(EAST_IMAGE, "us-east-1", Architecture::Arm64);
        failed.state = ImageState::Failed;
        f.resolver.cache().put(EAST_IMAGE, "us-east-1", &failed);
        let template = template_with("mapped", mapping("us-east-1", EAST_IMAGE));

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert!(result.is_script_fallback());
        assert!(f.resolver.cache().get(EAST_IMAGE, "us-east-1").is_none());
    }

    #[tokio::test]
    async fn test_stale_cached_state_is_described_again() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let mut stale = image(EAST_IMAGE, "us-east-1", Architecture::Arm64);
        stale.state = ImageState::Deregistered;
        f.resolver.cache().put(EAST_IMAGE, "us-east-1", &stale);
        let template = template_with("mapped", mapping("us-east-1", EAST_IMAGE));

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::DirectMapping);
        assert_eq!(result.image.as_ref().map(|i| i.state), Some(ImageState::Available));
        assert_eq!(f.provider.describe_calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_fallback_timeout_uses_default_deadline() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let mut config = mapping("us-east-1", EAST_IMAGE);
        config.fallback_timeout = Some("10000000000000000000s".to_string());
        let template = template_with("mapped", config);

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.resolution_method, ResolutionMethod::DirectMapping);
    }

    #[tokio::test]
    async fn test_legacy_table_falls_back_to_other_architecture() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::X86_64));

        let config = ImageConfig {
            images: BTreeMap::from([(
                "us-east-1".to_string(),
                BTreeMap::from([("x86_64".to_string(), EAST_IMAGE.to_string())]),
            )]),
            ..Default::default()
        };
        let template = template_with("legacy", config);

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.resolution_method, ResolutionMethod::DirectMapping);
        assert_eq!(result.image_id(), Some(EAST_IMAGE));
    }

    #[tokio::test]
    async fn test_legacy_table_prefers_preferred_architecture() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::X86_64));
        f.provider
            .insert_image(image(ARM_IMAGE, "us-east-1", Architecture::Arm64));

        let config = ImageConfig {
            images: BTreeMap::from([(
                "us-east-1".to_string(),
                BTreeMap::from([
                    ("x86_64".to_string(), EAST_IMAGE.to_string()),
                    ("arm64".to_string(), ARM_IMAGE.to_string()),
                ]),
            )]),
            ..Default::default()
        };
        let template = template_with("legacy", config.clone());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.image_id(), Some(ARM_IMAGE));

        let mut x86 = config;
        x86.preferred_architecture = Some(Architecture::X86_64);
        let template = template_with("legacy-x86", x86);
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.image_id(), Some(EAST_IMAGE));
    }

    #[tokio::test]
    async fn test_dynamic_search_merges_version_and_explicit_tags() {
        let f = fixture();
        let mut tagged = image(EAST_IMAGE, "us-east-1", Architecture::Arm64);
        tagged.tags = HashMap::from([
            ("Version".to_string(), "3.0".to_string()),
            ("Team".to_string(), "ml".to_string()),
        ]);
        f.provider.insert_image(tagged);

        let config = ImageConfig {
            image_search: Some(ImageSearch {
                owner: OWNER.to_string(),
                name_pattern: "wsi-python-ml-*".to_string(),
                version_tag: Some("2.1".to_string()),
                architectures: vec!["arm64".to_string()],
                min_creation_date: Some("2024-01-01".to_string()),
                required_tags: HashMap::from([
                    ("Version".to_string(), "3.0".to_string()),
                    ("Team".to_string(), "ml".to_string()),
                ]),
            }),
            ..Default::default()
        };
        let template = template_with("searched", config);

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.resolution_method, ResolutionMethod::DynamicSearch);
        assert_eq!(
            result.fallback_chain,
            vec!["direct_mapping".to_string(), "dynamic_search".to_string()]
        );

        let searches = f.provider.recorded_searches().await;
        assert_eq!(searches.len(), 1);
        let criteria = &searches[0];
        assert_eq!(criteria.required_tags["Version"], "3.0");
        assert_eq!(criteria.required_tags["Team"], "ml");
        assert_eq!(criteria.architectures, vec![Architecture::Arm64]);
        assert!(criteria.min_creation_date.is_some());

        // Search results are written through the cache
        assert!(f.resolver.cache().get(EAST_IMAGE, "us-east-1").is_some());
    }

    #[tokio::test]
    async fn test_marketplace_search_uses_preferred_architecture() {
        let f = fixture();
        let mut listed = image(ARM_IMAGE, "us-east-1", Architecture::Arm64);
        listed.marketplace_cost = 0.05;
        f.provider.insert_listing(MarketplaceListing {
            product_code: "prod-rstudio".to_string(),
            version: "2.1.0".to_string(),
            publisher: "posit".to_string(),
            image: listed,
        });

        let config = ImageConfig {
            marketplace_search: Some(MarketplaceSearch {
                product_code: "prod-rstudio".to_string(),
                version_constraint: Some(">=2.0.0".to_string()),
                publisher: None,
            }),
            ..Default::default()
        };
        let template = template_with("marketplace", config);

        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert_eq!(result.resolution_method, ResolutionMethod::Marketplace);
        assert_eq!(result.image_id(), Some(ARM_IMAGE));

        let plain = f
            .resolver
            .cost_estimator()
            .estimate_image_cost(&image(ARM_IMAGE, "us-east-1", Architecture::Arm64), "us-east-1");
        assert!((result.estimated_cost - plain - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_provider_timeout_fails_tier_but_pipeline_continues() {
        let f = fixture_with(Vec::new(), |builder| {
            builder.provider_timeout(Duration::from_millis(10))
        });
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        f.provider.set_latency(Duration::from_millis(200));

        let template = template_with("slow", mapping("us-east-1", EAST_IMAGE));
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert!(result.is_script_fallback());
        assert_eq!(
            result.fallback_chain,
            vec![
                "direct_mapping".to_string(),
                "dynamic_search".to_string(),
                "marketplace_search".to_string(),
                "cross_region_search".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_every_provider_call() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let template = template_with("late", mapping("us-east-1", EAST_IMAGE));

        let result = f
            .resolver
            .resolve_with_deadline(&template, "us-east-1", Instant::now())
            .await
            .unwrap();

        assert!(result.is_script_fallback());
        assert_eq!(f.provider.describe_calls(), 0);
    }
}

#[cfg(test)]
mod cross_region_tests {
    use super::*;
    use crate::error::ProviderError;

    #[tokio::test]
    async fn test_copy_skips_failing_neighbour() {
        let f = fixture();
        // us-east-1 neighbours: us-east-2, us-west-2, us-west-1
        f.provider
            .insert_image(image("ami-0000000000000000b", "us-east-2", Architecture::Arm64));
        f.provider
            .insert_image(image("ami-0000000000000000c", "us-west-2", Architecture::Arm64));
        f.provider
            .fail_copies_from("us-east-2", ProviderError::CopyFailed("quota exceeded".to_string()));

        let template = template_with("cross", search_config());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::CrossRegion);
        assert_eq!(result.source_region.as_deref(), Some("us-west-2"));
        let warning = result.warning.unwrap();
        assert!(warning.starts_with("Image copied from us-west-2 (additional cost: $"));

        let copied = result.image.unwrap();
        assert_eq!(copied.region, "us-east-1");
        assert_eq!(copied.source_region.as_deref(), Some("us-west-2"));
        assert_eq!(f.provider.copy_calls(), 2);

        // The tier name is recorded once; neighbour tiers stay out of the chain
        assert_eq!(result.fallback_chain.len(), 4);
        assert!(f.resolver.cache().get(&copied.image_id, "us-east-1").is_some());
    }

    #[tokio::test]
    async fn test_copy_waits_for_pending_image() {
        let f = fixture();
        f.provider
            .insert_image(image("ami-0000000000000000b", "us-east-2", Architecture::Arm64));
        f.provider.set_copy_pending_polls(2);

        let template = template_with("cross", search_config());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::CrossRegion);
        let copied = result.image.unwrap();
        assert_eq!(copied.state, ImageState::Available);
        assert_eq!(f.provider.describe_calls(), 3);
    }

    #[tokio::test]
    async fn test_slow_copy_moves_to_next_neighbour() {
        let f = fixture_with(Vec::new(), |builder| {
            builder.copy_policy(CopyPolicy {
                poll_interval: Duration::from_millis(1),
                max_attempts: 1,
            })
        });
        f.provider
            .insert_image(image("ami-0000000000000000b", "us-east-2", Architecture::Arm64));
        f.provider.set_copy_pending_polls(5);

        let template = template_with("cross", search_config());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();

        assert!(result.is_script_fallback());
        assert_eq!(result.warning.as_deref(), Some(IMAGE_UNAVAILABLE_WARNING));
        assert_eq!(f.provider.copy_calls(), 1);
    }

    #[tokio::test]
    async fn test_preview_never_copies() {
        let f = fixture();
        f.provider
            .insert_image(image("ami-0000000000000000c", "us-west-2", Architecture::Arm64));

        let template = template_with("cross", search_config());
        let result = f.resolver.preview(&template, "us-east-1").await.unwrap();

        assert_eq!(result.resolution_method, ResolutionMethod::CrossRegion);
        assert_eq!(result.source_region.as_deref(), Some("us-west-2"));
        assert!(result.warning.unwrap().contains("would be copied from us-west-2"));
        assert_eq!(result.image.unwrap().region, "us-west-2");
        assert_eq!(f.provider.copy_calls(), 0);
    }

    #[tokio::test]
    async fn test_cross_region_disabled_by_fallback_strategy() {
        for strategy in [FallbackStrategy::ScriptProvisioning, FallbackStrategy::Error] {
            let f = fixture();
            f.provider
                .insert_image(image("ami-0000000000000000c", "us-west-2", Architecture::Arm64));

            let mut config = search_config();
            config.fallback_strategy = Some(strategy);
            let template = template_with("local-only", config);

            let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
            assert!(result.is_script_fallback());
            assert_eq!(result.fallback_chain.last().map(String::as_str), Some("cross_region_search"));
            assert_eq!(f.provider.copy_calls(), 0);
            // Only the local search ran
            assert_eq!(f.provider.search_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_region_has_no_neighbours() {
        let isolated: &[&str] = &[];
        let regions = Arc::new(RegionFallbackMap::from_pairs(&[("us-east-1", isolated)]));
        let f = fixture_with(Vec::new(), |builder| builder.regions(regions));
        f.provider
            .insert_image(image("ami-0000000000000000c", "us-west-2", Architecture::Arm64));

        let template = template_with("cross", search_config());
        let result = f.resolver.resolve(&template, "us-east-1").await.unwrap();
        assert!(result.is_script_fallback());
        assert_eq!(f.provider.search_calls(), 1);
    }
}

#[cfg(test)]
mod catalog_tests {
    use super::*;

    fn catalog_templates() -> Vec<WorkloadTemplate> {
        let mut required = mapping("us-east-1", EAST_IMAGE);
        required.strategy = Some(ResolutionStrategy::AmiRequired);
        required.fallback_strategy = Some(FallbackStrategy::Error);

        let mut local = mapping("us-east-1", EAST_IMAGE);
        local.fallback_strategy = Some(FallbackStrategy::Error);

        vec![
            template_with("python-ml", local),
            template_with("gpu-required", required),
        ]
    }

    #[tokio::test]
    async fn test_unknown_template() {
        let f = fixture_with(catalog_templates(), |builder| builder);
        let err = f
            .resolver
            .resolve_by_name("does-not-exist", "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::TemplateNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_and_preview_by_name() {
        let f = fixture_with(catalog_templates(), |builder| builder);
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));

        let resolved = f.resolver.resolve_by_name("python-ml", "us-east-1").await.unwrap();
        let previewed = f.resolver.preview_by_name("python-ml", "us-east-1").await.unwrap();
        assert_eq!(resolved.image_id(), previewed.image_id());
    }

    #[tokio::test]
    async fn test_analyze_with_image() {
        let f = fixture_with(catalog_templates(), |builder| builder);
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));

        let analysis = f.resolver.analyze("python-ml", "us-east-1").await.unwrap();
        assert_eq!(analysis.template_name, "python-ml");
        assert!(analysis.ami_launch_cost > analysis.script_launch_cost);
        assert!(analysis.ami_storage_cost > 0.0);
    }

    #[tokio::test]
    async fn test_analyze_strategy_violation_is_script_only() {
        let f = fixture_with(catalog_templates(), |builder| builder);

        let analysis = f.resolver.analyze("gpu-required", "us-east-1").await.unwrap();
        assert_eq!(analysis.recommendation, Recommendation::ScriptRecommended);
        assert_eq!(analysis.ami_launch_cost, 0.0);
    }

    #[tokio::test]
    async fn test_availability_report() {
        let f = fixture_with(catalog_templates(), |builder| builder);
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));

        let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let report = f.resolver.test_availability("python-ml", &regions).await.unwrap();

        assert_eq!(report.overall_status, AvailabilityStatus::Partial);
        assert_eq!(report.total_regions, 2);
        assert_eq!(report.available_regions, 1);
        assert_eq!(report.regions[1].status, AvailabilityStatus::Failed);

        let report = f.resolver.test_availability("gpu-required", &[]).await.unwrap();
        assert_eq!(report.total_regions, 4);
        assert_eq!(report.overall_status, AvailabilityStatus::Failed);
        assert!(report.regions[0].error.as_deref().unwrap().contains("image required"));
    }

    #[tokio::test]
    async fn test_cache_pass_throughs() {
        let f = fixture_with(catalog_templates(), |builder| builder);
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        f.resolver.resolve_by_name("python-ml", "us-east-1").await.unwrap();

        assert_eq!(f.resolver.cleanup_expired(), 0);
        assert_eq!(f.resolver.invalidate_region("eu-west-1"), 0);
        assert_eq!(f.resolver.invalidate_region("us-east-1"), 1);

        f.resolver.resolve_by_name("python-ml", "us-east-1").await.unwrap();
        f.resolver.clear_cache();
        let stats = f.resolver.cache_stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[tokio::test]
    async fn test_warm_cache_skips_unusable_images() {
        let f = fixture();
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        let mut failed = image(ARM_IMAGE, "us-east-1", Architecture::Arm64);
        failed.state = ImageState::Failed;
        f.provider.insert_image(failed);

        let warmed = f
            .resolver
            .warm_cache([EAST_IMAGE, ARM_IMAGE, "ami-00000000000000000"], "us-east-1")
            .await;

        assert_eq!(warmed, 1);
        assert!(f.resolver.cache().get(EAST_IMAGE, "us-east-1").is_some());
        assert!(f.resolver.cache().get(ARM_IMAGE, "us-east-1").is_none());
    }

    #[tokio::test]
    async fn test_warm_cache_is_bounded_by_provider_timeout() {
        let f = fixture_with(Vec::new(), |builder| {
            builder.provider_timeout(Duration::from_millis(10))
        });
        f.provider
            .insert_image(image(EAST_IMAGE, "us-east-1", Architecture::Arm64));
        f.provider.set_latency(Duration::from_secs(60));

        let started = std::time::Instant::now();
        let warmed = f.resolver.warm_cache([EAST_IMAGE], "us-east-1").await;

        assert_eq!(warmed, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(f.resolver.cache().is_empty());
    }
}

#[test]
fn test_builder_requires_provider_and_catalog() {
    assert!(ImageResolverBuilder::new().build().is_err());
    assert!(ImageResolverBuilder::new()
        .catalog(Arc::new(InMemoryCatalog::new()))
        .build()
        .is_err());
}

#[test]
fn test_tier_names_in_pipeline_order() {
    let names: Vec<&str> = Tier::PIPELINE.iter().map(Tier::name).collect();
    assert_eq!(
        names,
        vec!["direct_mapping", "dynamic_search", "marketplace_search", "cross_region_search"]
    );
}
