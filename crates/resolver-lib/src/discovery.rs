//! Latest-image discovery through the provider's public parameter store
//!
//! Distribution vendors publish the id of their newest image under a
//! well-known parameter path per region. Families without such a path get no
//! lookup at all, and callers fall back to a static id.

use crate::error::{DiscoveryError, ProviderError};
use crate::models::Architecture;
use crate::provider::ParameterStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// (distro, version) pairs looked up when warming the cache
pub const WELL_KNOWN_RELEASES: &[(&str, &str)] = &[
    ("ubuntu", "24.04"),
    ("ubuntu", "22.04"),
    ("ubuntu", "20.04"),
    ("amazonlinux", "2023"),
    ("amazonlinux", "2"),
    ("debian", "12"),
    ("debian", "11"),
];

const ARCHITECTURES: [Architecture; 2] = [Architecture::X86_64, Architecture::Arm64];

/// Where an image id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    Discovered,
    Static,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoverySource::Discovered => f.write_str("discovered"),
            DiscoverySource::Static => f.write_str("static"),
        }
    }
}

/// One image found by bulk discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredImage {
    pub distro: String,
    pub version: String,
    pub region: String,
    pub architecture: Architecture,
    pub image_id: String,
}

/// Parameter-store path for a release, `None` for unsupported families
pub fn parameter_path(distro: &str, version: &str, arch: Architecture) -> Option<String> {
    let arch = match arch {
        Architecture::X86_64 => "amd64",
        Architecture::Arm64 => "arm64",
    };

    match distro {
        "ubuntu" => Some(format!(
            "/aws/service/canonical/ubuntu/server/{}/stable/current/{}/hvm/ebs-gp3/ami-id",
            version, arch
        )),
        "amazonlinux" => match version {
            "2023" => Some(format!(
                "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-default-{}",
                arch
            )),
            "2" => Some(format!(
                "/aws/service/ami-amazon-linux-latest/amzn2-ami-kernel-5.10-hvm-{}-gp2",
                arch
            )),
            _ => None,
        },
        "debian" => Some(format!("/aws/service/debian/release/{}/latest/{}", version, arch)),
        // rocky, rhel and alpine publish no parameters
        _ => None,
    }
}

/// Every path queried for the well-known releases, keyed by `distro-version`
pub fn parameter_paths() -> BTreeMap<String, Vec<String>> {
    WELL_KNOWN_RELEASES
        .iter()
        .map(|(distro, version)| {
            let paths = ARCHITECTURES
                .iter()
                .filter_map(|arch| parameter_path(distro, version, *arch))
                .collect();
            (format!("{}-{}", distro, version), paths)
        })
        .collect()
}

/// Looks up latest-image ids in the parameter store
#[derive(Clone)]
pub struct ImageDiscovery {
    store: Arc<dyn ParameterStore>,
}

impl ImageDiscovery {
    pub fn new(store: Arc<dyn ParameterStore>) -> Self {
        Self { store }
    }

    /// Latest published image id.
    ///
    /// `Ok(None)` when the family has no path or nothing is published;
    /// errors only on transport failure.
    pub async fn lookup(
        &self,
        distro: &str,
        version: &str,
        region: &str,
        arch: Architecture,
    ) -> Result<Option<String>, ProviderError> {
        let Some(path) = parameter_path(distro, version, arch) else {
            debug!(distro = %distro, version = %version, "No parameter path for distro");
            return Ok(None);
        };

        let value = self.store.get_parameter(region, &path).await?;
        Ok(value.filter(|id| !id.is_empty()))
    }

    /// Discovery first, then the static id
    pub async fn lookup_with_fallback(
        &self,
        distro: &str,
        version: &str,
        region: &str,
        arch: Architecture,
        static_fallback: Option<&str>,
    ) -> Result<(String, DiscoverySource), DiscoveryError> {
        match self.lookup(distro, version, region, arch).await {
            Ok(Some(id)) => return Ok((id, DiscoverySource::Discovered)),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    distro = %distro,
                    version = %version,
                    region = %region,
                    arch = %arch,
                    error = %e,
                    "Image discovery failed, using static fallback"
                );
            }
        }

        match static_fallback.filter(|id| !id.is_empty()) {
            Some(id) => Ok((id.to_string(), DiscoverySource::Static)),
            None => Err(DiscoveryError::NoImage {
                distro: distro.to_string(),
                version: version.to_string(),
                region: region.to_string(),
                arch: arch.to_string(),
            }),
        }
    }

    /// Look up every well-known release in `region`; misses are skipped
    pub async fn bulk_discover(&self, region: &str) -> Vec<DiscoveredImage> {
        let mut found = Vec::new();

        for (distro, version) in WELL_KNOWN_RELEASES {
            for arch in ARCHITECTURES {
                match self.lookup(distro, version, region, arch).await {
                    Ok(Some(image_id)) => found.push(DiscoveredImage {
                        distro: distro.to_string(),
                        version: version.to_string(),
                        region: region.to_string(),
                        architecture: arch,
                        image_id,
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        debug!(distro = %distro, version = %version, arch = %arch, error = %e, "Bulk discovery lookup failed");
                    }
                }
            }
        }

        found
    }
}
