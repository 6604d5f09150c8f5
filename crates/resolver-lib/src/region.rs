//! Regional fallback table for cross-region image search

use std::collections::HashMap;

/// Ordered neighbour regions searched when a region has no local image.
///
/// Immutable after construction, so it can be shared across resolutions
/// without locking.
#[derive(Debug, Clone)]
pub struct RegionFallbackMap {
    neighbors: HashMap<String, Vec<String>>,
}

const DEFAULT_FALLBACKS: &[(&str, &[&str])] = &[
    ("us-east-1", &["us-east-2", "us-west-2", "us-west-1"]),
    ("us-east-2", &["us-east-1", "us-west-2", "us-west-1"]),
    ("us-west-1", &["us-west-2", "us-east-1", "us-east-2"]),
    ("us-west-2", &["us-west-1", "us-east-1", "us-east-2"]),
    ("ca-central-1", &["us-east-1", "us-east-2"]),
    ("eu-west-1", &["eu-west-2", "eu-central-1", "us-east-1"]),
    ("eu-west-2", &["eu-west-1", "eu-central-1", "us-east-1"]),
    ("eu-west-3", &["eu-west-1", "eu-west-2", "eu-central-1"]),
    ("eu-central-1", &["eu-west-1", "eu-west-2", "us-east-1"]),
    ("eu-north-1", &["eu-west-1", "eu-central-1"]),
    ("ap-south-1", &["ap-southeast-1", "ap-northeast-1", "us-east-1"]),
    ("ap-southeast-1", &["ap-southeast-2", "ap-northeast-1", "us-east-1"]),
    ("ap-southeast-2", &["ap-southeast-1", "ap-northeast-1", "us-east-1"]),
    ("ap-northeast-1", &["ap-northeast-2", "ap-southeast-1", "us-east-1"]),
    ("ap-northeast-2", &["ap-northeast-1", "ap-southeast-1", "us-east-1"]),
    ("ap-northeast-3", &["ap-northeast-1", "ap-northeast-2", "us-east-1"]),
    ("sa-east-1", &["us-east-1", "us-east-2"]),
];

impl Default for RegionFallbackMap {
    fn default() -> Self {
        Self::from_pairs(DEFAULT_FALLBACKS)
    }
}

impl RegionFallbackMap {
    /// Build a map from `(region, neighbours)` pairs
    pub fn from_pairs(pairs: &[(&str, &[&str])]) -> Self {
        let neighbors = pairs
            .iter()
            .map(|(region, list)| {
                (
                    region.to_string(),
                    list.iter().map(|r| r.to_string()).collect(),
                )
            })
            .collect();
        Self { neighbors }
    }

    /// Ordered neighbours of `region`; empty for unknown regions
    pub fn neighbors(&self, region: &str) -> &[String] {
        self.neighbors
            .get(region)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, region: &str) -> bool {
        self.neighbors.contains_key(region)
    }

    /// Every region with an entry, sorted
    pub fn known_regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.neighbors.keys().map(String::as_str).collect();
        regions.sort_unstable();
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map_order() {
        let map = RegionFallbackMap::default();
        assert_eq!(map.neighbors("eu-north-1"), ["eu-west-1", "eu-central-1"]);
        assert_eq!(map.neighbors("us-east-1")[0], "us-east-2");
        assert_eq!(map.known_regions().len(), 17);
    }

    #[test]
    fn test_unknown_region_has_no_neighbors() {
        let map = RegionFallbackMap::default();
        assert!(map.neighbors("mars-north-1").is_empty());
        assert!(!map.contains("mars-north-1"));
    }

    #[test]
    fn test_custom_map() {
        let pairs: &[(&str, &[&str])] = &[("a", &["b", "c"])];
        let map = RegionFallbackMap::from_pairs(pairs);
        assert_eq!(map.neighbors("a"), ["b", "c"]);
        assert_eq!(map.known_regions(), vec!["a"]);
    }
}
