//! Cross-region copy with bounded completion polling

use super::tiers::Attempt;
use super::ImageResolver;
use crate::error::ProviderError;
use crate::models::{ImageInfo, ImageState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How long to wait for a copied image to become available
#[derive(Debug, Clone)]
pub struct CopyPolicy {
    /// Delay between completion checks (default: 15 seconds)
    pub poll_interval: Duration,
    /// Completion checks before giving up (default: 40)
    pub max_attempts: u32,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_attempts: 40,
        }
    }
}

impl CopyPolicy {
    /// Longest the policy alone allows a copy to take
    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl ImageResolver {
    /// Copy `image` into `target` and wait until it is available.
    ///
    /// The wait ends at the first of: available, a terminal state, the
    /// policy's attempt limit, or the resolution deadline.
    pub(crate) async fn copy_and_wait(
        &self,
        attempt: &Attempt<'_>,
        image: &ImageInfo,
        source_region: &str,
        target_region: &str,
    ) -> Result<ImageInfo, ProviderError> {
        let mut copied = self
            .call_provider(
                attempt,
                "copy_image",
                self.provider
                    .copy_image(&image.image_id, source_region, target_region),
            )
            .await?;

        let policy = &self.config.copy_policy;
        let mut polls = 0u32;

        while copied.state != ImageState::Available {
            if !copied.state.is_usable() {
                return Err(ProviderError::CopyFailed(format!(
                    "copy {} entered state {:?}",
                    copied.image_id, copied.state
                )));
            }
            if polls >= policy.max_attempts {
                return Err(ProviderError::Timeout(policy.max_wait()));
            }
            if Instant::now() + policy.poll_interval > attempt.deadline {
                return Err(ProviderError::Timeout(policy.poll_interval * polls));
            }

            tokio::time::sleep(policy.poll_interval).await;
            polls += 1;

            copied = self
                .call_provider(
                    attempt,
                    "describe_image",
                    self.provider.describe_image(&copied.image_id, target_region),
                )
                .await?;
            debug!(image_id = %copied.image_id, state = ?copied.state, polls = polls, "Polled image copy");
        }

        copied.region = target_region.to_string();
        copied.source_region = Some(source_region.to_string());
        self.cache.put(&copied.image_id, target_region, &copied);
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CopyPolicy::default();
        assert_eq!(policy.poll_interval, Duration::from_secs(15));
        assert_eq!(policy.max_wait(), Duration::from_secs(600));
    }
}
