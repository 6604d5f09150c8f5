//! Image cache maintenance commands

use anyhow::Result;

use crate::client::ApiClient;
use crate::output::{format_ratio, print_heading, print_json, print_success, OutputFormat};

/// Show cache statistics
pub async fn stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.cache_stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    print_heading("Image Cache");
    println!("Entries:                {} / {}", stats.size, stats.max_size);
    println!("Hits:                   {}", stats.hits);
    println!("Misses:                 {}", stats.misses);
    println!("Hit ratio:              {}", format_ratio(stats.hit_ratio));
    println!("TTL:                    {}s", stats.ttl_secs);
    Ok(())
}

/// Drop every cached image
pub async fn clear(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.cache_clear().await?;
    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success("Image cache cleared");
            Ok(())
        }
    }
}

/// Drop cached images of one region
pub async fn invalidate(client: &ApiClient, region: &str, format: OutputFormat) -> Result<()> {
    let response = client.cache_invalidate(region).await?;
    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!(
                "Removed {} cached image(s) for {}",
                response.removed, response.region
            ));
            Ok(())
        }
    }
}

/// Remove expired entries now
pub async fn cleanup(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.cache_cleanup().await?;
    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            print_success(&format!("Removed {} expired entries", response.removed));
            Ok(())
        }
    }
}
