//! Resolution, availability and discovery commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, DiscoverQuery, ResolutionSummary};
use crate::output::{
    color_method, color_status, format_currency, format_duration, format_timestamp, print_heading,
    print_info, print_json, print_rows, print_warning, OutputFormat,
};

/// Row for the availability table
#[derive(Tabled)]
struct AvailabilityRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Took")]
    took: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Resolve a template to an image
pub async fn resolve(
    client: &ApiClient,
    template: &str,
    region: Option<&str>,
    details: bool,
    format: OutputFormat,
) -> Result<()> {
    if details {
        // The detailed record carries the whole image; JSON is its only form
        let result = client.resolve_details(template, region).await?;
        return print_json(&result);
    }

    let summary = client.resolve(template, region).await?;
    print_resolution("Image Resolution", &summary, format)
}

/// Show what resolution would pick without copying images
pub async fn preview(
    client: &ApiClient,
    template: &str,
    region: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let summary = client.preview(template, region).await?;
    print_resolution("Resolution Preview", &summary, format)
}

fn print_resolution(title: &str, summary: &ResolutionSummary, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(summary);
    }

    print_heading(title);
    println!("Template:               {}", summary.template.cyan());
    println!("Region:                 {}", summary.target_region);
    println!(
        "Method:                 {}",
        color_method(&summary.resolution_method)
    );
    match &summary.image_id {
        Some(id) => println!("Image:                  {}", id.bold()),
        None => println!("Image:                  {}", "none (script provisioning)".dimmed()),
    }
    if let Some(source) = &summary.source_region {
        println!("Source region:          {}", source);
    }
    println!(
        "Launch time:            {}",
        format_duration(summary.launch_time_secs)
    );
    println!(
        "Estimated cost:         {}",
        format_currency(summary.estimated_cost)
    );
    if !summary.fallback_chain.is_empty() {
        println!(
            "Tiers tried:            {}",
            summary.fallback_chain.join(" → ").dimmed()
        );
    }

    if let Some(warning) = &summary.warning {
        println!();
        print_warning(warning);
    }

    Ok(())
}

/// Test image availability across regions
pub async fn test_availability(
    client: &ApiClient,
    template: &str,
    regions: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let report = client.test_availability(template, regions).await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    print_heading("Availability Report");
    println!("Template:               {}", report.template_name.cyan());
    println!(
        "Overall:                {} ({}/{} regions)",
        color_status(&report.overall_status),
        report.available_regions,
        report.total_regions
    );
    println!();

    let rows = report
        .regions
        .iter()
        .map(|r| AvailabilityRow {
            region: r.region.clone(),
            status: color_status(&r.status),
            method: r.resolution_method.clone().unwrap_or_else(|| "-".into()),
            image: r
                .image
                .as_ref()
                .map(|i| i.image_id.clone())
                .unwrap_or_else(|| "-".into()),
            took: format!("{}ms", r.duration_ms),
            error: r.error.clone().unwrap_or_default(),
        })
        .collect();
    print_rows(rows);

    println!();
    println!("Tested at: {}", format_timestamp(&report.tested_at).dimmed());
    Ok(())
}

/// Look up the published image for a distribution release
pub async fn discover(
    client: &ApiClient,
    query: DiscoverQuery<'_>,
    format: OutputFormat,
) -> Result<()> {
    let found = client.discover(&query).await?;

    if format == OutputFormat::Json {
        return print_json(&found);
    }

    print_heading("Image Discovery");
    println!(
        "Release:                {} {} ({})",
        found.distro, found.version, found.architecture
    );
    println!("Region:                 {}", found.region);
    println!("Image:                  {}", found.image_id.bold());
    println!("Source:                 {}", color_status(&found.source));

    if found.source == "static" {
        println!();
        print_info("No published image found; using the supplied fallback id");
    }
    Ok(())
}
