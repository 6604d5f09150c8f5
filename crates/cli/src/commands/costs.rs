//! Cost comparison command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, format_currency, format_duration, print_heading, print_json, print_rows,
    OutputFormat,
};

/// Row for the per-path cost table
#[derive(Tabled)]
struct CostRow {
    #[tabled(rename = "Path")]
    path: &'static str,
    #[tabled(rename = "Launch")]
    launch: String,
    #[tabled(rename = "Setup")]
    setup: String,
    #[tabled(rename = "Storage")]
    storage: String,
}

/// Compare image and script provisioning costs for a template
pub async fn show_costs(
    client: &ApiClient,
    template: &str,
    region: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let analysis = client.costs(template, region).await?;

    if format == OutputFormat::Json {
        return print_json(&analysis);
    }

    print_heading("Cost Analysis");
    println!("Template:               {}", analysis.template_name.cyan());
    println!("Region:                 {}", analysis.region);
    println!();

    print_rows(vec![
        CostRow {
            path: "image",
            launch: format_currency(analysis.ami_launch_cost),
            setup: format_currency(analysis.ami_setup_cost),
            storage: format_currency(analysis.ami_storage_cost),
        },
        CostRow {
            path: "script",
            launch: format_currency(analysis.script_launch_cost),
            setup: format_currency(analysis.script_setup_cost),
            storage: "-".to_string(),
        },
    ]);
    println!();

    println!(
        "Script setup time:      {}",
        format_duration(analysis.script_setup_time)
    );
    println!(
        "Time saved by image:    {}",
        format_duration(analysis.time_savings).green()
    );
    println!(
        "Savings over 1h / 8h:   {} / {}",
        format_currency(analysis.cost_savings_1h),
        format_currency(analysis.cost_savings_8h)
    );
    if analysis.break_even_point > 0.0 {
        println!("Break-even:             {:.1}h", analysis.break_even_point);
    }
    println!();

    println!(
        "{} {}",
        "Recommendation:".bold(),
        color_status(&analysis.recommendation).bold()
    );
    println!("{}", analysis.reasoning.dimmed());

    Ok(())
}
