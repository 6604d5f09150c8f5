//! Workstation image CLI
//!
//! A command-line tool for resolving workload templates to machine
//! images, comparing provisioning costs and maintaining the resolver cache.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{cache, costs, resolve};

/// Workstation image CLI
#[derive(Parser)]
#[command(name = "wsi")]
#[command(author, version, about = "CLI for workstation image resolution", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via WSI_API_URL env var)
    #[arg(long, env = "WSI_API_URL")]
    pub api_url: Option<String>,

    /// Target region (defaults to the daemon's region)
    #[arg(long, short, env = "WSI_REGION", global = true)]
    pub region: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, global = true)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a template to a launchable image
    Resolve {
        /// Template name
        template: String,

        /// Print the full resolution record as JSON
        #[arg(long)]
        details: bool,
    },

    /// Show which image would be used, without copying
    Preview {
        /// Template name
        template: String,
    },

    /// Compare image and script provisioning costs
    Costs {
        /// Template name
        template: String,
    },

    /// Test image availability across regions
    Test {
        /// Template name
        template: String,

        /// Regions to test (the daemon's default set if omitted)
        #[arg(long, value_delimiter = ',')]
        regions: Vec<String>,
    },

    /// Look up the published image for a distribution release
    Discover {
        /// Distribution (ubuntu, amazonlinux, debian, ...)
        #[arg(long)]
        distro: String,

        /// Release version (e.g. 24.04)
        #[arg(long)]
        release: String,

        /// Architecture (x86_64 or arm64)
        #[arg(long)]
        arch: Option<String>,

        /// Static image id used when nothing is published
        #[arg(long)]
        fallback: Option<String>,
    },

    /// Image cache maintenance
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Drop every cached image
    Clear,

    /// Drop cached images of one region
    Invalidate {
        /// Region to invalidate
        #[arg(value_name = "REGION")]
        target: String,
    },

    /// Remove expired entries now
    Cleanup,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let format = config.format(cli.format)?;
    let region = config.region(cli.region);
    let region = region.as_deref();

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    // Execute command
    match cli.command {
        Commands::Resolve { template, details } => {
            resolve::resolve(&client, &template, region, details, format).await?;
        }
        Commands::Preview { template } => {
            resolve::preview(&client, &template, region, format).await?;
        }
        Commands::Costs { template } => {
            costs::show_costs(&client, &template, region, format).await?;
        }
        Commands::Test { template, regions } => {
            resolve::test_availability(&client, &template, regions, format).await?;
        }
        Commands::Discover {
            distro,
            release,
            arch,
            fallback,
        } => {
            let query = client::DiscoverQuery {
                distro: &distro,
                version: &release,
                arch: arch.as_deref(),
                region,
                fallback: fallback.as_deref(),
            };
            resolve::discover(&client, query, format).await?;
        }
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Stats => cache::stats(&client, format).await?,
            CacheCommands::Clear => cache::clear(&client, format).await?,
            CacheCommands::Invalidate { target } => {
                cache::invalidate(&client, &target, format).await?
            }
            CacheCommands::Cleanup => cache::cleanup(&client, format).await?,
        },
    }

    Ok(())
}
