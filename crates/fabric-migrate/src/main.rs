//! Fabric Migration CLI
//!
//! Provisions the warehouse, source connection and copy job for a Synapse to
//! Fabric migration.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fabric_migrate::config::EXAMPLE_CONFIG;
use fabric_migrate::provision::plan;
use fabric_migrate::{DiscoveryCache, Overrides, ProvisionConfig, Provisioner, Stage};

#[derive(Parser)]
#[command(name = "fabric-migrate")]
#[command(version)]
#[command(about = "Provision Fabric warehouses, connections and copy jobs for Synapse migrations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Target workspace id (when not in the config file)
    #[arg(long, env = "FABRIC_WORKSPACE_ID", global = true)]
    workspace_id: Option<String>,

    /// Entra tenant id
    #[arg(long, env = "AZURE_TENANT_ID", global = true)]
    tenant_id: Option<String>,

    /// Application (client) id
    #[arg(long, env = "AZURE_CLIENT_ID", global = true)]
    client_id: Option<String>,

    /// Client secret
    #[arg(long, env = "AZURE_CLIENT_SECRET", global = true, hide_env_values = true)]
    client_secret: Option<String>,

    /// Pre-issued bearer token for the Fabric API
    #[arg(long, env = "FABRIC_BEARER_TOKEN", global = true, hide_env_values = true)]
    bearer_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision warehouse, connection and copy job
    Provision {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Print the definition stages without calling the control plane
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Show the definition stages that would be applied
    Plan {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "provision.yaml")]
        output: PathBuf,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            workspace_id: self.workspace_id.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(log_directives(
            cli.verbose,
            std::env::var("RUST_LOG").ok(),
        )))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let overrides = cli.overrides();
    match cli.command {
        Commands::Provision { config, dry_run } => {
            let config = load_config(&config, overrides)?;
            if dry_run {
                info!("Dry run mode - no control-plane calls");
                show_plan(&config).await?;
            } else {
                run_provision(&config).await?;
            }
        }
        Commands::Validate { config } => {
            validate_config(&config, overrides).await?;
        }
        Commands::Plan { config } => {
            let config = load_config(&config, overrides)?;
            show_plan(&config).await?;
        }
        Commands::Init { output } => {
            generate_config(&output)?;
        }
    }

    Ok(())
}

/// Filter directives: `RUST_LOG` when set, else info (debug for this crate
/// with `--verbose`).
fn log_directives(verbose: bool, rust_log: Option<String>) -> String {
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => directives,
        _ if verbose => "info,fabric_migrate=debug".to_string(),
        _ => "info".to_string(),
    }
}

fn load_config(path: &Path, overrides: Overrides) -> anyhow::Result<ProvisionConfig> {
    info!("Loading configuration from {:?}", path);
    let config = ProvisionConfig::from_file(path)?.with_overrides(overrides);
    config.validate()?;
    Ok(config)
}

async fn run_provision(config: &ProvisionConfig) -> anyhow::Result<()> {
    let cache = DiscoveryCache::new();
    let tables = config.resolve_tables(&cache).await?;
    let request = config.to_request(tables)?;

    let provisioner =
        Provisioner::new(config.client()?, config.provision_options()).with_progress(create_spinner());
    let outcome = provisioner.provision(&request).await?;

    println!("\n✅ Provisioning Complete!");
    for resource in [&outcome.warehouse, &outcome.connection, &outcome.copy_job] {
        println!(
            "   {:<11} {} ({}){}",
            format!("{}:", resource.kind),
            resource.display_name,
            resource.id,
            if resource.reused { " [reused]" } else { "" }
        );
    }
    println!("   Activities: {}", outcome.activities);
    println!("\n{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

async fn validate_config(path: &Path, overrides: Overrides) -> anyhow::Result<()> {
    let config = load_config(path, overrides)?;
    let tables = config.resolve_tables(&DiscoveryCache::new()).await?;
    config.to_request(tables.clone())?;

    println!("✅ Configuration is valid!");
    println!("   Workspace: {}", config.fabric.workspace_id);
    println!("   Warehouse: {}", config.warehouse.name);
    println!("   Copy job:  {}", config.copy_job.name);
    println!("   Tables:    {}", tables.len());

    Ok(())
}

async fn show_plan(config: &ProvisionConfig) -> anyhow::Result<()> {
    let tables = config.resolve_tables(&DiscoveryCache::new()).await?;
    let request = config.to_request(tables)?;
    let stages = plan(&request)?;

    println!("Definition stages for copy job '{}':", request.copy_job_name);
    for stage in &stages {
        print_stage(stage)?;
    }

    Ok(())
}

fn print_stage(stage: &Stage) -> anyhow::Result<()> {
    println!(
        "\n── Stage {} ({}, {} activities)",
        stage.kind.ordinal(),
        stage.kind,
        stage.activities.len()
    );
    println!("{}", serde_json::to_string_pretty(&stage.content_json())?);
    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, EXAMPLE_CONFIG)?;
    println!("✅ Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: fabric-migrate provision --config {:?}",
        output
    );

    Ok(())
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
