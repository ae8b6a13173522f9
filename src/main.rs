//! rigup - Main entry point
//!
//! Loads the configuration, builds the caffe recipe and runs it once.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rigup::cli::{Cli, Commands};
use rigup::command::{CommandRunner, CommandSpec, SystemRunner};
use rigup::config_file::ProvisionConfig;
use rigup::ownership;
use rigup::recipes;
use rigup::sequencer::{RunOptions, Sequencer};

/// Initialize the logger with appropriate settings
fn init_logger() {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main application entry point
fn main() {
    init_logger();
    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    if let Err(e) = dispatch(cli) {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Validate { config } => {
            info!("Validating configuration file: {:?}", config);
            let loaded = ProvisionConfig::load_from_file(&config)?;
            loaded.validate()?;
            println!("✓ Configuration file is valid: {}", config.display());
        }
        Commands::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ProvisionConfig::default().save_to_file(&path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
        Commands::Plan { config } => {
            let mut runner = SystemRunner::new();
            let config = load_config(config.as_deref(), &mut runner)?;
            let recipe = recipes::caffe(&config)?;
            recipe.validate()?;
            println!("{}", recipe.summary());
        }
        Commands::Run { config, json } => {
            let mut runner = SystemRunner::new();
            let config = load_config(config.as_deref(), &mut runner)?;
            let recipe = recipes::caffe(&config)?;

            if !cli.dry_run && !ownership::running_as_root() {
                warn!("Not running as root; package and ownership steps will likely fail");
            }

            let report = Sequencer::new(&mut runner, RunOptions { dry_run: cli.dry_run })
                .run(&recipe)
                .with_context(|| format!("Recipe '{}' did not converge", recipe.name()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
        }
    }
    Ok(())
}

/// Load (or default) the configuration, fill in the kernel release, validate.
fn load_config(path: Option<&Path>, runner: &mut dyn CommandRunner) -> Result<ProvisionConfig> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            ProvisionConfig::load_from_file(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            ProvisionConfig::default()
        }
    };

    if config.os_version.is_none() {
        let out = runner.run(&CommandSpec::new("uname").arg("-r"))?;
        out.ensure_success("uname -r")?;
        let release = out.stdout.trim().to_string();
        info!("Detected kernel release {}", release);
        config.os_version = Some(release);
    }

    config.validate()?;
    Ok(config)
}
