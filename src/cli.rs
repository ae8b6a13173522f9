use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rigup - idempotent provisioning for GPU Caffe build hosts
#[derive(Parser)]
#[command(name = "rigup")]
#[command(about = "Provision a GPU deep-learning build host, idempotently")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: evaluate every guard and report what would change
    /// without running any action.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the caffe recipe
    Run {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the run report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Print the ordered step list without evaluating anything
    Plan {
        /// Path to configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write the default configuration to a file
    Init {
        /// Destination path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_is_global() {
        let cli = Cli::try_parse_from(["rigup", "run", "--dry-run", "-c", "x.json"]).unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Run { config, json } => {
                assert_eq!(config, Some(PathBuf::from("x.json")));
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["rigup"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
