use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::Scheme;

/// Storage workflow - disk selection, partitioning and mount point mapping
#[derive(Parser)]
#[command(name = "storage-workflow")]
#[command(about = "Storage configuration workflow engine for OS installers")]
#[command(version)]
pub struct Cli {
    /// Workflow configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List disks with total and free space
    Disks {
        /// Inventory fixture (JSON); lsblk is used when omitted
        #[arg(short, long)]
        inventory: Option<PathBuf>,
    },
    /// Print the storage plan for a selection
    Plan {
        /// Inventory fixture (JSON)
        #[arg(short, long)]
        inventory: PathBuf,
        /// Disks to select (repeatable)
        #[arg(short, long = "disk", required = true)]
        disks: Vec<String>,
        /// Automatic scheme (erase-all or use-free-space)
        #[arg(short, long)]
        scheme: Option<Scheme>,
    },
    /// Replay a scripted session and print the resulting state
    Run {
        /// Inventory fixture (JSON)
        #[arg(short, long)]
        inventory: PathBuf,
        /// Action list (JSON)
        #[arg(short, long)]
        steps: PathBuf,
    },
    /// Validate a workflow configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(value_name = "CONFIG")]
        file: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["storage-workflow"]).is_err());
    }

    #[test]
    fn test_cli_disks_without_inventory() {
        let cli = Cli::try_parse_from(["storage-workflow", "disks"]).expect("parse");
        assert!(matches!(cli.command, Commands::Disks { inventory: None }));
    }

    #[test]
    fn test_cli_plan_with_disks_and_scheme() {
        let cli = Cli::try_parse_from([
            "storage-workflow",
            "plan",
            "--inventory",
            "host.json",
            "--disk",
            "vda",
            "--disk",
            "vdb",
            "--scheme",
            "use-free-space",
            "--config",
            "workflow.json",
        ])
        .expect("parse");

        assert_eq!(cli.config, Some(PathBuf::from("workflow.json")));
        match cli.command {
            Commands::Plan { disks, scheme, .. } => {
                assert_eq!(disks, vec!["vda", "vdb"]);
                assert_eq!(scheme, Some(Scheme::UseFreeSpace));
            }
            _ => panic!("Expected Plan command"),
        }
    }

    #[test]
    fn test_cli_plan_requires_disk() {
        let result = Cli::try_parse_from(["storage-workflow", "plan", "--inventory", "host.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_invalid_scheme() {
        let result = Cli::try_parse_from([
            "storage-workflow",
            "plan",
            "-i",
            "host.json",
            "-d",
            "vda",
            "--scheme",
            "erase_all",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_run_and_validate() {
        let cli = Cli::try_parse_from([
            "storage-workflow",
            "run",
            "--inventory",
            "host.json",
            "--steps",
            "steps.json",
        ])
        .expect("parse");
        assert!(matches!(cli.command, Commands::Run { .. }));

        let cli = Cli::try_parse_from(["storage-workflow", "validate", "/etc/workflow.json"])
            .expect("parse");
        match cli.command {
            Commands::Validate { file } => {
                assert_eq!(file, PathBuf::from("/etc/workflow.json"));
            }
            _ => panic!("Expected Validate command"),
        }
    }
}
