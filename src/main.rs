//! Storage workflow - command line entry point
//!
//! Thin wrapper over the library: lists disks, prints automatic plans and
//! replays scripted sessions against fixture inventories.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use storage_workflow::cli::{Cli, Commands};
use storage_workflow::inventory::{format_size, DeviceSource, DiskInventory};
use storage_workflow::scenario::{load_actions, replay, SessionReport};
use storage_workflow::{FixtureSource, LsblkSource, Scheme, StorageSession, WorkflowConfig};

/// Initialize tracing on stderr; `RUST_LOG` overrides the default level
fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Validate { file } => validate_config(&file),
        Commands::Disks { inventory } => list_disks(inventory.as_deref()),
        Commands::Plan {
            inventory,
            disks,
            scheme,
        } => {
            let config = load_config(cli.config.as_deref())?;
            print_plan(config, &inventory, &disks, scheme)
        }
        Commands::Run { inventory, steps } => {
            let config = load_config(cli.config.as_deref())?;
            run_scenario(config, &inventory, &steps)
        }
    }
}

fn validate_config(path: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", path);
    let config = match WorkflowConfig::load_from_file(path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration file: {:#}", e);
            eprintln!("✗ Failed to load configuration file: {:#}", e);
            std::process::exit(1);
        }
    };
    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration file is valid: {:?}", path);
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkflowConfig> {
    let Some(path) = path else {
        return Ok(WorkflowConfig::default());
    };
    let config = WorkflowConfig::load_from_file(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration {:?}", path))?;
    Ok(config)
}

fn load_fixture(path: &Path) -> Result<Arc<FixtureSource>> {
    Ok(Arc::new(FixtureSource::load_from_file(path)?))
}

fn list_disks(inventory: Option<&Path>) -> Result<()> {
    let source: Arc<dyn DeviceSource> = match inventory {
        Some(path) => load_fixture(path)?,
        None => Arc::new(LsblkSource::new()),
    };

    let mut inventory = DiskInventory::new(source);
    inventory.rescan()?;
    if inventory.is_empty() {
        println!("No usable disks detected.");
        return Ok(());
    }

    for disk in inventory.disks() {
        println!("{}", disk);
        for part in &disk.partitions {
            println!(
                "  {:<12} {:>10}  {:<12} {}",
                part.name,
                format_size(part.size),
                part.format_label(),
                part.label.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn print_plan(
    config: WorkflowConfig,
    inventory: &Path,
    disks: &[String],
    scheme: Option<Scheme>,
) -> Result<()> {
    let source = load_fixture(inventory)?;
    let mut session = StorageSession::new(config, source.clone(), source);

    for disk in disks {
        session.select_disk(disk, true)?;
    }
    if let Some(scheme) = scheme {
        session.set_scheme(scheme)?;
    }
    if !session.scheme().is_automatic() {
        bail!(
            "'{}' needs manual input; describe it as a scenario and use `run`",
            session.scheme()
        );
    }

    // Installation method -> disk encryption -> review
    session.go_next()?;
    session.go_next()?;

    let plan = session
        .applied_plan()
        .context("Review was reached without an applied partitioning")?;
    println!("{}", plan.summary());
    Ok(())
}

fn run_scenario(config: WorkflowConfig, inventory: &Path, steps: &Path) -> Result<()> {
    let source = load_fixture(inventory)?;
    let actions = load_actions(steps)?;
    let mut session = StorageSession::new(config, source.clone(), source);

    info!("Replaying {} action(s)", actions.len());
    for (i, outcome) in replay(&mut session, &actions).iter().enumerate() {
        match &outcome.error {
            None => println!("{:>3}. {:<40} [{}]", i + 1, outcome.action, outcome.step),
            Some(e) => println!("{:>3}. {:<40} [{}] ✗ {}", i + 1, outcome.action, outcome.step, e),
        }
    }

    let report = SessionReport::from_session(&session);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
