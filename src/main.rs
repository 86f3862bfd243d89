//! chromefleet - orchestrate fleets of isolated Chrome profile instances
//!
//! A command-line front end over the core: reconcile profiles against the
//! running system, launch and close them, arrange their windows across
//! screens, and mirror input from a master window into the rest.

mod core;
mod platform;

use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use single_instance::SingleInstance;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::profile::debug_port_for;
use crate::core::{
    FleetManager, LaunchOutcome, ProfileRecord, Settings, SyncStatus,
};

/// Application name constant
pub const APP_NAME: &str = "chromefleet";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = APP_NAME, version, about = "Orchestrate fleets of isolated Chrome profile instances")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the system and list every known profile
    List,
    /// Launch profiles by selection ("3", "1-5", "1,4,7-9"; empty = all)
    Open {
        /// Profile selection; omit to open every profile up to the maximum
        #[arg(default_value = "")]
        selection: String,
        /// URLs to open in each launched profile (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Launch a random sample of profiles
    Random {
        /// How many profiles to pick
        count: usize,
        /// URLs to open in each launched profile (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Close profiles by selection (empty = all)
    Close {
        #[arg(default_value = "")]
        selection: String,
    },
    /// Arrange the fleet's windows across the selected screens
    Arrange {
        /// Use the custom arrangement from settings instead of the grid
        #[arg(long)]
        custom: bool,
    },
    /// Bring one profile's window to the foreground
    Activate { number: u32 },
    /// Flash one profile's window above the rest of the fleet
    Prioritize { number: u32 },
    /// Mirror input from a master profile into every other windowed profile
    Sync {
        /// Profile number whose window becomes the master
        #[arg(long)]
        master: u32,
    },
    /// Refresh continuously and report registry changes
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// List attached screens
    Screens,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    // Ensure only one orchestrator is driving the fleet at a time
    let instance =
        SingleInstance::new(APP_NAME).context("Failed to create the single-instance lock")?;
    if !instance.is_single() {
        anyhow::bail!("another {} instance is already running", APP_NAME);
    }

    if let Err(e) = platform::init_dpi_awareness() {
        warn!("DPI awareness not applied: {}", e);
    }

    let manager = FleetManager::new(&Settings::default_path())?;

    match cli.command {
        Command::List => cmd_list(&manager),
        Command::Open { selection, urls } => cmd_open(&manager, &selection, &urls),
        Command::Random { count, urls } => cmd_random(&manager, count, &urls),
        Command::Close { selection } => cmd_close(&manager, &selection),
        Command::Arrange { custom } => cmd_arrange(&manager, custom),
        Command::Activate { number } => manager.activate(number),
        Command::Prioritize { number } => manager.prioritize(number),
        Command::Sync { master } => cmd_sync(&manager, master),
        Command::Watch { interval } => cmd_watch(&manager, interval),
        Command::Screens => cmd_screens(&manager),
    }
}

/// Initialize the logging system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chromefleet=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cmd_list(manager: &FleetManager) -> Result<()> {
    let snapshot = manager.list()?;
    println!(
        "Registry v{}, refreshed {}",
        snapshot.version,
        snapshot.refreshed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    print_records(&snapshot.records());
    Ok(())
}

fn cmd_open(manager: &FleetManager, selection: &str, urls: &[String]) -> Result<()> {
    let outcome = manager.open(selection, urls)?;
    report_launch(&outcome);
    Ok(())
}

fn cmd_random(manager: &FleetManager, count: usize, urls: &[String]) -> Result<()> {
    let outcome = manager.open_random(count, urls)?;
    report_launch(&outcome);
    Ok(())
}

fn cmd_close(manager: &FleetManager, selection: &str) -> Result<()> {
    let outcome = manager.close(selection)?;
    info!(
        "Closed {} window(s), terminated {} process(es), {} not running",
        outcome.closed.len(),
        outcome.terminated.len(),
        outcome.absent.len()
    );
    Ok(())
}

fn cmd_arrange(manager: &FleetManager, custom: bool) -> Result<()> {
    let (moved, failed) = if custom {
        manager.arrange_custom()?
    } else {
        manager.arrange_grid()?
    };
    if failed > 0 {
        warn!("Arranged {} window(s); {} could not be moved", moved, failed);
    } else {
        info!("Arranged {} window(s)", moved);
    }
    Ok(())
}

fn cmd_sync(manager: &FleetManager, master: u32) -> Result<()> {
    manager.sync_start(master)?;
    manager.start_monitor()?;

    if let SyncStatus::Active { master: window, replicas } = manager.sync_status()? {
        info!(
            "Mirroring input from window {:#x} into {} replica(s)",
            window, replicas
        );
    }

    println!("Sync active. Type a profile number to promote a new master, or press Enter to stop.");
    for line in io::stdin().lock().lines() {
        let line = line.unwrap_or_default();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        match trimmed.parse::<u32>() {
            Ok(number) => match manager.sync_set_master(number) {
                Ok(replicas) => {
                    info!("Master is now profile {} ({} replica(s))", number, replicas)
                }
                Err(e) => warn!("Could not promote profile {}: {:#}", number, e),
            },
            Err(_) => warn!("Enter a profile number, or an empty line to stop"),
        }
    }

    manager.shutdown();
    Ok(())
}

fn cmd_watch(manager: &FleetManager, interval: u64) -> Result<()> {
    manager.start_monitor()?;
    info!("Watching the fleet every {}s; Ctrl-C to stop", interval);

    loop {
        match manager.refresh() {
            Ok((snapshot, stats)) => {
                let changed = !stats.inserted.is_empty()
                    || !stats.reconfirmed.is_empty()
                    || !stats.pruned.is_empty()
                    || !stats.vanished.is_empty()
                    || stats.window_bound > 0;
                if changed {
                    info!(
                        "v{}: {} profile(s); new {:?}, rebound {:?}, windows {}, pruned {:?}, vanished {:?}",
                        snapshot.version,
                        snapshot.len(),
                        stats.inserted,
                        stats.reconfirmed,
                        stats.window_bound,
                        stats.pruned_numbers(),
                        stats.vanished
                    );
                    print_records(&snapshot.records());
                }
            }
            Err(e) => warn!("Refresh failed: {:#}", e),
        }
        thread::sleep(Duration::from_secs(interval));
    }
}

fn cmd_screens(manager: &FleetManager) -> Result<()> {
    let screens = manager.screens()?;
    if screens.is_empty() {
        println!("No screens reported");
        return Ok(());
    }
    for screen in &screens {
        println!(
            "{}  {}x{} at ({}, {}), work area {}x{}{}{}",
            screen.id,
            screen.rect.width,
            screen.rect.height,
            screen.rect.x,
            screen.rect.y,
            screen.work.width,
            screen.work.height,
            if screen.is_primary { ", primary" } else { "" },
            if screen.is_ultrawide() { ", ultrawide" } else { "" },
        );
    }
    Ok(())
}

fn report_launch(outcome: &LaunchOutcome) {
    info!(
        "Launched {} profile(s), {} already running, {} unavailable",
        outcome.launched.len(),
        outcome.already_running.len(),
        outcome.unavailable.len()
    );
    if !outcome.unavailable.is_empty() {
        warn!("Unavailable profiles: {:?}", outcome.unavailable);
    }
}

fn print_records(records: &[ProfileRecord]) {
    if records.is_empty() {
        println!("No profiles found");
        return;
    }
    println!(
        "{:>4}  {:>8}  {:>6}  {:<13}  {}",
        "No.", "PID", "Port", "Status", "Title"
    );
    for record in records {
        let pid = record
            .process_id
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        let title = match (&record.title, record.window_handle) {
            (Some(title), _) => title.as_str(),
            (None, Some(_)) => "",
            (None, None) => "(no window)",
        };
        println!(
            "{:>4}  {:>8}  {:>6}  {:<13}  {}",
            record.number,
            pid,
            debug_port_for(record.number),
            record.status.label(),
            title
        );
    }
}
