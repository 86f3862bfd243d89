//! Resource monitor - tiered background cleanup keyed on memory and idle time

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use super::registry::Registry;
use super::settings::MonitorSettings;
use super::sync::SyncEngine;

/// Cleanup aggressiveness, from cheapest to most thorough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTier {
    Light,
    Medium,
    Deep,
}

impl CleanupTier {
    pub fn label(&self) -> &'static str {
        match self {
            CleanupTier::Light => "light",
            CleanupTier::Medium => "medium",
            CleanupTier::Deep => "deep",
        }
    }
}

/// Records when the operator last did anything; cleanup tiers key their
/// idle gates on this.
#[derive(Clone)]
pub struct ActivityTracker {
    epoch: Instant,
    last_ms: Arc<AtomicU64>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record operator activity now.
    pub fn touch(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last recorded activity (or since startup).
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Temporary files handed out by the launcher. Whatever the launcher's own
/// delayed deletion misses gets collected here by the medium tier.
#[derive(Clone, Default)]
pub struct TempFileTracker {
    files: Arc<Mutex<Vec<PathBuf>>>,
}

impl TempFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, path: PathBuf) {
        if let Ok(mut files) = self.files.lock() {
            if !files.contains(&path) {
                files.push(path);
            }
        }
    }

    pub fn forget(&self, path: &Path) {
        if let Ok(mut files) = self.files.lock() {
            files.retain(|p| p != path);
        }
    }

    /// Delete every tracked file that still exists; failures stay tracked
    /// for the next pass. Returns how many files were deleted.
    pub fn sweep(&self) -> usize {
        let Ok(mut files) = self.files.lock() else {
            return 0;
        };
        let mut deleted = 0;
        files.retain(|path| {
            if !path.exists() {
                return false;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    debug!("Removed leftover temp file {}", path.display());
                    deleted += 1;
                    false
                }
                Err(e) => {
                    warn!("Could not remove temp file {}: {}", path.display(), e);
                    true
                }
            }
        });
        files.shrink_to_fit();
        deleted
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Profile icons, memoized in memory and persisted as `<number>.ico` files
/// in the cache directory.
#[derive(Clone)]
pub struct IconCache {
    dir: PathBuf,
    entries: Arc<Mutex<HashMap<u32, PathBuf>>>,
}

impl IconCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record(&self, number: u32, path: PathBuf) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(number, path);
        }
    }

    /// The icon path for a profile, checking memory first and the cache
    /// directory second.
    pub fn locate(&self, number: u32) -> Option<PathBuf> {
        if let Ok(entries) = self.entries.lock() {
            if let Some(path) = entries.get(&number) {
                return Some(path.clone());
            }
        }
        let candidate = self.dir.join(format!("{}.ico", number));
        if candidate.is_file() {
            self.record(number, candidate.clone());
            return Some(candidate);
        }
        None
    }

    /// Drop in-memory entries for profiles not in `active`; returns how many
    /// were evicted.
    pub fn evict_except(&self, active: &[u32]) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|number, _| active.contains(number));
        entries.shrink_to_fit();
        before - entries.len()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
            entries.shrink_to_fit();
        }
    }

    pub fn cached(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Delete on-disk icons for inactive profiles older than `max_age`.
    /// A missing cache directory is not an error.
    pub fn sweep_disk(&self, active: &[u32], max_age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Reading icon cache directory"),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ico") {
                continue;
            }
            let Some(number) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if active.contains(&number) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|m| m.elapsed().unwrap_or_default() >= max_age)
                .unwrap_or(false);
            if !old_enough {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale icon {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Could not remove stale icon {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

/// The light tier is purely time-gated.
pub fn light_due(elapsed: Duration, interval: Duration) -> bool {
    elapsed >= interval
}

/// The medium tier needs both memory pressure and an idle operator.
pub fn medium_due(rss_mb: u64, rss_threshold_mb: u64, idle: Duration, idle_floor: Duration) -> bool {
    rss_mb > rss_threshold_mb && idle > idle_floor
}

/// The deep tier needs both its long interval and a well-idle operator.
pub fn deep_due(elapsed: Duration, interval: Duration, idle: Duration, idle_floor: Duration) -> bool {
    elapsed >= interval && idle > idle_floor
}

struct MonitorContext {
    registry: Registry,
    sync: Arc<SyncEngine>,
    activity: ActivityTracker,
    temps: TempFileTracker,
    icons: IconCache,
    settings: MonitorSettings,
}

struct TierClocks {
    last_light: Instant,
    last_medium: Option<Instant>,
    last_deep: Instant,
}

impl TierClocks {
    fn new() -> Self {
        Self {
            last_light: Instant::now(),
            last_medium: None,
            last_deep: Instant::now(),
        }
    }
}

/// Running monitor thread. Stopping (or dropping) the handle shuts the
/// thread down and joins it.
pub struct MonitorHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the background cleanup loop.
pub fn spawn_monitor(
    registry: Registry,
    sync: Arc<SyncEngine>,
    activity: ActivityTracker,
    temps: TempFileTracker,
    icons: IconCache,
    settings: MonitorSettings,
) -> MonitorHandle {
    let (stop_tx, stop_rx) = mpsc::channel();
    let ctx = MonitorContext {
        registry,
        sync,
        activity,
        temps,
        icons,
        settings,
    };
    let thread = thread::spawn(move || run(ctx, stop_rx));
    MonitorHandle {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    }
}

fn run(ctx: MonitorContext, stop_rx: mpsc::Receiver<()>) {
    let mut clocks = TierClocks::new();
    let mut system = System::new();
    let self_pid = Pid::from_u32(std::process::id());
    let poll = Duration::from_secs(ctx.settings.poll_secs);
    let backoff = Duration::from_secs(ctx.settings.error_backoff_secs);
    let mut wait = poll;

    debug!(
        "Resource monitor running, polling every {}s",
        ctx.settings.poll_secs
    );
    loop {
        match stop_rx.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        wait = match tick(&ctx, &mut clocks, &mut system, self_pid) {
            Ok(()) => poll,
            Err(e) => {
                error!("Resource monitor pass failed: {}", e);
                backoff
            }
        };
    }
    debug!("Resource monitor stopped");
}

fn tick(
    ctx: &MonitorContext,
    clocks: &mut TierClocks,
    system: &mut System,
    self_pid: Pid,
) -> Result<()> {
    let settings = &ctx.settings;
    let rss_mb = self_rss_mb(system, self_pid);
    let idle = ctx.activity.idle();

    if light_due(
        clocks.last_light.elapsed(),
        Duration::from_secs(settings.light_interval_secs),
    ) {
        clocks.last_light = Instant::now();
        run_tier(ctx, CleanupTier::Light, rss_mb)?;
    }

    // Medium re-arms on the light interval; memory pressure alone would
    // otherwise trigger it on every poll.
    let medium_armed = clocks
        .last_medium
        .map_or(true, |t| t.elapsed() >= Duration::from_secs(settings.light_interval_secs));
    if medium_armed
        && medium_due(
            rss_mb,
            settings.medium_rss_mb,
            idle,
            Duration::from_secs(settings.medium_idle_secs),
        )
    {
        clocks.last_medium = Some(Instant::now());
        run_tier(ctx, CleanupTier::Medium, rss_mb)?;
    }

    if deep_due(
        clocks.last_deep.elapsed(),
        Duration::from_secs(settings.deep_interval_secs),
        idle,
        Duration::from_secs(settings.deep_idle_secs),
    ) {
        clocks.last_deep = Instant::now();
        run_tier(ctx, CleanupTier::Deep, rss_mb)?;
    }
    Ok(())
}

fn run_tier(ctx: &MonitorContext, tier: CleanupTier, rss_mb: u64) -> Result<()> {
    debug!("Running {} cleanup at {} MB resident", tier.label(), rss_mb);
    match tier {
        CleanupTier::Light => {
            let pruned = ctx.registry.prune_ports()?;
            if pruned > 0 {
                info!("Light cleanup pruned {} stale port entries", pruned);
            }
        }
        CleanupTier::Medium => {
            let deleted = ctx.temps.sweep();
            let active = ctx.registry.snapshot()?.numbers();
            let evicted = ctx.icons.evict_except(&active);
            if deleted > 0 || evicted > 0 {
                info!(
                    "Medium cleanup removed {} temp files and evicted {} cached icons",
                    deleted, evicted
                );
            }
        }
        CleanupTier::Deep => {
            ctx.icons.clear();
            let released = ctx
                .sync
                .release_if_idle(Duration::from_secs(ctx.settings.sync_release_idle_secs))?;
            let active = ctx.registry.snapshot()?.numbers();
            let max_age = Duration::from_secs(ctx.settings.icon_max_age_hours * 3600);
            let swept = ctx.icons.sweep_disk(&active, max_age)?;
            if released || swept > 0 {
                info!(
                    "Deep cleanup: sync released {}, {} stale icons removed",
                    released, swept
                );
            }
        }
    }
    Ok(())
}

fn self_rss_mb(system: &mut System, self_pid: Pid) -> u64 {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[self_pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );
    system
        .process(self_pid)
        .map(|p| p.memory() / (1024 * 1024))
        .unwrap_or(0)
}
