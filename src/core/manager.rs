//! Fleet manager - central coordination of scanning, launching, layout and sync

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::error::FleetError;
use super::launcher::{CloseOutcome, Launcher, LaunchOutcome};
use super::layout::{self, ScreenDescriptor};
use super::monitor::{
    spawn_monitor, ActivityTracker, IconCache, MonitorHandle, TempFileTracker,
};
use super::profile::WindowHandle;
use super::reconcile::{Reconciler, RefreshStats};
use super::registry::{Registry, RegistrySnapshot};
use super::settings::Settings;
use super::sync::{SyncEngine, SyncStatus};

/// Central handle for fleet operations. Cheap to clone; all components are
/// shared.
pub struct FleetManager {
    /// The live registry of identified profiles
    pub registry: Registry,
    /// Orchestrator settings
    pub settings: Arc<RwLock<Settings>>,
    settings_path: PathBuf,
    reconciler: Arc<Reconciler>,
    sync: Arc<SyncEngine>,
    activity: ActivityTracker,
    temps: TempFileTracker,
    icons: IconCache,
    launcher: Launcher,
    monitor: Arc<Mutex<Option<MonitorHandle>>>,
}

impl FleetManager {
    /// Build a manager from the settings document at `path` (defaults when
    /// absent).
    pub fn new(settings_path: &Path) -> Result<Self> {
        let settings = Settings::load(settings_path)?;
        Self::with_settings(settings, settings_path.to_path_buf())
    }

    pub fn with_settings(settings: Settings, settings_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&settings.cache_dir)
            .with_context(|| format!("Creating cache directory {}", settings.cache_dir.display()))?;

        let registry = Registry::new();
        let temps = TempFileTracker::new();
        let icons = IconCache::new(settings.cache_dir.clone());
        let launcher = Launcher::new(registry.clone(), temps.clone(), icons.clone());

        Ok(Self {
            reconciler: Arc::new(Reconciler::new(registry.clone())),
            registry,
            settings: Arc::new(RwLock::new(settings)),
            settings_path,
            sync: Arc::new(SyncEngine::new()),
            activity: ActivityTracker::new(),
            temps,
            icons,
            launcher,
            monitor: Arc::new(Mutex::new(None)),
        })
    }

    /// A point-in-time copy of the settings.
    pub fn read_settings(&self) -> Result<Settings> {
        Ok(self
            .settings
            .read()
            .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?
            .clone())
    }

    /// Run one reconciliation pass and return the published snapshot.
    /// Refreshing does not count as operator activity; the watch loop drives
    /// it on a timer and the cleanup tiers gate on real operator idle time.
    pub fn refresh(&self) -> Result<(Arc<RegistrySnapshot>, RefreshStats)> {
        let settings = self.read_settings()?;
        self.reconciler
            .refresh(&settings.executable_lowercase(), &settings.shortcut_dir)
    }

    /// Refresh, then return the snapshot for display.
    pub fn list(&self) -> Result<Arc<RegistrySnapshot>> {
        Ok(self.refresh()?.0)
    }

    /// Open the selected profiles. A non-empty selection is remembered in
    /// the settings document.
    pub fn open(&self, selection: &str, urls: &[String]) -> Result<LaunchOutcome> {
        self.activity.touch();
        let settings = self.read_settings()?;
        let urls = if urls.is_empty() {
            settings.custom_urls.clone()
        } else {
            urls.to_vec()
        };
        let outcome = self.launcher.open(&settings, selection, &urls)?;
        if !selection.trim().is_empty() {
            self.remember_selection(selection);
        }
        Ok(outcome)
    }

    /// Open a random sample of the launchable profiles.
    pub fn open_random(&self, count: usize, urls: &[String]) -> Result<LaunchOutcome> {
        self.activity.touch();
        let settings = self.read_settings()?;
        let urls = if urls.is_empty() {
            settings.custom_urls.clone()
        } else {
            urls.to_vec()
        };
        self.launcher.open_random(&settings, count, &urls)
    }

    /// Close the selected profiles, refreshing first so window handles and
    /// pids are current.
    pub fn close(&self, selection: &str) -> Result<CloseOutcome> {
        self.activity.touch();
        self.refresh()?;
        let settings = self.read_settings()?;
        self.launcher.close(&settings, selection)
    }

    /// Arrange all windowed profiles in the computed grid.
    pub fn arrange_grid(&self) -> Result<(usize, usize)> {
        self.activity.touch();
        let windows = self.windowed_handles()?;
        if windows.is_empty() {
            return Err(FleetError::NothingToArrange.into());
        }
        let screens = crate::platform::enumerate_screens()?;
        let selection = self.read_settings()?.screen_selection;
        let picked = layout::select_screens(&screens, &selection)?;
        let placements = layout::plan_grid(&windows, &picked)?;
        let (moved, skipped) = layout::apply_placements(&placements);
        info!("Grid arrangement moved {} windows, skipped {}", moved, skipped);
        Ok((moved, skipped))
    }

    /// Arrange all windowed profiles with the explicit custom parameters.
    pub fn arrange_custom(&self) -> Result<(usize, usize)> {
        self.activity.touch();
        let windows = self.windowed_handles()?;
        if windows.is_empty() {
            return Err(FleetError::NothingToArrange.into());
        }
        let settings = self.read_settings()?;
        let screens = crate::platform::enumerate_screens()?;
        let picked = layout::select_screens(&screens, &settings.screen_selection)?;
        let placements = layout::plan_custom(&windows, &picked, &settings.arrangement)?;
        let (moved, skipped) = layout::apply_placements(&placements);
        info!(
            "Custom arrangement moved {} windows, skipped {}",
            moved, skipped
        );
        Ok((moved, skipped))
    }

    /// Bring a profile's window to the foreground. Raising is cosmetic; only
    /// an unknown or windowless profile is an error.
    pub fn activate(&self, number: u32) -> Result<()> {
        self.activity.touch();
        let handle = self.window_of(number)?;
        if let Err(e) = crate::platform::activate_window(handle) {
            warn!("Could not activate profile {}: {}", number, e);
        }
        Ok(())
    }

    /// Flash a profile's window topmost so the operator can find it.
    pub fn prioritize(&self, number: u32) -> Result<()> {
        self.activity.touch();
        let handle = self.window_of(number)?;
        if let Err(e) = crate::platform::flash_topmost(handle) {
            warn!("Could not prioritize profile {}: {}", number, e);
        }
        Ok(())
    }

    /// Start mirroring input from `master_number` into every other windowed
    /// profile. Rejected while a session is active.
    pub fn sync_start(&self, master_number: u32) -> Result<usize> {
        let (master, replicas) = self.sync_targets(master_number)?;
        let count = replicas.len();
        self.sync.start(master, replicas)?;
        Ok(count)
    }

    /// Promote a new master, stopping any active session first.
    pub fn sync_set_master(&self, master_number: u32) -> Result<usize> {
        let (master, replicas) = self.sync_targets(master_number)?;
        let count = replicas.len();
        self.sync.set_master(master, replicas)?;
        Ok(count)
    }

    pub fn sync_stop(&self) -> Result<()> {
        self.activity.touch();
        self.sync.stop()
    }

    pub fn sync_status(&self) -> Result<SyncStatus> {
        self.sync.status()
    }

    /// Attached screens for the arrangement commands.
    pub fn screens(&self) -> Result<Vec<ScreenDescriptor>> {
        crate::platform::enumerate_screens()
    }

    /// Start the background cleanup loop (idempotent).
    pub fn start_monitor(&self) -> Result<()> {
        let mut guard = self
            .monitor
            .lock()
            .map_err(|e| anyhow::anyhow!("Monitor handle lock poisoned: {}", e))?;
        if guard.is_some() {
            return Ok(());
        }
        let monitor_settings = self.read_settings()?.monitor;
        *guard = Some(spawn_monitor(
            self.registry.clone(),
            Arc::clone(&self.sync),
            self.activity.clone(),
            self.temps.clone(),
            self.icons.clone(),
            monitor_settings,
        ));
        info!("Resource monitor started");
        Ok(())
    }

    pub fn stop_monitor(&self) {
        if let Ok(mut guard) = self.monitor.lock() {
            if let Some(handle) = guard.take() {
                handle.stop();
            }
        }
    }

    /// Release everything that holds OS resources: the sync hook and the
    /// monitor thread.
    pub fn shutdown(&self) {
        if let Err(e) = self.sync_stop() {
            warn!("Sync did not stop cleanly: {}", e);
        }
        self.stop_monitor();
    }

    fn windowed_handles(&self) -> Result<Vec<WindowHandle>> {
        let (snapshot, _) = self.refresh()?;
        Ok(snapshot
            .windowed_profiles()
            .iter()
            .filter_map(|p| p.window_handle)
            .collect())
    }

    fn window_of(&self, number: u32) -> Result<WindowHandle> {
        let (snapshot, _) = self.refresh()?;
        let profile = snapshot
            .get(number)
            .ok_or(FleetError::UnknownProfile(number))?;
        Ok(profile
            .window_handle
            .ok_or(FleetError::WindowlessProfile(number))?)
    }

    fn sync_targets(&self, master_number: u32) -> Result<(WindowHandle, Vec<WindowHandle>)> {
        self.activity.touch();
        let (snapshot, _) = self.refresh()?;
        let profile = snapshot
            .get(master_number)
            .ok_or(FleetError::UnknownProfile(master_number))?;
        let master = profile
            .window_handle
            .ok_or(FleetError::WindowlessProfile(master_number))?;
        let replicas = snapshot
            .windowed_profiles()
            .iter()
            .filter(|p| p.number != master_number)
            .filter_map(|p| p.window_handle)
            .collect();
        Ok((master, replicas))
    }

    fn remember_selection(&self, selection: &str) {
        let updated = {
            let Ok(mut settings) = self.settings.write() else {
                return;
            };
            if settings.last_selection == selection {
                return;
            }
            settings.last_selection = selection.to_string();
            settings.clone()
        };
        if let Err(e) = updated.save(&self.settings_path) {
            warn!("Could not persist last selection: {}", e);
        }
    }
}

impl Clone for FleetManager {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            settings: Arc::clone(&self.settings),
            settings_path: self.settings_path.clone(),
            reconciler: Arc::clone(&self.reconciler),
            sync: Arc::clone(&self.sync),
            activity: self.activity.clone(),
            temps: self.temps.clone(),
            icons: self.icons.clone(),
            launcher: Launcher::new(
                self.registry.clone(),
                self.temps.clone(),
                self.icons.clone(),
            ),
            monitor: Arc::clone(&self.monitor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_manager(dir: &TempDir) -> FleetManager {
        let mut settings = Settings::default();
        // an executable nothing on the test machine runs
        settings.executable_name = "fleet-test-nonexistent.exe".to_string();
        settings.shortcut_dir = dir.path().join("shortcuts");
        settings.cache_dir = dir.path().join("icons");
        std::fs::create_dir_all(&settings.shortcut_dir).unwrap();
        FleetManager::with_settings(settings, dir.path().join("settings.json")).unwrap()
    }

    #[test]
    fn refresh_over_an_empty_world_publishes_an_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let (snapshot, stats) = manager.refresh().unwrap();
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.is_empty());
        assert!(stats.inserted.is_empty());
    }

    #[test]
    fn repeated_refreshes_agree_on_contents() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let (first, _) = manager.refresh().unwrap();
        let (second, _) = manager.refresh().unwrap();
        assert_eq!(second.version, 2);
        assert!(first.same_contents(&second));
    }

    #[test]
    fn a_refresh_pass_does_not_count_as_operator_activity() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        thread::sleep(Duration::from_millis(300));
        let before = manager.activity.idle();
        manager.refresh().unwrap();
        // idle keeps accruing across background refreshes
        assert!(manager.activity.idle() >= before);
    }

    #[test]
    fn operator_commands_reset_the_idle_clock() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        thread::sleep(Duration::from_millis(50));
        let before = manager.activity.idle();
        manager.sync_stop().unwrap();
        assert!(manager.activity.idle() < before);
    }

    #[test]
    fn operations_on_unknown_profiles_are_typed_rejections() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let err = manager.activate(7).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::UnknownProfile(7))
        ));

        let err = manager.sync_start(3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::UnknownProfile(3))
        ));
    }

    #[test]
    fn arranging_nothing_is_a_typed_rejection() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        let err = manager.arrange_grid().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::NothingToArrange)
        ));
    }

    #[test]
    fn a_non_empty_selection_is_remembered_and_persisted() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        manager.remember_selection("1-5,8");
        assert_eq!(manager.read_settings().unwrap().last_selection, "1-5,8");

        let reloaded = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(reloaded.last_selection, "1-5,8");
    }

    #[test]
    fn sync_status_starts_idle() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);
        assert_eq!(manager.sync_status().unwrap(), SyncStatus::Idle);
    }

    #[test]
    fn sync_stop_without_a_session_is_a_clean_no_op() {
        let dir = TempDir::new().unwrap();
        let manager = test_manager(&dir);

        manager.sync_stop().unwrap();
        assert_eq!(manager.sync_status().unwrap(), SyncStatus::Idle);
    }
}
