//! Settings - the JSON configuration document shared with outer tooling

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Explicit parameters for the custom window arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrangementSettings {
    /// Left edge of the first window, relative to the screen origin
    pub start_x: i32,
    /// Top edge of the first window, relative to the screen origin
    pub start_y: i32,
    /// Window width
    pub width: i32,
    /// Window height
    pub height: i32,
    /// Horizontal gap between windows
    pub h_spacing: i32,
    /// Vertical gap between rows
    pub v_spacing: i32,
    /// Windows per row before wrapping
    pub windows_per_row: u32,
}

impl Default for ArrangementSettings {
    fn default() -> Self {
        Self {
            start_x: 0,
            start_y: 0,
            width: 500,
            height: 400,
            h_spacing: 10,
            v_spacing: 10,
            windows_per_row: 5,
        }
    }
}

/// Thresholds and intervals for the tiered resource monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between monitor polls
    pub poll_secs: u64,
    /// Poll spacing after an iteration error
    pub error_backoff_secs: u64,
    /// Seconds between Light cleanups
    pub light_interval_secs: u64,
    /// Resident-set threshold that arms Medium cleanup (MB)
    pub medium_rss_mb: u64,
    /// Operator idle time required for Medium cleanup (seconds)
    pub medium_idle_secs: u64,
    /// Seconds between Deep cleanups
    pub deep_interval_secs: u64,
    /// Operator idle time required for Deep cleanup (seconds)
    pub deep_idle_secs: u64,
    /// Sync sessions idle longer than this are released by Deep cleanup
    pub sync_release_idle_secs: u64,
    /// On-disk icon-cache entries for inactive profiles older than this are swept (hours)
    pub icon_max_age_hours: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_secs: 10,
            error_backoff_secs: 60,
            light_interval_secs: 300,
            medium_rss_mb: 300,
            medium_idle_secs: 30,
            deep_interval_secs: 3600,
            deep_idle_secs: 120,
            sync_release_idle_secs: 300,
            icon_max_age_hours: 24,
        }
    }
}

/// Orchestrator settings persisted as a JSON document.
///
/// The document is shared with outer tooling; unknown fields are preserved by
/// that tooling, not by us, so loading is lenient (missing fields take
/// defaults) and saving writes only the fields below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Fleet identity
    /// Directory holding the numbered launch shortcuts (`<N>.lnk`)
    pub shortcut_dir: PathBuf,
    /// Directory holding cached per-profile icon files (`<N>.ico`)
    pub cache_dir: PathBuf,
    /// Root for profile data directories created by direct (shortcut-less) launches
    pub profile_data_dir: PathBuf,
    /// Executable name the process scanner filters on
    pub executable_name: String,
    /// Highest profile number the fleet may use
    pub max_profile_number: u32,

    // Operator preferences
    /// Screen selection for arrangement: "auto", "all", or a device name
    pub screen_selection: String,
    /// Last numeric selection entered (e.g. "1-5,8")
    pub last_selection: String,
    /// URLs appended when opening profiles
    pub custom_urls: Vec<String>,

    // Pacing
    /// Delay between successive profile launches (ms)
    pub launch_delay_ms: u64,

    // Layout
    /// Parameters for the custom arrangement
    pub arrangement: ArrangementSettings,

    // Background maintenance
    /// Tiered cleanup thresholds
    pub monitor: MonitorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Fleet identity
            shortcut_dir: default_shortcut_dir(),
            cache_dir: default_cache_dir(),
            profile_data_dir: default_profile_data_dir(),
            executable_name: "chrome.exe".to_string(),
            max_profile_number: 48,

            // Operator preferences
            screen_selection: "auto".to_string(),
            last_selection: String::new(),
            custom_urls: Vec::new(),

            // Pacing
            launch_delay_ms: 100,

            // Layout
            arrangement: ArrangementSettings::default(),

            // Background maintenance
            monitor: MonitorSettings::default(),
        }
    }
}

fn default_shortcut_dir() -> PathBuf {
    dirs::desktop_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chromefleet")
        .join("icons")
}

fn default_profile_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chromefleet")
        .join("profiles")
}

impl Settings {
    /// Default on-disk location of the settings document.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chromefleet")
            .join("settings.json")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    /// A present-but-unreadable document is an error; silently replacing an
    /// operator's configuration would lose it on the next save.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Settings file {} absent, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings at {}", path.display()))?;
        settings.validate();
        Ok(settings)
    }

    /// Save as pretty JSON, atomically (write a sibling temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write settings to {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move settings into {}", path.display()))?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Validate settings and fix any invalid values.
    pub fn validate(&mut self) {
        if self.executable_name.trim().is_empty() {
            warn!("Empty executable name in settings, restoring default");
            self.executable_name = "chrome.exe".to_string();
        }
        self.max_profile_number = self.max_profile_number.clamp(1, 500);
        self.launch_delay_ms = self.launch_delay_ms.clamp(10, 10_000);
        self.monitor.poll_secs = self.monitor.poll_secs.max(1);
        self.monitor.error_backoff_secs = self.monitor.error_backoff_secs.max(self.monitor.poll_secs);
        self.monitor.light_interval_secs = self.monitor.light_interval_secs.max(30);
        self.monitor.deep_interval_secs = self
            .monitor
            .deep_interval_secs
            .max(self.monitor.light_interval_secs);
        self.monitor.medium_rss_mb = self.monitor.medium_rss_mb.max(50);
        if self.arrangement.windows_per_row == 0 {
            self.arrangement.windows_per_row = 1;
        }
        self.arrangement.width = self.arrangement.width.max(50);
        self.arrangement.height = self.arrangement.height.max(50);
    }

    /// Executable name lowered for case-insensitive matching, `.exe` kept.
    pub fn executable_lowercase(&self) -> String {
        self.executable_name.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.executable_name, "chrome.exe");
        assert_eq!(s.max_profile_number, 48);
        assert_eq!(s.monitor.light_interval_secs, 300);
        assert_eq!(s.arrangement.windows_per_row, 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let s = Settings::load(&path).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut s = Settings::default();
        s.last_selection = "1-5,8".to_string();
        s.screen_selection = "all".to_string();
        s.custom_urls = vec!["https://example.com".to_string()];
        s.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, s);
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"last_selection": "3,4"}"#).unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.last_selection, "3,4");
        assert_eq!(s.executable_name, "chrome.exe");
        assert_eq!(s.monitor.poll_secs, 10);
    }

    #[test]
    fn malformed_document_is_an_error_not_a_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let mut s = Settings::default();
        s.executable_name = "  ".to_string();
        s.max_profile_number = 0;
        s.launch_delay_ms = 0;
        s.monitor.poll_secs = 0;
        s.arrangement.windows_per_row = 0;
        s.validate();

        assert_eq!(s.executable_name, "chrome.exe");
        assert_eq!(s.max_profile_number, 1);
        assert_eq!(s.launch_delay_ms, 10);
        assert_eq!(s.monitor.poll_secs, 1);
        assert_eq!(s.arrangement.windows_per_row, 1);
    }
}
