//! Launcher - opens and closes fleet profiles through their shortcuts

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{debug, info, warn};

use super::error::FleetError;
use super::monitor::{IconCache, TempFileTracker};
use super::registry::Registry;
use super::settings::Settings;

/// How long a temporary shortcut copy stays on disk after the launch.
const TEMP_SHORTCUT_TTL: Duration = Duration::from_secs(2);

static PORT_SWITCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*--remote-debugging-port=\S+").expect("valid pattern"));

/// Result of an open pass. Per-profile launch failures do not abort the
/// pass; they land in `unavailable`.
#[derive(Debug, Default)]
pub struct LaunchOutcome {
    pub launched: Vec<u32>,
    pub already_running: Vec<u32>,
    pub unavailable: Vec<u32>,
}

/// Result of a close pass.
#[derive(Debug, Default)]
pub struct CloseOutcome {
    /// Closed gracefully through their window
    pub closed: Vec<u32>,
    /// Window was gone; the process was terminated instead
    pub terminated: Vec<u32>,
    /// Not present in the registry
    pub absent: Vec<u32>,
}

/// Opens profiles via their `<N>.lnk` definitions (or the bare browser
/// binary when none exists) and closes them again.
pub struct Launcher {
    registry: Registry,
    temps: TempFileTracker,
    icons: IconCache,
}

impl Launcher {
    pub fn new(registry: Registry, temps: TempFileTracker, icons: IconCache) -> Self {
        Self {
            registry,
            temps,
            icons,
        }
    }

    /// Open the profiles in `selection`, skipping ones already running.
    pub fn open(&self, settings: &Settings, selection: &str, urls: &[String]) -> Result<LaunchOutcome> {
        let numbers = parse_number_selection(selection, settings.max_profile_number)?;
        self.open_numbers(settings, &numbers, urls)
    }

    /// Open a uniform random sample of the launchable profiles.
    pub fn open_random(&self, settings: &Settings, count: usize, urls: &[String]) -> Result<LaunchOutcome> {
        let numbers = self.random_candidates(settings, count)?;
        if numbers.is_empty() {
            info!("No launchable profiles to sample from");
            return Ok(LaunchOutcome::default());
        }
        self.open_numbers(settings, &numbers, urls)
    }

    pub fn open_numbers(
        &self,
        settings: &Settings,
        numbers: &[u32],
        urls: &[String],
    ) -> Result<LaunchOutcome> {
        if !settings.shortcut_dir.is_dir() {
            return Err(FleetError::ShortcutDirMissing(settings.shortcut_dir.clone()).into());
        }
        let snapshot = self.registry.snapshot()?;
        let mut outcome = LaunchOutcome::default();
        for &number in numbers {
            if snapshot.get(number).is_some() {
                debug!("Profile {} is already running", number);
                outcome.already_running.push(number);
                continue;
            }
            let shortcut = shortcut_path(&settings.shortcut_dir, number);
            let launched = if shortcut.is_file() {
                self.launch_from_shortcut(number, &shortcut, urls)
            } else {
                self.launch_direct(settings, number, urls)
            };
            match launched {
                Ok(()) => {
                    outcome.launched.push(number);
                    thread::sleep(Duration::from_millis(settings.launch_delay_ms));
                }
                Err(e) => {
                    warn!("Could not launch profile {}: {:#}", number, e);
                    outcome.unavailable.push(number);
                }
            }
        }
        info!(
            "Open pass launched {} of {} requested profiles",
            outcome.launched.len(),
            numbers.len()
        );
        Ok(outcome)
    }

    /// Close the profiles in `selection`: WM_CLOSE to the window where one
    /// is known, process termination otherwise.
    pub fn close(&self, settings: &Settings, selection: &str) -> Result<CloseOutcome> {
        let numbers = parse_number_selection(selection, settings.max_profile_number)?;
        let snapshot = self.registry.snapshot()?;
        let mut outcome = CloseOutcome::default();
        for number in numbers {
            let Some(profile) = snapshot.get(number) else {
                outcome.absent.push(number);
                continue;
            };
            if let Some(handle) = profile.window_handle {
                match crate::platform::post_close(handle) {
                    Ok(()) => {
                        debug!("Asked profile {} to close", number);
                        outcome.closed.push(number);
                        continue;
                    }
                    Err(e) => warn!("Close request to profile {} failed: {}", number, e),
                }
            }
            match profile.process_id {
                Some(pid) => match crate::platform::terminate_process(pid) {
                    Ok(()) => {
                        debug!("Terminated profile {} (pid {})", number, pid);
                        outcome.terminated.push(number);
                    }
                    Err(e) => warn!("Could not terminate profile {} (pid {}): {}", number, pid, e),
                },
                None => outcome.absent.push(number),
            }
        }
        info!(
            "Close pass: {} graceful, {} terminated, {} not running",
            outcome.closed.len(),
            outcome.terminated.len(),
            outcome.absent.len()
        );
        Ok(outcome)
    }

    /// Numbers with a shortcut on disk and no running profile, ascending.
    pub fn launch_candidates(&self, settings: &Settings) -> Result<Vec<u32>> {
        let snapshot = self.registry.snapshot()?;
        let mut candidates = Vec::new();
        for number in 1..=settings.max_profile_number {
            if snapshot.get(number).is_some() {
                continue;
            }
            if shortcut_path(&settings.shortcut_dir, number).is_file() {
                candidates.push(number);
            }
        }
        Ok(candidates)
    }

    /// Uniform sample of at most `count` launch candidates, ascending.
    pub fn random_candidates(&self, settings: &Settings, count: usize) -> Result<Vec<u32>> {
        let candidates = self.launch_candidates(settings)?;
        let mut rng = rand::thread_rng();
        let mut sampled: Vec<u32> = candidates
            .choose_multiple(&mut rng, count)
            .copied()
            .collect();
        sampled.sort_unstable();
        Ok(sampled)
    }

    fn launch_from_shortcut(&self, number: u32, shortcut: &Path, urls: &[String]) -> Result<()> {
        let arguments = crate::platform::read_shortcut_arguments(shortcut)
            .with_context(|| format!("Reading shortcut for profile {}", number))?;
        let port = self.registry.register_port(number)?;
        let rewritten = rewrite_arguments(&arguments, port, urls);

        let temp = temp_shortcut_path(number);
        let icon = self.icons.locate(number);
        crate::platform::write_shortcut_copy(shortcut, &temp, &rewritten, icon.as_deref())
            .with_context(|| format!("Writing launch shortcut for profile {}", number))?;
        self.temps.track(temp.clone());

        open::that_detached(&temp).with_context(|| format!("Launching profile {}", number))?;
        info!("Launched profile {} on debug port {}", number, port);

        self.schedule_temp_delete(temp);
        Ok(())
    }

    fn launch_direct(&self, settings: &Settings, number: u32, urls: &[String]) -> Result<()> {
        let binary = crate::platform::find_browser_executable(&settings.executable_lowercase())?;
        let port = self.registry.register_port(number)?;
        let data_dir = settings.profile_data_dir.join(number.to_string());
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Creating profile directory for {}", number))?;

        let mut command = std::process::Command::new(&binary);
        command
            .arg(format!("--user-data-dir={}", data_dir.display()))
            .arg(format!("--remote-debugging-port={}", port));
        for url in urls {
            command.arg(url);
        }
        let child = command
            .spawn()
            .with_context(|| format!("Launching {} for profile {}", binary.display(), number))?;
        info!(
            "Launched profile {} directly (pid {}, port {})",
            number,
            child.id(),
            port
        );
        Ok(())
    }

    /// The temp copy is deleted shortly after the shell has consumed it;
    /// anything this misses stays tracked for the medium cleanup tier.
    fn schedule_temp_delete(&self, path: PathBuf) {
        let temps = self.temps.clone();
        thread::spawn(move || {
            thread::sleep(TEMP_SHORTCUT_TTL);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed temp shortcut {}", path.display());
                    temps.forget(&path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => temps.forget(&path),
                Err(e) => warn!(
                    "Temp shortcut {} left for the medium sweep: {}",
                    path.display(),
                    e
                ),
            }
        });
    }
}

/// Parse a numeric selection like `"1-5,8"`. Empty input selects the full
/// configured range; anything malformed rejects the whole selection with no
/// side effects.
pub fn parse_number_selection(input: &str, max: u32) -> Result<Vec<u32>, FleetError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok((1..=max).collect());
    }
    let mut numbers = BTreeSet::new();
    for token in trimmed.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(invalid(input, "empty entry"));
        }
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_bound(input, lo)?;
                let hi = parse_bound(input, hi)?;
                if lo > hi {
                    return Err(invalid(input, format!("descending range {}-{}", lo, hi)));
                }
                check_range(input, lo, max)?;
                check_range(input, hi, max)?;
                numbers.extend(lo..=hi);
            }
            None => {
                let number = parse_bound(input, token)?;
                check_range(input, number, max)?;
                numbers.insert(number);
            }
        }
    }
    Ok(numbers.into_iter().collect())
}

fn parse_bound(input: &str, token: &str) -> Result<u32, FleetError> {
    let token = token.trim();
    token
        .parse::<u32>()
        .map_err(|_| invalid(input, format!("'{}' is not a number", token)))
}

fn check_range(input: &str, number: u32, max: u32) -> Result<(), FleetError> {
    if number == 0 {
        return Err(invalid(input, "profile numbers start at 1"));
    }
    if number > max {
        return Err(invalid(
            input,
            format!("{} is beyond the configured maximum {}", number, max),
        ));
    }
    Ok(())
}

fn invalid(input: &str, reason: impl Into<String>) -> FleetError {
    FleetError::InvalidSelection {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Strip any existing debug-port switch, then append ours and the optional
/// URLs. Quoted values are left untouched.
pub fn rewrite_arguments(arguments: &str, port: u16, urls: &[String]) -> String {
    let mut rewritten = PORT_SWITCH.replace_all(arguments, "").trim().to_string();
    if !rewritten.is_empty() {
        rewritten.push(' ');
    }
    rewritten.push_str(&format!("--remote-debugging-port={}", port));
    for url in urls {
        rewritten.push(' ');
        rewritten.push_str(url);
    }
    rewritten
}

pub fn shortcut_path(shortcut_dir: &Path, number: u32) -> PathBuf {
    shortcut_dir.join(format!("{}.lnk", number))
}

fn temp_shortcut_path(number: u32) -> PathBuf {
    std::env::temp_dir().join(format!("chromefleet-{}.lnk", number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::Profile;
    use crate::core::registry::RegistrySnapshot;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    // ==================== selection parsing ====================

    #[test]
    fn ranges_and_singles_combine_sorted_and_deduped() {
        assert_eq!(
            parse_number_selection("1-5,8", 48).unwrap(),
            vec![1, 2, 3, 4, 5, 8]
        );
        assert_eq!(
            parse_number_selection("8, 3-4, 3", 48).unwrap(),
            vec![3, 4, 8]
        );
        assert_eq!(parse_number_selection(" 7 ", 48).unwrap(), vec![7]);
    }

    #[test]
    fn empty_selection_means_the_full_range() {
        assert_eq!(parse_number_selection("", 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(parse_number_selection("   ", 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn malformed_selections_are_rejected_whole() {
        for bad in ["abc", "1-", "-3", "1,,2", "1-2-3", "5-3", "0", "49", "2-49"] {
            let err = parse_number_selection(bad, 48).unwrap_err();
            assert!(
                matches!(err, FleetError::InvalidSelection { .. }),
                "{} should be invalid",
                bad
            );
        }
    }

    #[test]
    fn bounds_track_the_configured_maximum() {
        assert!(parse_number_selection("10", 10).is_ok());
        assert!(parse_number_selection("11", 10).is_err());
    }

    // ==================== argument rewriting ====================

    #[test]
    fn rewrite_replaces_an_existing_port_switch() {
        let out = rewrite_arguments(
            "--user-data-dir=C:\\P\\7 --remote-debugging-port=9000 --no-first-run",
            9229,
            &[],
        );
        assert_eq!(
            out,
            "--user-data-dir=C:\\P\\7 --no-first-run --remote-debugging-port=9229"
        );
    }

    #[test]
    fn rewrite_appends_to_portless_arguments() {
        let out = rewrite_arguments("--user-data-dir=\"C:\\My Profiles\\7\"", 9225, &[]);
        assert_eq!(
            out,
            "--user-data-dir=\"C:\\My Profiles\\7\" --remote-debugging-port=9225"
        );
    }

    #[test]
    fn rewrite_appends_urls_last() {
        let urls = vec!["https://example.com".to_string()];
        let out = rewrite_arguments("", 9223, &urls);
        assert_eq!(out, "--remote-debugging-port=9223 https://example.com");
    }

    // ==================== candidates ====================

    fn registry_with_running(numbers: &[u32]) -> Registry {
        let registry = Registry::new();
        let profiles: BTreeMap<u32, Profile> = numbers
            .iter()
            .map(|n| {
                let mut p = Profile::new(*n, PathBuf::from(format!("/p/{}", n)));
                p.mark_identified(1000 + n);
                (*n, p)
            })
            .collect();
        registry
            .publish(RegistrySnapshot::assemble(1, profiles))
            .unwrap();
        registry
    }

    fn launcher_for(registry: Registry) -> Launcher {
        Launcher::new(
            registry,
            TempFileTracker::new(),
            IconCache::new(PathBuf::from("/nonexistent")),
        )
    }

    #[test]
    fn candidates_need_a_shortcut_and_no_running_profile() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1.lnk"), b"x").unwrap();
        fs::write(dir.path().join("3.lnk"), b"x").unwrap();
        fs::write(dir.path().join("5.lnk"), b"x").unwrap();

        let mut settings = Settings::default();
        settings.shortcut_dir = dir.path().to_path_buf();
        settings.max_profile_number = 6;

        let launcher = launcher_for(registry_with_running(&[3]));
        assert_eq!(launcher.launch_candidates(&settings).unwrap(), vec![1, 5]);
    }

    #[test]
    fn random_sampling_stays_within_the_candidate_set() {
        let dir = TempDir::new().unwrap();
        for n in [2, 4, 6, 8] {
            fs::write(dir.path().join(format!("{}.lnk", n)), b"x").unwrap();
        }
        let mut settings = Settings::default();
        settings.shortcut_dir = dir.path().to_path_buf();
        settings.max_profile_number = 10;

        let launcher = launcher_for(Registry::new());
        let sampled = launcher.random_candidates(&settings, 2).unwrap();
        assert_eq!(sampled.len(), 2);
        assert!(sampled.iter().all(|n| [2, 4, 6, 8].contains(n)));
        assert!(sampled[0] < sampled[1]);

        // asking for more than exist returns them all
        let all = launcher.random_candidates(&settings, 10).unwrap();
        assert_eq!(all, vec![2, 4, 6, 8]);
    }

    #[test]
    fn open_rejects_a_missing_shortcut_directory() {
        let mut settings = Settings::default();
        settings.shortcut_dir = PathBuf::from("/definitely/not/here");

        let launcher = launcher_for(Registry::new());
        let err = launcher.open(&settings, "1", &[]).unwrap_err();
        assert!(err.downcast_ref::<FleetError>().is_some());
    }
}
