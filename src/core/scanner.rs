//! Process scanning - discovers browser processes and derives their profile numbers

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, trace};

const USER_DATA_DIR_SWITCH: &str = "--user-data-dir=";
const PROCESS_TYPE_SWITCH: &str = "--type=";

/// Final path segment of the form `<alpha prefix><digits>`, e.g. `profile_12`.
static PREFIXED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z _\-]*(\d+)$").expect("valid pattern"));

/// One process that may own a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub working_directory: PathBuf,
    /// Main browser process (no `--type=` switch) as opposed to a
    /// renderer/GPU/utility subordinate.
    pub is_primary: bool,
}

/// Scanner output: the best candidate found for each profile number.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub candidates: HashMap<u32, ProcessCandidate>,
    /// Processes that matched the executable filter, for diagnostics.
    pub examined: usize,
}

impl ScanOutcome {
    pub fn numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.candidates.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }
}

/// Working directories declared by numbered shortcuts, keyed in normalized
/// form. Last resort of the profile-number fallback chain.
#[derive(Debug, Clone, Default)]
pub struct ShortcutIndex {
    by_dir: HashMap<String, u32>,
}

impl ShortcutIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dir: &Path, number: u32) {
        self.by_dir.insert(normalize_for_match(dir), number);
    }

    pub fn lookup(&self, dir: &Path) -> Option<u32> {
        self.by_dir.get(&normalize_for_match(dir)).copied()
    }

    pub fn len(&self) -> usize {
        self.by_dir.len()
    }

    /// Build the index by reading every `<N>.lnk` in the shortcut directory.
    /// Unreadable or unnumbered shortcuts are skipped.
    pub fn from_shortcut_dir(dir: &Path) -> Self {
        let mut index = Self::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Shortcut directory {} unreadable: {}", dir.display(), e);
                return index;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_lnk = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("lnk"))
                .unwrap_or(false);
            if !is_lnk {
                continue;
            }
            let number = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok());
            let Some(number) = number.filter(|n| *n > 0) else {
                continue;
            };
            match crate::platform::read_shortcut_arguments(&path) {
                Ok(arguments) => {
                    if let Some(dir) = parse_user_data_dir(&arguments) {
                        index.insert(Path::new(&dir), number);
                    }
                }
                Err(e) => {
                    trace!("Skipping unreadable shortcut {}: {}", path.display(), e);
                }
            }
        }
        debug!("Shortcut index holds {} entries", index.len());
        index
    }
}

/// Scan the OS process table for browser processes and map each to a profile
/// number. Single-process failures (vanished mid-scan, unreadable metadata)
/// skip that process only; an empty result is a valid outcome.
pub fn scan_processes(system: &mut System, executable: &str, shortcuts: &ShortcutIndex) -> ScanOutcome {
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::everything(),
    );

    let target = executable.to_lowercase();
    let mut outcome = ScanOutcome::default();

    for (pid, process) in system.processes() {
        let name = process.name().to_string_lossy().to_string();
        if !executable_matches(&name, &target) {
            continue;
        }
        outcome.examined += 1;

        let args: Vec<String> = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect();
        if args.is_empty() {
            trace!("Command line of pid {} unavailable, skipping", pid.as_u32());
            continue;
        }

        let Some(dir) = extract_user_data_dir(&args) else {
            trace!("Pid {} has no parseable user-data-dir, skipping", pid.as_u32());
            continue;
        };
        let Some(number) = derive_profile_number(&dir, shortcuts) else {
            trace!(
                "No profile number derivable from {} (pid {})",
                dir.display(),
                pid.as_u32()
            );
            continue;
        };

        let candidate = ProcessCandidate {
            pid: pid.as_u32(),
            working_directory: dir,
            is_primary: is_primary_process(&args),
        };
        admit_candidate(&mut outcome.candidates, number, candidate);
    }

    debug!(
        "Scan examined {} browser processes, {} profiles identified",
        outcome.examined,
        outcome.candidates.len()
    );
    outcome
}

/// Case-insensitive executable-name match, tolerant of a missing `.exe`.
fn executable_matches(process_name: &str, target_lower: &str) -> bool {
    let name = process_name.to_lowercase();
    let name_stem = name.strip_suffix(".exe").unwrap_or(&name);
    let target_stem = target_lower.strip_suffix(".exe").unwrap_or(target_lower);
    name_stem == target_stem
}

/// Primary (main browser) processes carry no `--type=` switch; everything
/// else is a renderer/GPU/utility/crashpad subordinate.
pub fn is_primary_process(args: &[String]) -> bool {
    !args.iter().any(|a| a.starts_with(PROCESS_TYPE_SWITCH))
}

/// Pull the `--user-data-dir` value out of an argument list.
///
/// Accepts a clean argv element, a quoted path, or an unquoted path with
/// spaces running up to the next `--` switch or end of line.
pub fn extract_user_data_dir(args: &[String]) -> Option<PathBuf> {
    for arg in args {
        if let Some(value) = arg.strip_prefix(USER_DATA_DIR_SWITCH) {
            let clean = value.trim().trim_matches('"');
            if !clean.is_empty() && !clean.contains(" --") && !clean.contains('"') {
                return Some(PathBuf::from(clean));
            }
        }
    }
    // Some launch paths hand the whole command line over as one string, or
    // quoting splits the path across argv elements; reparse the joined form.
    parse_user_data_dir(&args.join(" ")).map(PathBuf::from)
}

/// Tolerant single-string form of the user-data-dir extraction.
pub fn parse_user_data_dir(command_line: &str) -> Option<String> {
    let start = command_line.find(USER_DATA_DIR_SWITCH)? + USER_DATA_DIR_SWITCH.len();
    let rest = &command_line[start..];

    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        let value = &quoted[..end];
        return (!value.is_empty()).then(|| value.to_string());
    }

    let end = rest.find(" --").unwrap_or(rest.len());
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Derive a profile number from a working directory, trying each strategy in
/// order and stopping at the first success.
pub fn derive_profile_number(dir: &Path, shortcuts: &ShortcutIndex) -> Option<u32> {
    numeric_segment(dir)
        .or_else(|| prefixed_segment(dir))
        .or_else(|| shortcuts.lookup(dir))
}

/// Strategy (a): the final path segment is purely numeric.
fn numeric_segment(dir: &Path) -> Option<u32> {
    dir.file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Strategy (b): the final segment is `<alpha prefix><digits>`.
fn prefixed_segment(dir: &Path) -> Option<u32> {
    let segment = dir.file_name().and_then(|s| s.to_str())?;
    let captures = PREFIXED_NUMBER.captures(segment)?;
    captures.get(1)?.as_str().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Admit a candidate into the per-number map. A primary supersedes a
/// subordinate placeholder; otherwise the earlier candidate stands.
pub fn admit_candidate(
    candidates: &mut HashMap<u32, ProcessCandidate>,
    number: u32,
    candidate: ProcessCandidate,
) {
    match candidates.get(&number) {
        None => {
            trace!(
                "Profile {} candidate: pid {} (primary: {})",
                number,
                candidate.pid,
                candidate.is_primary
            );
            candidates.insert(number, candidate);
        }
        Some(existing) if candidate.is_primary && !existing.is_primary => {
            debug!(
                "Profile {}: primary pid {} supersedes subordinate pid {}",
                number, candidate.pid, existing.pid
            );
            candidates.insert(number, candidate);
        }
        Some(existing) => {
            trace!(
                "Profile {}: keeping pid {}, ignoring pid {}",
                number,
                existing.pid,
                candidate.pid
            );
        }
    }
}

/// Lexically normalize a path for equality matching: one separator style,
/// `.`/`..` resolved, case folded, trailing separator dropped.
pub fn normalize_for_match(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let absolute = raw.starts_with('/');

    let mut parts: Vec<String> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                let at_root = parts.len() == 1 && parts[0].ends_with(':');
                if !at_root {
                    parts.pop();
                }
            }
            other => parts.push(other.to_lowercase()),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}
