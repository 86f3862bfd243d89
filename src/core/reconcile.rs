//! Reconciliation - merges process scans and window resolution into registry snapshots

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use sysinfo::System;
use tracing::{debug, info};

use super::error::FleetError;
use super::profile::{debug_port_for, Profile};
use super::registry::{Registry, RegistrySnapshot};
use super::resolver::{self, WindowMatch};
use super::scanner::{self, ScanOutcome, ShortcutIndex};

/// What one refresh did, for logs and callers.
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    /// Profile candidates the scan produced
    pub scanned: usize,
    /// Numbers inserted for the first time
    pub inserted: Vec<u32>,
    /// Numbers rebound to a different process
    pub reconfirmed: Vec<u32>,
    /// Profiles that got a window attached this pass
    pub window_bound: usize,
    /// Profiles dropped because their number left the scan (status Stale)
    pub pruned: Vec<Profile>,
    /// Numbers dropped by the final liveness sweep
    pub vanished: Vec<u32>,
}

impl RefreshStats {
    pub fn pruned_numbers(&self) -> Vec<u32> {
        self.pruned.iter().map(|p| p.number).collect()
    }
}

/// Pure merge of one observed world into the previous snapshot.
///
/// `alive` is the liveness probe used by the final sweep; it is a parameter
/// so the merge stays testable without an OS underneath.
pub fn merge_world(
    previous: &RegistrySnapshot,
    scan: &ScanOutcome,
    windows: &HashMap<u32, WindowMatch>,
    alive: impl Fn(u32) -> bool,
    version: u64,
) -> (RegistrySnapshot, RefreshStats) {
    let mut stats = RefreshStats {
        scanned: scan.candidates.len(),
        ..RefreshStats::default()
    };

    // Numbers that left the scan are gone, whatever their previous status.
    for (number, profile) in &previous.profiles {
        if !scan.candidates.contains_key(number) {
            let mut stale = profile.clone();
            stale.mark_stale();
            stats.pruned.push(stale);
        }
    }

    let mut profiles = BTreeMap::new();
    for number in scan.numbers() {
        let candidate = &scan.candidates[&number];
        let mut profile = match previous.profiles.get(&number) {
            None => {
                let mut p = Profile::new(number, candidate.working_directory.clone());
                p.mark_identified(candidate.pid);
                stats.inserted.push(number);
                p
            }
            Some(prev) if prev.process_id == Some(candidate.pid) => {
                let mut p = prev.clone();
                p.working_directory = candidate.working_directory.clone();
                p
            }
            Some(prev) => {
                let mut p = prev.clone();
                p.working_directory = candidate.working_directory.clone();
                p.mark_reconfirmed(candidate.pid);
                stats.reconfirmed.push(number);
                p
            }
        };
        profile.debug_port = debug_port_for(number);

        if let Some(window) = windows.get(&number) {
            profile.mark_window(window.handle, window.title.clone());
            stats.window_bound += 1;
        }
        profiles.insert(number, profile);
    }

    // Race protection: anything that died between the scan and now is dropped
    // rather than published with a dangling pid.
    let dead: Vec<u32> = profiles
        .iter()
        .filter_map(|(number, profile)| match profile.process_id {
            Some(pid) if !alive(pid) => Some(*number),
            _ => None,
        })
        .collect();
    for number in dead {
        profiles.remove(&number);
        stats.vanished.push(number);
    }

    (RegistrySnapshot::assemble(version, profiles), stats)
}

/// Drives refreshes against the live OS. Owns the process-table handle and
/// enforces that refreshes never interleave.
pub struct Reconciler {
    registry: Registry,
    system: Mutex<System>,
    in_flight: AtomicBool,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Reconciler {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            system: Mutex::new(System::new_all()),
            in_flight: AtomicBool::new(false),
        }
    }

    fn try_begin(&self) -> Result<FlightGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FleetError::RefreshBusy.into());
        }
        Ok(FlightGuard(&self.in_flight))
    }

    /// Run one full refresh: scan, resolve, merge, publish.
    ///
    /// A refresh requested while another is in flight is rejected with
    /// `RefreshBusy`; the registry swap is strictly single-writer.
    pub fn refresh(
        &self,
        executable: &str,
        shortcut_dir: &Path,
    ) -> Result<(std::sync::Arc<RegistrySnapshot>, RefreshStats)> {
        let _guard = self.try_begin()?;

        let shortcuts = ShortcutIndex::from_shortcut_dir(shortcut_dir);
        let scan = {
            let mut system = self
                .system
                .lock()
                .map_err(|e| anyhow::anyhow!("Process table lock poisoned: {}", e))?;
            scanner::scan_processes(&mut system, executable, &shortcuts)
        };

        let pid_to_number: HashMap<u32, u32> = scan
            .candidates
            .iter()
            .map(|(number, candidate)| (candidate.pid, *number))
            .collect();
        let windows = resolver::resolve_windows(&pid_to_number);

        let previous = self.registry.snapshot()?;
        let (snapshot, stats) = merge_world(
            &previous,
            &scan,
            &windows,
            crate::platform::is_process_running,
            previous.version + 1,
        );

        self.registry.remove_ports(&stats.pruned_numbers())?;
        let published = self.registry.publish(snapshot)?;

        info!(
            "Refresh v{}: {} profiles ({} new, {} rebound, {} with windows, {} pruned, {} vanished)",
            published.version,
            published.len(),
            stats.inserted.len(),
            stats.reconfirmed.len(),
            stats.window_bound,
            stats.pruned.len(),
            stats.vanished.len()
        );
        debug!(
            "Refresh scanned {} candidates against {} previous profiles",
            stats.scanned,
            previous.len()
        );
        Ok((published, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::ProfileStatus;
    use crate::core::scanner::{admit_candidate, ProcessCandidate};
    use std::path::PathBuf;

    fn scan_of(entries: &[(u32, u32, bool)]) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for (number, pid, primary) in entries {
            admit_candidate(
                &mut outcome.candidates,
                *number,
                ProcessCandidate {
                    pid: *pid,
                    working_directory: PathBuf::from(format!("D:/profiles/{}", number)),
                    is_primary: *primary,
                },
            );
        }
        outcome.examined = entries.len();
        outcome
    }

    fn windows_of(entries: &[(u32, isize, &str)]) -> HashMap<u32, WindowMatch> {
        entries
            .iter()
            .map(|(number, handle, title)| {
                (
                    *number,
                    WindowMatch {
                        handle: *handle,
                        title: (!title.is_empty()).then(|| title.to_string()),
                    },
                )
            })
            .collect()
    }

    fn all_alive(_pid: u32) -> bool {
        true
    }

    fn assert_index_consistent(snapshot: &RegistrySnapshot) {
        for (pid, number) in &snapshot.pid_index {
            let profile = snapshot
                .profiles
                .get(number)
                .expect("index entry points at a present profile");
            assert_eq!(profile.process_id, Some(*pid));
        }
        for profile in snapshot.profiles.values() {
            if let Some(pid) = profile.process_id {
                assert_eq!(snapshot.pid_index.get(&pid), Some(&profile.number));
            }
        }
    }

    // ==================== merge semantics ====================

    #[test]
    fn fresh_numbers_are_inserted_as_identified() {
        let previous = RegistrySnapshot::empty();
        let scan = scan_of(&[(3, 100, true)]);
        let (snap, stats) = merge_world(&previous, &scan, &HashMap::new(), all_alive, 1);

        let p = snap.get(3).unwrap();
        assert_eq!(p.status, ProfileStatus::IdentifiedByProcess);
        assert_eq!(p.process_id, Some(100));
        assert_eq!(p.debug_port, 9225);
        assert_eq!(stats.inserted, vec![3]);
        assert_index_consistent(&snap);
    }

    #[test]
    fn pid_change_rebinds_and_clears_the_window() {
        let previous = {
            let scan = scan_of(&[(3, 100, true)]);
            let windows = windows_of(&[(3, 0x30, "t - Google Chrome")]);
            merge_world(&RegistrySnapshot::empty(), &scan, &windows, all_alive, 1).0
        };
        assert!(previous.get(3).unwrap().has_window());

        let scan = scan_of(&[(3, 200, true)]);
        let (snap, stats) = merge_world(&previous, &scan, &HashMap::new(), all_alive, 2);

        let p = snap.get(3).unwrap();
        assert_eq!(p.process_id, Some(200));
        assert_eq!(p.status, ProfileStatus::ReconfirmedByProcess);
        assert!(p.window_handle.is_none());
        assert_eq!(stats.reconfirmed, vec![3]);
        assert!(!snap.pid_index.contains_key(&100));
        assert_index_consistent(&snap);
    }

    #[test]
    fn window_match_promotes_to_imported() {
        let previous = RegistrySnapshot::empty();
        let scan = scan_of(&[(5, 500, true)]);
        let windows = windows_of(&[(5, 0x50, "page - Google Chrome")]);
        let (snap, stats) = merge_world(&previous, &scan, &windows, all_alive, 1);

        let p = snap.get(5).unwrap();
        assert_eq!(p.status, ProfileStatus::ImportedWithWindow);
        assert_eq!(p.window_handle, Some(0x50));
        assert_eq!(p.title.as_deref(), Some("page - Google Chrome"));
        assert_eq!(stats.window_bound, 1);
    }

    #[test]
    fn window_survives_a_pass_that_resolves_nothing() {
        let scan = scan_of(&[(5, 500, true)]);
        let first = merge_world(
            &RegistrySnapshot::empty(),
            &scan,
            &windows_of(&[(5, 0x50, "t - Google Chrome")]),
            all_alive,
            1,
        )
        .0;

        let (second, _) = merge_world(&first, &scan, &HashMap::new(), all_alive, 2);
        assert_eq!(second.get(5).unwrap().window_handle, Some(0x50));
    }

    // ==================== pruning ====================

    #[test]
    fn registry_3_7_9_drops_7_when_its_process_exits() {
        let scan = scan_of(&[(3, 100, true), (7, 200, true), (9, 300, true)]);
        let previous = merge_world(&RegistrySnapshot::empty(), &scan, &HashMap::new(), all_alive, 1).0;
        assert_eq!(previous.numbers(), vec![3, 7, 9]);

        let scan = scan_of(&[(3, 100, true), (9, 300, true)]);
        let (snap, stats) = merge_world(&previous, &scan, &HashMap::new(), all_alive, 2);

        assert_eq!(snap.numbers(), vec![3, 9]);
        assert!(!snap.pid_index.contains_key(&200));
        assert_eq!(stats.pruned_numbers(), vec![7]);
        assert_eq!(stats.pruned[0].status, ProfileStatus::Stale);
        assert_index_consistent(&snap);
    }

    #[test]
    fn liveness_sweep_drops_processes_that_died_mid_refresh() {
        let scan = scan_of(&[(1, 100, true), (2, 200, true)]);
        let (snap, stats) = merge_world(
            &RegistrySnapshot::empty(),
            &scan,
            &HashMap::new(),
            |pid| pid != 200,
            1,
        );

        assert_eq!(snap.numbers(), vec![1]);
        assert_eq!(stats.vanished, vec![2]);
        assert!(!snap.pid_index.contains_key(&200));
        assert_index_consistent(&snap);
    }

    #[test]
    fn empty_scan_empties_the_registry() {
        let scan = scan_of(&[(1, 100, true)]);
        let previous = merge_world(&RegistrySnapshot::empty(), &scan, &HashMap::new(), all_alive, 1).0;

        let (snap, stats) = merge_world(&previous, &ScanOutcome::default(), &HashMap::new(), all_alive, 2);
        assert!(snap.is_empty());
        assert!(snap.pid_index.is_empty());
        assert_eq!(stats.pruned_numbers(), vec![1]);
    }

    // ==================== idempotence ====================

    #[test]
    fn unchanged_world_produces_identical_contents() {
        let scan = scan_of(&[(3, 100, true), (7, 200, false)]);
        let windows = windows_of(&[(3, 0x30, "a - Google Chrome")]);

        let (first, _) = merge_world(&RegistrySnapshot::empty(), &scan, &windows, all_alive, 1);
        let (second, stats) = merge_world(&first, &scan, &windows, all_alive, 2);

        assert!(first.same_contents(&second));
        assert!(stats.inserted.is_empty());
        assert!(stats.reconfirmed.is_empty());
        assert!(stats.pruned.is_empty());
        assert!(stats.vanished.is_empty());

        let (third, _) = merge_world(&second, &scan, &windows, all_alive, 3);
        assert!(second.same_contents(&third));
    }

    // ==================== flight guard ====================

    #[test]
    fn second_refresh_is_rejected_while_one_is_in_flight() {
        let reconciler = Reconciler::new(Registry::new());
        let guard = reconciler.try_begin().unwrap();

        let second = reconciler.try_begin();
        assert!(second.is_err());

        drop(guard);
        assert!(reconciler.try_begin().is_ok());
    }
}
