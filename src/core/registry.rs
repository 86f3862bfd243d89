//! Profile registry - immutable versioned snapshots of the fleet state

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::profile::{debug_port_for, Profile, ProfileStatus, WindowHandle};

/// Flat record pushed to listeners after every successful refresh. This is
/// the whole upward interface; rendering is someone else's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileRecord {
    pub number: u32,
    pub process_id: Option<u32>,
    pub window_handle: Option<WindowHandle>,
    pub title: Option<String>,
    pub status: ProfileStatus,
}

/// One immutable registry state. Consumers clone the `Arc` and never observe
/// a mid-update mixture of two refreshes.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Monotonic, bumped on every publish
    pub version: u64,
    /// When this snapshot was produced
    pub refreshed_at: DateTime<Utc>,
    /// Profiles keyed by number; ordered iteration comes for free
    pub profiles: BTreeMap<u32, Profile>,
    /// Reverse index pid → number, rebuilt on every publish
    pub pid_index: HashMap<u32, u32>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            refreshed_at: Utc::now(),
            profiles: BTreeMap::new(),
            pid_index: HashMap::new(),
        }
    }

    /// Assemble a snapshot from its profiles, rebuilding the reverse index so
    /// it cannot drift from the profile set.
    pub fn assemble(version: u64, profiles: BTreeMap<u32, Profile>) -> Self {
        let mut pid_index = HashMap::with_capacity(profiles.len());
        for (number, profile) in &profiles {
            if let Some(pid) = profile.process_id {
                pid_index.insert(pid, *number);
            }
        }
        Self {
            version,
            refreshed_at: Utc::now(),
            profiles,
            pid_index,
        }
    }

    pub fn get(&self, number: u32) -> Option<&Profile> {
        self.profiles.get(&number)
    }

    pub fn number_for_pid(&self, pid: u32) -> Option<u32> {
        self.pid_index.get(&pid).copied()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn numbers(&self) -> Vec<u32> {
        self.profiles.keys().copied().collect()
    }

    /// Profiles with a resolved window, in ascending number order.
    pub fn windowed_profiles(&self) -> Vec<&Profile> {
        self.profiles.values().filter(|p| p.has_window()).collect()
    }

    /// The flat upward-facing form.
    pub fn records(&self) -> Vec<ProfileRecord> {
        self.profiles
            .values()
            .map(|p| ProfileRecord {
                number: p.number,
                process_id: p.process_id,
                window_handle: p.window_handle,
                title: p.title.clone(),
                status: p.status,
            })
            .collect()
    }

    /// Contents equality, ignoring version and timestamp. This is the
    /// idempotence yardstick: two refreshes over an unchanged OS must agree
    /// here exactly.
    pub fn same_contents(&self, other: &Self) -> bool {
        self.profiles == other.profiles && self.pid_index == other.pid_index
    }
}

type Listener = Box<dyn Fn(&RegistrySnapshot) + Send + Sync>;

/// Shared handle to the current snapshot, the listener set, and the
/// debug-port table.
///
/// Only the reconciliation engine publishes; everyone else reads. The port
/// table additionally takes launch-time registrations for profiles that are
/// opening but not yet visible to a scan.
pub struct Registry {
    current: Arc<RwLock<Arc<RegistrySnapshot>>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    ports: Arc<RwLock<HashMap<u32, u16>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(RegistrySnapshot::empty()))),
            listeners: Arc::new(RwLock::new(Vec::new())),
            ports: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The current snapshot; cheap (`Arc` clone).
    pub fn snapshot(&self) -> Result<Arc<RegistrySnapshot>> {
        let guard = self
            .current
            .read()
            .map_err(|e| anyhow::anyhow!("Registry lock poisoned: {}", e))?;
        Ok(Arc::clone(&guard))
    }

    /// Swap in a freshly assembled snapshot and notify listeners.
    pub fn publish(&self, snapshot: RegistrySnapshot) -> Result<Arc<RegistrySnapshot>> {
        let published = Arc::new(snapshot);
        {
            let mut guard = self
                .current
                .write()
                .map_err(|e| anyhow::anyhow!("Registry lock poisoned: {}", e))?;
            *guard = Arc::clone(&published);
        }
        {
            let mut ports = self
                .ports
                .write()
                .map_err(|e| anyhow::anyhow!("Port table lock poisoned: {}", e))?;
            for profile in published.profiles.values() {
                ports.insert(profile.number, profile.debug_port);
            }
        }
        let listeners = self
            .listeners
            .read()
            .map_err(|e| anyhow::anyhow!("Listener lock poisoned: {}", e))?;
        for listener in listeners.iter() {
            listener(&published);
        }
        debug!(
            "Published registry v{} with {} profiles to {} listeners",
            published.version,
            published.len(),
            listeners.len()
        );
        Ok(published)
    }

    /// Register a callback invoked after every successful refresh.
    pub fn subscribe(&self, listener: Listener) -> Result<()> {
        self.listeners
            .write()
            .map_err(|e| anyhow::anyhow!("Listener lock poisoned: {}", e))?
            .push(listener);
        Ok(())
    }

    /// Record a port for a profile that is being launched and may not be
    /// scannable yet.
    pub fn register_port(&self, number: u32) -> Result<u16> {
        let port = debug_port_for(number);
        self.ports
            .write()
            .map_err(|e| anyhow::anyhow!("Port table lock poisoned: {}", e))?
            .insert(number, port);
        Ok(port)
    }

    /// Drop port entries for the given numbers (used when profiles are pruned).
    pub fn remove_ports(&self, numbers: &[u32]) -> Result<()> {
        if numbers.is_empty() {
            return Ok(());
        }
        let mut ports = self
            .ports
            .write()
            .map_err(|e| anyhow::anyhow!("Port table lock poisoned: {}", e))?;
        for number in numbers {
            ports.remove(number);
        }
        Ok(())
    }

    /// Drop port entries for numbers no longer present in the registry;
    /// returns how many were removed. Launch-time registrations that never
    /// materialized into profiles end here.
    pub fn prune_ports(&self) -> Result<usize> {
        let snapshot = self.snapshot()?;
        let mut ports = self
            .ports
            .write()
            .map_err(|e| anyhow::anyhow!("Port table lock poisoned: {}", e))?;
        let before = ports.len();
        ports.retain(|number, _| snapshot.profiles.contains_key(number));
        ports.shrink_to_fit();
        Ok(before - ports.len())
    }

    /// Current port table copy, for external DevTools-speaking collaborators.
    pub fn debug_ports(&self) -> Result<HashMap<u32, u16>> {
        Ok(self
            .ports
            .read()
            .map_err(|e| anyhow::anyhow!("Port table lock poisoned: {}", e))?
            .clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Registry {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            listeners: Arc::clone(&self.listeners),
            ports: Arc::clone(&self.ports),
        }
    }
}
