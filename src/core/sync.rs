//! Sync - mirrors master-window input into replica windows

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

use super::error::FleetError;
use super::profile::{is_master_marked, mark_master_title, strip_master_title, WindowHandle};

/// Accent color requested for the master window frame (0xRRGGBB).
pub const MASTER_ACCENT_RGB: u32 = 0xFF0000;

/// An active mirroring session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    pub master: WindowHandle,
    pub replicas: Vec<WindowHandle>,
}

/// Engine state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Active {
        master: WindowHandle,
        replicas: usize,
    },
}

enum EngineState {
    Idle,
    Active {
        session: SyncSession,
        mirror: crate::platform::InputMirror,
    },
}

/// Owns the process-wide input interception singleton. The Idle/Active state
/// machine exists to prevent double-installation of the OS hook.
pub struct SyncEngine {
    state: Mutex<EngineState>,
    started: Instant,
    last_event_ms: Arc<AtomicU64>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::Idle),
            started: Instant::now(),
            last_event_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> Result<SyncStatus> {
        let state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Sync state lock poisoned: {}", e))?;
        Ok(match &*state {
            EngineState::Idle => SyncStatus::Idle,
            EngineState::Active { session, .. } => SyncStatus::Active {
                master: session.master,
                replicas: session.replicas.len(),
            },
        })
    }

    /// Start mirroring. Refused without state change when a session is
    /// already active, the master window is gone, or no usable replica
    /// remains after filtering.
    pub fn start(&self, master: WindowHandle, replicas: Vec<WindowHandle>) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Sync state lock poisoned: {}", e))?;
        let current = match &*state {
            EngineState::Active { session, .. } => Some(session.master),
            EngineState::Idle => None,
        };
        let replicas = admit(current, master, &replicas, crate::platform::is_window)?;

        self.mark_event();
        let mirror = crate::platform::start_input_mirror(
            master,
            replicas.clone(),
            Arc::clone(&self.last_event_ms),
            self.started,
        )?;
        promote_visuals(master);

        info!(
            "Input sync active: master {:#x} mirrored to {} replicas",
            master,
            replicas.len()
        );
        *state = EngineState::Active {
            session: SyncSession { master, replicas },
            mirror,
        };
        Ok(())
    }

    /// Stop mirroring. Idempotent; the hook is uninstalled synchronously, so
    /// no further events are delivered once this returns.
    pub fn stop(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Sync state lock poisoned: {}", e))?;
        Self::teardown(&mut state)
    }

    /// Swap to Idle and tear the mirror down. Callers hold the state lock,
    /// so a concurrent start cannot overlap the uninstall.
    fn teardown(state: &mut EngineState) -> Result<()> {
        match std::mem::replace(state, EngineState::Idle) {
            EngineState::Idle => Ok(()),
            EngineState::Active { session, mirror } => {
                crate::platform::stop_input_mirror(mirror)?;
                demote_visuals(session.master);
                info!("Input sync stopped for master {:#x}", session.master);
                Ok(())
            }
        }
    }

    /// Promote a different window to master, stopping any active session
    /// first.
    pub fn set_master(&self, master: WindowHandle, replicas: Vec<WindowHandle>) -> Result<()> {
        self.stop()?;
        self.start(master, replicas)
    }

    /// Time since the last mirrored event (or since engine creation when no
    /// event has been seen yet).
    pub fn idle_duration(&self) -> Duration {
        let last = Duration::from_millis(self.last_event_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// Tear the session down when nothing has been mirrored for `max_idle`.
    /// Returns whether a session was released. The idle check and the
    /// teardown share one critical section; a session started concurrently
    /// is left untouched.
    pub fn release_if_idle(&self, max_idle: Duration) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("Sync state lock poisoned: {}", e))?;
        if matches!(&*state, EngineState::Idle) {
            return Ok(false);
        }
        let idle = self.idle_duration();
        if idle < max_idle {
            return Ok(false);
        }
        info!(
            "Releasing input sync after {}s without mirrored events",
            idle.as_secs()
        );
        Self::teardown(&mut state)?;
        Ok(true)
    }

    fn mark_event(&self) {
        self.last_event_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission rules for a new session. Replicas drop the master itself,
/// duplicates, and dead windows while preserving order.
fn admit(
    current: Option<WindowHandle>,
    master: WindowHandle,
    replicas: &[WindowHandle],
    alive: impl Fn(WindowHandle) -> bool,
) -> Result<Vec<WindowHandle>, FleetError> {
    if let Some(active) = current {
        return Err(FleetError::SyncBusy { master: active });
    }
    if !alive(master) {
        return Err(FleetError::MasterGone(master));
    }
    let mut seen = HashSet::new();
    let filtered: Vec<WindowHandle> = replicas
        .iter()
        .copied()
        .filter(|h| *h != master && seen.insert(*h) && alive(*h))
        .collect();
    if filtered.is_empty() {
        return Err(FleetError::NoReplicas);
    }
    Ok(filtered)
}

/// Remap a master client-area point into a replica client area. Equal sizes
/// map 1:1, differing sizes scale proportionally.
pub fn remap_client_point(
    master_size: (i32, i32),
    replica_size: (i32, i32),
    x: i32,
    y: i32,
) -> (i32, i32) {
    if master_size == replica_size || master_size.0 <= 0 || master_size.1 <= 0 {
        return (x, y);
    }
    let rx = (f64::from(x) * f64::from(replica_size.0) / f64::from(master_size.0)).round() as i32;
    let ry = (f64::from(y) * f64::from(replica_size.1) / f64::from(master_size.1)).round() as i32;
    (rx, ry)
}

fn promote_visuals(master: WindowHandle) {
    match crate::platform::get_window_title(master) {
        Ok(title) if !is_master_marked(&title) => {
            if let Err(e) = crate::platform::set_window_title(master, &mark_master_title(&title)) {
                warn!("Could not mark master title: {}", e);
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read master title: {}", e),
    }
    if let Err(e) = crate::platform::set_border_color(master, MASTER_ACCENT_RGB) {
        warn!("Could not set master border color: {}", e);
    }
}

fn demote_visuals(master: WindowHandle) {
    match crate::platform::get_window_title(master) {
        Ok(title) => {
            if let Some(original) = strip_master_title(&title) {
                if let Err(e) = crate::platform::set_window_title(master, &original) {
                    warn!("Could not restore master title: {}", e);
                }
            }
        }
        Err(e) => warn!("Could not read master title: {}", e),
    }
    if let Err(e) = crate::platform::reset_border_color(master) {
        warn!("Could not reset master border color: {}", e);
    }
}
