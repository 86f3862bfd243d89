//! Error taxonomy - typed rejections for operations that must not partially apply

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers as rejected operations.
///
/// Transient OS errors (a process vanishing mid-scan, a window handle dying
/// between enumeration and use) are deliberately NOT represented here; those
/// are skipped where they occur and never abort the surrounding operation.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid profile selection '{input}': {reason}")]
    InvalidSelection { input: String, reason: String },

    #[error("shortcut directory not configured or missing: {0}")]
    ShortcutDirMissing(PathBuf),

    #[error("a sync session is already active (master window {master:#x})")]
    SyncBusy { master: isize },

    #[error("master window {0:#x} is not a live window")]
    MasterGone(isize),

    #[error("no replica windows to mirror into")]
    NoReplicas,

    #[error("a refresh is already in flight")]
    RefreshBusy,

    #[error("no screens available for arrangement")]
    NoScreens,

    #[error("work area {width}x{height} too small for {count} windows")]
    LayoutUnusable {
        width: i32,
        height: i32,
        count: u32,
    },

    #[error("no windows matched the requested arrangement")]
    NothingToArrange,

    #[error("profile {0} is not present in the registry")]
    UnknownProfile(u32),

    #[error("profile {0} has no resolved window")]
    WindowlessProfile(u32),

    #[error("browser executable could not be located")]
    BrowserNotFound,
}
