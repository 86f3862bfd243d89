//! Profile model - numbered browser profiles and their process/window bindings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base TCP port for remote-debugging endpoints; profile N listens on BASE + N.
pub const BASE_DEBUG_PORT: u16 = 9222;

/// Opaque top-level window identifier, valid only on the platform that issued it.
pub type WindowHandle = isize;

/// Title decoration applied to the sync master window.
pub const MASTER_TITLE_PREFIX: &str = "\u{2605} [MASTER] ";
/// Closing half of the master decoration.
pub const MASTER_TITLE_SUFFIX: &str = " \u{2605}";

/// Deterministic debug port for a profile number.
pub fn debug_port_for(number: u32) -> u16 {
    let port = u32::from(BASE_DEBUG_PORT).saturating_add(number);
    port.min(u32::from(u16::MAX)) as u16
}

/// Wrap a window title with the master marker.
pub fn mark_master_title(title: &str) -> String {
    format!("{}{}{}", MASTER_TITLE_PREFIX, title, MASTER_TITLE_SUFFIX)
}

/// Recover the original title from a marked one.
///
/// Returns `None` when the marker is absent, so callers can tell a decorated
/// title apart from a plain one without guessing.
pub fn strip_master_title(title: &str) -> Option<String> {
    title
        .strip_prefix(MASTER_TITLE_PREFIX)
        .and_then(|rest| rest.strip_suffix(MASTER_TITLE_SUFFIX))
        .map(|inner| inner.to_string())
}

/// Whether a title currently carries the master marker.
pub fn is_master_marked(title: &str) -> bool {
    title.starts_with(MASTER_TITLE_PREFIX) && title.ends_with(MASTER_TITLE_SUFFIX)
}

/// How confident the registry is about a profile's bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    /// Discovered but not yet classified by a reconciliation pass
    Unconfirmed,
    /// Matched to a running process for the first time
    IdentifiedByProcess,
    /// Known profile whose owning process changed since the last pass
    ReconfirmedByProcess,
    /// Process match plus a resolved top-level window
    ImportedWithWindow,
    /// Scheduled for removal; its process is gone
    Stale,
}

impl ProfileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unconfirmed => "Unconfirmed",
            Self::IdentifiedByProcess => "Identified",
            Self::ReconfirmedByProcess => "Reconfirmed",
            Self::ImportedWithWindow => "Window bound",
            Self::Stale => "Stale",
        }
    }

}

/// A numbered, isolated browser instance tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile number, unique within the registry
    pub number: u32,
    /// Owning OS process, when one is known
    pub process_id: Option<u32>,
    /// Resolved top-level window, when one is known
    pub window_handle: Option<WindowHandle>,
    /// Isolated data directory this profile runs against
    pub working_directory: PathBuf,
    /// Deterministic remote-debugging port (never persisted, always derived)
    pub debug_port: u16,
    /// Current binding confidence
    pub status: ProfileStatus,
    /// Best-known window title
    pub title: Option<String>,
}

impl Profile {
    pub fn new(number: u32, working_directory: PathBuf) -> Self {
        Self {
            number,
            process_id: None,
            window_handle: None,
            working_directory,
            debug_port: debug_port_for(number),
            status: ProfileStatus::Unconfirmed,
            title: None,
        }
    }

    /// Bind to a process discovered for the first time.
    pub fn mark_identified(&mut self, pid: u32) {
        self.process_id = Some(pid);
        self.status = ProfileStatus::IdentifiedByProcess;
    }

    /// Rebind to a different process; any previously resolved window belonged
    /// to the old process and is dropped.
    pub fn mark_reconfirmed(&mut self, pid: u32) {
        self.process_id = Some(pid);
        self.window_handle = None;
        self.title = None;
        self.status = ProfileStatus::ReconfirmedByProcess;
    }

    /// Attach a resolved top-level window.
    pub fn mark_window(&mut self, handle: WindowHandle, title: Option<String>) {
        self.window_handle = Some(handle);
        self.title = title;
        self.status = ProfileStatus::ImportedWithWindow;
    }

    pub fn mark_stale(&mut self) {
        self.status = ProfileStatus::Stale;
    }

    pub fn has_window(&self) -> bool {
        self.window_handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(number: u32) -> Profile {
        Profile::new(number, PathBuf::from(format!("/profiles/{}", number)))
    }

    #[test]
    fn debug_port_is_base_plus_number() {
        assert_eq!(debug_port_for(0), 9222);
        assert_eq!(debug_port_for(7), 9229);
        assert_eq!(debug_port_for(48), 9270);
    }

    #[test]
    fn debug_port_saturates_instead_of_wrapping() {
        assert_eq!(debug_port_for(u32::MAX), u16::MAX);
    }

    #[test]
    fn new_profile_starts_unconfirmed_with_derived_port() {
        let p = profile(5);
        assert_eq!(p.status, ProfileStatus::Unconfirmed);
        assert_eq!(p.debug_port, 9227);
        assert!(p.process_id.is_none());
        assert!(!p.has_window());
    }

    #[test]
    fn reconfirm_drops_the_stale_window() {
        let mut p = profile(3);
        p.mark_identified(100);
        p.mark_window(0x5010, Some("Tab - Google Chrome".into()));
        assert!(p.has_window());

        p.mark_reconfirmed(200);
        assert_eq!(p.process_id, Some(200));
        assert!(p.window_handle.is_none());
        assert!(p.title.is_none());
        assert_eq!(p.status, ProfileStatus::ReconfirmedByProcess);
    }

    #[test]
    fn master_marker_round_trips() {
        let original = "news - Google Chrome";
        let marked = mark_master_title(original);
        assert!(is_master_marked(&marked));
        assert_eq!(strip_master_title(&marked).as_deref(), Some(original));
    }

    #[test]
    fn strip_refuses_unmarked_titles() {
        assert_eq!(strip_master_title("plain title"), None);
        assert!(!is_master_marked("plain title"));
    }

    #[test]
    fn nested_markers_unwrap_one_layer_at_a_time() {
        let double = mark_master_title(&mark_master_title("t"));
        let once = strip_master_title(&double).unwrap();
        let twice = strip_master_title(&once).unwrap();
        assert_eq!(twice, "t");
    }
}
