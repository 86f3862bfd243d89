//! Window resolution - matches visible top-level windows to profile numbers

use std::collections::HashMap;
use tracing::{debug, warn};

use super::profile::WindowHandle;

/// Top-level window class used by the browser's real windows; helper and
/// tooltip windows use other classes.
pub const BROWSER_WINDOW_CLASS: &str = "Chrome_WidgetWin_1";

/// Product name that appears in main-window titles.
pub const PRODUCT_NAME: &str = "Google Chrome";

/// Raw facts about one visible top-level window, as enumerated by the
/// platform layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowProbe {
    pub handle: WindowHandle,
    pub pid: u32,
    pub class_name: String,
    pub title: String,
}

/// The window chosen for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMatch {
    pub handle: WindowHandle,
    pub title: Option<String>,
}

/// Resolve windows for the given pid→number mapping by enumerating the
/// current top-level windows. Enumeration failure degrades to "no windows";
/// the surrounding refresh still completes.
pub fn resolve_windows(pid_to_number: &HashMap<u32, u32>) -> HashMap<u32, WindowMatch> {
    let probes = match crate::platform::enumerate_top_level_windows() {
        Ok(probes) => probes,
        Err(e) => {
            warn!("Window enumeration failed: {}", e);
            return HashMap::new();
        }
    };
    let matches = match_windows(&probes, pid_to_number);
    debug!(
        "Resolved {} windows out of {} probes for {} tracked pids",
        matches.len(),
        probes.len(),
        pid_to_number.len()
    );
    matches
}

/// Pure matching pass over enumerated windows.
///
/// Keeps only browser-class windows whose owning pid belongs to a tracked
/// profile, then picks the best window per profile number.
pub fn match_windows(
    probes: &[WindowProbe],
    pid_to_number: &HashMap<u32, u32>,
) -> HashMap<u32, WindowMatch> {
    let mut matches: HashMap<u32, WindowMatch> = HashMap::new();

    for probe in probes {
        let Some(&number) = pid_to_number.get(&probe.pid) else {
            continue;
        };
        if probe.class_name != BROWSER_WINDOW_CLASS {
            continue;
        }

        let title = normalize_title(&probe.title);
        match matches.get(&number) {
            None => {
                matches.insert(
                    number,
                    WindowMatch {
                        handle: probe.handle,
                        title,
                    },
                );
            }
            Some(current) => {
                if replaces(current.title.as_deref(), title.as_deref()) {
                    matches.insert(
                        number,
                        WindowMatch {
                            handle: probe.handle,
                            title,
                        },
                    );
                }
            }
        }
    }

    matches
}

fn normalize_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Whether a challenger window should replace the currently selected one:
/// any title beats none, and between two product-named titles the longer
/// wins. Everything else keeps the first-seen window.
fn replaces(current: Option<&str>, challenger: Option<&str>) -> bool {
    match (current, challenger) {
        (None, Some(_)) => true,
        (Some(cur), Some(new)) => {
            cur.contains(PRODUCT_NAME) && new.contains(PRODUCT_NAME) && new.len() > cur.len()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(handle: WindowHandle, pid: u32, class: &str, title: &str) -> WindowProbe {
        WindowProbe {
            handle,
            pid,
            class_name: class.to_string(),
            title: title.to_string(),
        }
    }

    fn pid_map(pairs: &[(u32, u32)]) -> HashMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn only_tracked_pids_match() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "a - Google Chrome"),
            probe(0x20, 999, BROWSER_WINDOW_CLASS, "b - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[&1].handle, 0x10);
    }

    #[test]
    fn helper_window_classes_are_filtered_out() {
        let probes = vec![
            probe(0x10, 100, "Chrome_WidgetWin_2", "devtools"),
            probe(0x20, 100, "tooltips_class32", "tip"),
            probe(0x30, 100, BROWSER_WINDOW_CLASS, "real - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 3)]));
        assert_eq!(matches[&3].handle, 0x30);
    }

    #[test]
    fn titled_window_beats_untitled() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, ""),
            probe(0x20, 100, BROWSER_WINDOW_CLASS, "page - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches[&1].handle, 0x20);
        assert_eq!(matches[&1].title.as_deref(), Some("page - Google Chrome"));
    }

    #[test]
    fn longer_product_title_wins() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "x - Google Chrome"),
            probe(0x20, 100, BROWSER_WINDOW_CLASS, "a longer page title - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches[&1].handle, 0x20);
    }

    #[test]
    fn longer_title_without_product_name_does_not_displace() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "x - Google Chrome"),
            probe(0x20, 100, BROWSER_WINDOW_CLASS, "some very long unrelated caption"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches[&1].handle, 0x10);
    }

    #[test]
    fn first_seen_stands_on_equal_footing() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "aa - Google Chrome"),
            probe(0x20, 100, BROWSER_WINDOW_CLASS, "bb - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches[&1].handle, 0x10);
    }

    #[test]
    fn whitespace_only_titles_count_as_untitled() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "   "),
            probe(0x20, 100, BROWSER_WINDOW_CLASS, "t - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1)]));
        assert_eq!(matches[&1].handle, 0x20);
    }

    #[test]
    fn profiles_resolve_independently() {
        let probes = vec![
            probe(0x10, 100, BROWSER_WINDOW_CLASS, "one - Google Chrome"),
            probe(0x20, 200, BROWSER_WINDOW_CLASS, "two - Google Chrome"),
        ];
        let matches = match_windows(&probes, &pid_map(&[(100, 1), (200, 2)]));
        assert_eq!(matches[&1].handle, 0x10);
        assert_eq!(matches[&2].handle, 0x20);
    }
}
