//! Platform-specific implementations for Windows, with a Unix process shim

#[cfg(windows)]
pub mod windows;

#[cfg(windows)]
mod input;

#[cfg(unix)]
pub mod unix;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::core::layout::{Rect, ScreenDescriptor};
use crate::core::profile::WindowHandle;
use crate::core::WindowProbe;

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(windows)]
    {
        windows::is_process_running(pid)
    }
    #[cfg(unix)]
    {
        unix::is_process_running(pid)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
        false
    }
}

/// Terminate a process
pub fn terminate_process(pid: u32) -> Result<()> {
    #[cfg(windows)]
    {
        windows::terminate_process(pid)
    }
    #[cfg(unix)]
    {
        unix::terminate_process(pid)
    }
    #[cfg(not(any(windows, unix)))]
    {
        let _ = pid;
        anyhow::bail!("Unsupported platform")
    }
}

/// Enumerate all visible top-level windows with their owning pid, class and
/// title
pub fn enumerate_top_level_windows() -> Result<Vec<WindowProbe>> {
    #[cfg(windows)]
    {
        windows::enumerate_top_level_windows()
    }
    #[cfg(not(windows))]
    {
        anyhow::bail!("Unsupported platform")
    }
}

/// Check if a handle still references a live window
pub fn is_window(handle: WindowHandle) -> bool {
    #[cfg(windows)]
    {
        windows::is_window(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        false
    }
}

/// Move and resize a window
pub fn move_window(handle: WindowHandle, rect: &Rect) -> Result<()> {
    #[cfg(windows)]
    {
        windows::move_window(handle, rect)
    }
    #[cfg(not(windows))]
    {
        let _ = (handle, rect);
        anyhow::bail!("Unsupported platform")
    }
}

/// Ask a window to close gracefully
pub fn post_close(handle: WindowHandle) -> Result<()> {
    #[cfg(windows)]
    {
        windows::post_close(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        anyhow::bail!("Unsupported platform")
    }
}

/// Restore a window and bring it to the foreground
pub fn activate_window(handle: WindowHandle) -> Result<()> {
    #[cfg(windows)]
    {
        windows::activate_window(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        anyhow::bail!("Unsupported platform")
    }
}

/// Flash a window topmost-then-not so it surfaces above the fleet
pub fn flash_topmost(handle: WindowHandle) -> Result<()> {
    #[cfg(windows)]
    {
        windows::flash_topmost(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        anyhow::bail!("Unsupported platform")
    }
}

/// Read a window's title
pub fn get_window_title(handle: WindowHandle) -> Result<String> {
    #[cfg(windows)]
    {
        windows::get_window_title(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        anyhow::bail!("Unsupported platform")
    }
}

/// Replace a window's title
pub fn set_window_title(handle: WindowHandle, title: &str) -> Result<()> {
    #[cfg(windows)]
    {
        windows::set_window_title(handle, title)
    }
    #[cfg(not(windows))]
    {
        let _ = (handle, title);
        anyhow::bail!("Unsupported platform")
    }
}

/// Request a frame accent color (0xRRGGBB) from the OS theming layer
pub fn set_border_color(handle: WindowHandle, rgb: u32) -> Result<()> {
    #[cfg(windows)]
    {
        windows::set_border_color(handle, rgb)
    }
    #[cfg(not(windows))]
    {
        let _ = (handle, rgb);
        anyhow::bail!("Unsupported platform")
    }
}

/// Return a window frame to its default color
pub fn reset_border_color(handle: WindowHandle) -> Result<()> {
    #[cfg(windows)]
    {
        windows::reset_border_color(handle)
    }
    #[cfg(not(windows))]
    {
        let _ = handle;
        anyhow::bail!("Unsupported platform")
    }
}

/// Enumerate attached screens, sorted left to right
pub fn enumerate_screens() -> Result<Vec<ScreenDescriptor>> {
    #[cfg(windows)]
    {
        windows::enumerate_screens()
    }
    #[cfg(not(windows))]
    {
        anyhow::bail!("Unsupported platform")
    }
}

/// Read the argument string stored in a shortcut definition
pub fn read_shortcut_arguments(path: &Path) -> Result<String> {
    #[cfg(windows)]
    {
        windows::read_shortcut_arguments(path)
    }
    #[cfg(not(windows))]
    {
        let _ = path;
        anyhow::bail!("Unsupported platform")
    }
}

/// Copy a shortcut to `dest` with rewritten arguments (and optionally a
/// different icon)
pub fn write_shortcut_copy(
    source: &Path,
    dest: &Path,
    arguments: &str,
    icon: Option<&Path>,
) -> Result<()> {
    #[cfg(windows)]
    {
        windows::write_shortcut_copy(source, dest, arguments, icon)
    }
    #[cfg(not(windows))]
    {
        let _ = (source, dest, arguments, icon);
        anyhow::bail!("Unsupported platform")
    }
}

/// Locate the browser binary by executable name
pub fn find_browser_executable(executable: &str) -> Result<PathBuf> {
    #[cfg(windows)]
    {
        windows::find_browser_executable(executable)
    }
    #[cfg(not(windows))]
    {
        let _ = executable;
        anyhow::bail!("Unsupported platform")
    }
}

/// Opt into per-monitor DPI awareness so window geometry is in real pixels.
/// A no-op where the concept does not exist.
pub fn init_dpi_awareness() -> Result<()> {
    #[cfg(windows)]
    {
        windows::init_dpi_awareness()
    }
    #[cfg(not(windows))]
    {
        Ok(())
    }
}

/// A running input mirror; uninstall with [`stop_input_mirror`].
pub struct InputMirror {
    #[cfg(windows)]
    inner: input::MirrorHandle,
    #[cfg(not(windows))]
    _private: (),
}

#[cfg(test)]
impl InputMirror {
    /// A mirror with no live hook behind it, for engine state tests.
    pub(crate) fn detached() -> Self {
        #[cfg(windows)]
        {
            Self {
                inner: input::MirrorHandle::detached(),
            }
        }
        #[cfg(not(windows))]
        {
            Self { _private: () }
        }
    }
}

/// Install the low-level input hook and start mirroring master input into
/// the replicas. `last_event` is stamped (milliseconds since `epoch`) on
/// every mirrored event.
pub fn start_input_mirror(
    master: WindowHandle,
    replicas: Vec<WindowHandle>,
    last_event: Arc<AtomicU64>,
    epoch: Instant,
) -> Result<InputMirror> {
    #[cfg(windows)]
    {
        Ok(InputMirror {
            inner: input::install(master, replicas, last_event, epoch)?,
        })
    }
    #[cfg(not(windows))]
    {
        let _ = (master, replicas, last_event, epoch);
        anyhow::bail!("Unsupported platform")
    }
}

/// Uninstall the hook synchronously; no callback fires after this returns.
pub fn stop_input_mirror(mirror: InputMirror) -> Result<()> {
    #[cfg(windows)]
    {
        mirror.inner.uninstall()
    }
    #[cfg(not(windows))]
    {
        let _ = mirror;
        Ok(())
    }
}
