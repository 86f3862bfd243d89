//! Windows implementation - process probes, window control, screen
//! enumeration, shortcut (.lnk) plumbing and browser discovery

use std::mem;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;
use windows::core::{Interface, HSTRING};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, COLORREF, FALSE, HWND, LPARAM, POINT, RECT, TRUE, WPARAM,
};
use windows::Win32::Graphics::Dwm::{DwmSetWindowAttribute, DWMWA_BORDER_COLOR};
use windows::Win32::Graphics::Gdi::{
    ClientToScreen, EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO,
    MONITORINFOEXW, MONITORINFOF_PRIMARY,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, IPersistFile, CLSCTX_INPROC_SERVER,
    COINIT_APARTMENTTHREADED, STGM_READ,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE,
};
use windows::Win32::UI::HiDpi::{SetProcessDpiAwareness, PROCESS_PER_MONITOR_DPI_AWARE};
use windows::Win32::UI::Shell::{IShellLinkW, ShellLink};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetClientRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, PostMessageW,
    SetForegroundWindow, SetWindowPos, SetWindowTextW, ShowWindow, HWND_NOTOPMOST, HWND_TOPMOST,
    SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SW_RESTORE, WM_CLOSE,
};
use winreg::enums::HKEY_LOCAL_MACHINE;
use winreg::RegKey;

use crate::core::layout::{Rect, ScreenDescriptor};
use crate::core::profile::WindowHandle;
use crate::core::{FleetError, WindowProbe};

/// Check if a process is running
pub fn is_process_running(pid: u32) -> bool {
    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) {
            Ok(h) => h,
            Err(_) => return false,
        };

        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle).ok();

        // STILL_ACTIVE = 259
        result.is_ok() && exit_code == 259
    }
}

/// Forcefully terminate a process
pub fn terminate_process(pid: u32) -> Result<()> {
    unsafe {
        let handle =
            OpenProcess(PROCESS_TERMINATE, FALSE, pid).context("Failed to open process")?;

        let result = TerminateProcess(handle, 1);
        CloseHandle(handle)?;

        if result.is_ok() {
            Ok(())
        } else {
            anyhow::bail!("Failed to terminate process {}", pid)
        }
    }
}

/// Enumerate every visible top-level window with its owning pid, class name
/// and title. Windows that vanish mid-enumeration simply drop out.
pub fn enumerate_top_level_windows() -> Result<Vec<WindowProbe>> {
    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let probes = &mut *(lparam.0 as *mut Vec<WindowProbe>);

        if !IsWindowVisible(hwnd).as_bool() {
            return TRUE;
        }

        let mut pid: u32 = 0;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid == 0 {
            return TRUE;
        }

        let mut class_buf = [0u16; 256];
        let class_len = GetClassNameW(hwnd, &mut class_buf) as usize;
        let mut title_buf = [0u16; 512];
        let title_len = GetWindowTextW(hwnd, &mut title_buf) as usize;

        probes.push(WindowProbe {
            handle: hwnd.0 as isize,
            pid,
            class_name: String::from_utf16_lossy(&class_buf[..class_len]),
            title: String::from_utf16_lossy(&title_buf[..title_len]),
        });
        TRUE
    }

    let mut probes: Vec<WindowProbe> = Vec::new();
    unsafe {
        EnumWindows(
            Some(enum_callback),
            LPARAM(&mut probes as *mut Vec<WindowProbe> as isize),
        )
        .context("Window enumeration failed")?;
    }
    Ok(probes)
}

/// Check whether a handle still names a live window
pub fn is_window(handle: WindowHandle) -> bool {
    unsafe { IsWindow(to_hwnd(handle)).as_bool() }
}

/// Move and resize a window, restoring it first if minimized
pub fn move_window(handle: WindowHandle, rect: &Rect) -> Result<()> {
    unsafe {
        let hwnd = to_hwnd(handle);
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        SetWindowPos(
            hwnd,
            HWND::default(),
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            SWP_NOZORDER | SWP_NOACTIVATE,
        )
        .with_context(|| format!("Failed to move window {:#x}", handle))
    }
}

/// Ask a window to close gracefully
pub fn post_close(handle: WindowHandle) -> Result<()> {
    unsafe {
        PostMessageW(to_hwnd(handle), WM_CLOSE, WPARAM(0), LPARAM(0))
            .with_context(|| format!("Failed to post WM_CLOSE to window {:#x}", handle))
    }
}

/// Restore a window and bring it to the foreground
pub fn activate_window(handle: WindowHandle) -> Result<()> {
    unsafe {
        let hwnd = to_hwnd(handle);
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        SetForegroundWindow(hwnd)
            .ok()
            .with_context(|| format!("Failed to bring window {:#x} to the foreground", handle))
    }
}

/// Pop a window above the rest of the fleet briefly, then release it so the
/// normal z-order resumes
pub fn flash_topmost(handle: WindowHandle) -> Result<()> {
    unsafe {
        let hwnd = to_hwnd(handle);
        if IsIconic(hwnd).as_bool() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
        }
        SetWindowPos(hwnd, HWND_TOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE)
            .with_context(|| format!("Failed to raise window {:#x}", handle))?;
        thread::sleep(Duration::from_millis(150));
        SetWindowPos(hwnd, HWND_NOTOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE)
            .with_context(|| format!("Failed to release window {:#x}", handle))
    }
}

/// Read a window's current title. A window with no title reads as ""
pub fn get_window_title(handle: WindowHandle) -> Result<String> {
    unsafe {
        let hwnd = to_hwnd(handle);
        let len = GetWindowTextLengthW(hwnd);
        if len <= 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u16; len as usize + 1];
        let copied = GetWindowTextW(hwnd, &mut buf) as usize;
        Ok(String::from_utf16_lossy(&buf[..copied]))
    }
}

/// Replace a window's title
pub fn set_window_title(handle: WindowHandle, title: &str) -> Result<()> {
    unsafe {
        SetWindowTextW(to_hwnd(handle), &HSTRING::from(title))
            .with_context(|| format!("Failed to set title on window {:#x}", handle))
    }
}

// DWM sentinel that hands frame color control back to the system.
const DWMWA_COLOR_DEFAULT: u32 = 0xFFFF_FFFF;

/// Paint a window's frame with an accent color (0xRRGGBB)
pub fn set_border_color(handle: WindowHandle, rgb: u32) -> Result<()> {
    apply_border_color(handle, COLORREF(rgb_to_colorref(rgb)))
}

/// Return a window's frame to the system-chosen color
pub fn reset_border_color(handle: WindowHandle) -> Result<()> {
    apply_border_color(handle, COLORREF(DWMWA_COLOR_DEFAULT))
}

fn apply_border_color(handle: WindowHandle, color: COLORREF) -> Result<()> {
    unsafe {
        let hwnd = to_hwnd(handle);
        DwmSetWindowAttribute(
            hwnd,
            DWMWA_BORDER_COLOR,
            &color as *const COLORREF as *const std::ffi::c_void,
            mem::size_of::<COLORREF>() as u32,
        )
        .with_context(|| format!("Failed to recolor frame of window {:#x}", handle))?;

        // Nudge the frame so the new color paints immediately.
        let _ = SetWindowPos(
            hwnd,
            HWND::default(),
            0,
            0,
            0,
            0,
            SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE | SWP_FRAMECHANGED,
        );
        Ok(())
    }
}

/// DWM wants COLORREF byte order (0x00BBGGRR); callers speak 0xRRGGBB.
fn rgb_to_colorref(rgb: u32) -> u32 {
    ((rgb & 0x0000_FF) << 16) | (rgb & 0x00_FF00) | ((rgb >> 16) & 0xFF)
}

/// Enumerate attached monitors, ordered left to right. `id` is the display
/// device name (`\\.\DISPLAY1` style), which settings may reference
pub fn enumerate_screens() -> Result<Vec<ScreenDescriptor>> {
    unsafe extern "system" fn enum_callback(
        monitor: HMONITOR,
        _hdc: HDC,
        _clip: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let screens = &mut *(lparam.0 as *mut Vec<ScreenDescriptor>);

        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;
        if GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO).as_bool()
        {
            screens.push(ScreenDescriptor {
                id: utf16_until_nul(&info.szDevice),
                rect: rect_from(info.monitorInfo.rcMonitor),
                work: rect_from(info.monitorInfo.rcWork),
                is_primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
            });
        }
        TRUE
    }

    let mut screens: Vec<ScreenDescriptor> = Vec::new();
    unsafe {
        EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(enum_callback),
            LPARAM(&mut screens as *mut Vec<ScreenDescriptor> as isize),
        )
        .ok()
        .context("Monitor enumeration failed")?;
    }
    screens.sort_by_key(|screen| (screen.rect.x, screen.rect.y));
    Ok(screens)
}

/// Scoped COM apartment for the shell-link calls below.
struct ComApartment;

impl ComApartment {
    fn enter() -> Result<Self> {
        unsafe {
            CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                .ok()
                .context("COM initialization failed")?;
        }
        Ok(Self)
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Read the argument string stored in a `.lnk` file
pub fn read_shortcut_arguments(path: &Path) -> Result<String> {
    let _com = ComApartment::enter()?;
    unsafe {
        let link: IShellLinkW = CoCreateInstance(&ShellLink, None, CLSCTX_INPROC_SERVER)
            .context("Failed to create shell link object")?;
        let persist: IPersistFile = link.cast().context("Shell link lacks IPersistFile")?;
        persist
            .Load(&HSTRING::from(path.as_os_str()), STGM_READ)
            .with_context(|| format!("Failed to load shortcut {}", path.display()))?;

        let mut buf = [0u16; 1024];
        link.GetArguments(&mut buf)
            .with_context(|| format!("Failed to read arguments of {}", path.display()))?;
        Ok(utf16_until_nul(&buf))
    }
}

/// Write a copy of `source` at `dest` carrying `arguments` and, optionally,
/// a different icon. The source shortcut itself is never modified
pub fn write_shortcut_copy(
    source: &Path,
    dest: &Path,
    arguments: &str,
    icon: Option<&Path>,
) -> Result<()> {
    let _com = ComApartment::enter()?;
    unsafe {
        let link: IShellLinkW = CoCreateInstance(&ShellLink, None, CLSCTX_INPROC_SERVER)
            .context("Failed to create shell link object")?;
        let persist: IPersistFile = link.cast().context("Shell link lacks IPersistFile")?;
        persist
            .Load(&HSTRING::from(source.as_os_str()), STGM_READ)
            .with_context(|| format!("Failed to load shortcut {}", source.display()))?;

        link.SetArguments(&HSTRING::from(arguments))
            .context("Failed to set shortcut arguments")?;
        if let Some(icon) = icon {
            if let Err(e) = link.SetIconLocation(&HSTRING::from(icon.as_os_str()), 0) {
                warn!("Could not assign icon {} to shortcut: {}", icon.display(), e);
            }
        }

        persist
            .Save(&HSTRING::from(dest.as_os_str()), TRUE)
            .with_context(|| format!("Failed to save shortcut {}", dest.display()))?;
    }
    Ok(())
}

/// Locate the browser binary: the App Paths registration first, then the
/// conventional install roots
pub fn find_browser_executable(executable: &str) -> Result<PathBuf> {
    let app_paths = format!(
        r"SOFTWARE\Microsoft\Windows\CurrentVersion\App Paths\{}",
        executable
    );
    if let Ok(key) = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(&app_paths) {
        if let Ok(target) = key.get_value::<String, _>("") {
            let target = PathBuf::from(target.trim_matches('"'));
            if target.is_file() {
                return Ok(target);
            }
        }
    }

    for root in ["ProgramFiles", "ProgramFiles(x86)", "LocalAppData"] {
        if let Some(base) = std::env::var_os(root) {
            let candidate = PathBuf::from(base)
                .join("Google")
                .join("Chrome")
                .join("Application")
                .join(executable);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(FleetError::BrowserNotFound.into())
}

/// Per-monitor DPI awareness keeps window coordinates in physical pixels
/// across mixed-DPI screens
pub fn init_dpi_awareness() -> Result<()> {
    unsafe {
        SetProcessDpiAwareness(PROCESS_PER_MONITOR_DPI_AWARE)
            .context("Failed to set DPI awareness")
    }
}

pub(crate) fn to_hwnd(handle: WindowHandle) -> HWND {
    HWND(handle as *mut std::ffi::c_void)
}

/// Client-area size in pixels, or `None` once the window is gone.
pub(crate) fn client_size(handle: WindowHandle) -> Option<(i32, i32)> {
    unsafe {
        let mut rect = RECT::default();
        GetClientRect(to_hwnd(handle), &mut rect).ok()?;
        Some((rect.right - rect.left, rect.bottom - rect.top))
    }
}

/// Screen position of a window's client-area origin.
pub(crate) fn client_origin(handle: WindowHandle) -> Option<(i32, i32)> {
    unsafe {
        let mut point = POINT::default();
        if !ClientToScreen(to_hwnd(handle), &mut point).as_bool() {
            return None;
        }
        Some((point.x, point.y))
    }
}

fn rect_from(rect: RECT) -> Rect {
    Rect::new(
        rect.left,
        rect.top,
        rect.right - rect.left,
        rect.bottom - rect.top,
    )
}

fn utf16_until_nul(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorref_swaps_red_and_blue() {
        assert_eq!(rgb_to_colorref(0xFF0000), 0x0000FF);
        assert_eq!(rgb_to_colorref(0x0000FF), 0xFF0000);
        assert_eq!(rgb_to_colorref(0x00FF00), 0x00FF00);
        assert_eq!(rgb_to_colorref(0x123456), 0x563412);
    }

    #[test]
    fn utf16_stops_at_the_first_nul() {
        assert_eq!(utf16_until_nul(&[0x61, 0x62, 0, 0x63]), "ab");
        assert_eq!(utf16_until_nul(&[0x61, 0x62]), "ab");
        assert_eq!(utf16_until_nul(&[0]), "");
    }
}
