//! Low-level input mirroring - a keyboard/mouse hook on a dedicated thread
//! feeds a bounded queue; a worker remaps coordinates and posts the events
//! into every replica window

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::SystemServices::{MK_LBUTTON, MK_MBUTTON, MK_RBUTTON};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetForegroundWindow, GetMessageW, PostMessageW, PostThreadMessageW,
    SetWindowsHookExW, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT, LLKHF_EXTENDED,
    LLKHF_INJECTED, LLMHF_INJECTED, MSG, MSLLHOOKSTRUCT, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_KEYUP,
    WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEHWHEEL, WM_MOUSEMOVE,
    WM_MOUSEWHEEL, WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use crate::core::profile::WindowHandle;
use crate::core::sync::remap_client_point;

use super::windows::{client_origin, client_size, to_hwnd};

// The hook thread must never block, so a full queue drops the event instead.
const EVENT_QUEUE_DEPTH: usize = 512;

// Window geometry is sampled at most this often while events flow.
const GEOMETRY_TTL: Duration = Duration::from_millis(250);

const MIRRORED_MOUSE: [u32; 9] = [
    WM_LBUTTONDOWN,
    WM_LBUTTONUP,
    WM_RBUTTONDOWN,
    WM_RBUTTONUP,
    WM_MBUTTONDOWN,
    WM_MBUTTONUP,
    WM_MOUSEMOVE,
    WM_MOUSEWHEEL,
    WM_MOUSEHWHEEL,
];

#[derive(Debug, Clone, Copy)]
enum MirrorEvent {
    Key {
        message: u32,
        vk: u32,
        scan: u32,
        extended: bool,
    },
    Mouse {
        message: u32,
        screen_x: i32,
        screen_y: i32,
        wheel: i16,
    },
}

/// What the hook procedures need. Low-level hooks carry no user data, so
/// this lives in a process global; only one mirror can be installed at a
/// time.
#[derive(Clone)]
struct HookShared {
    master: WindowHandle,
    tx: SyncSender<MirrorEvent>,
    last_event: Arc<AtomicU64>,
    epoch: Instant,
}

static ACTIVE: Mutex<Option<HookShared>> = Mutex::new(None);

/// A running mirror. `uninstall` tears both threads down synchronously.
pub(super) struct MirrorHandle {
    hook_thread: JoinHandle<()>,
    hook_thread_id: u32,
    worker: JoinHandle<()>,
}

pub(super) fn install(
    master: WindowHandle,
    replicas: Vec<WindowHandle>,
    last_event: Arc<AtomicU64>,
    epoch: Instant,
) -> Result<MirrorHandle> {
    let (tx, rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);

    {
        let mut active = ACTIVE
            .lock()
            .map_err(|e| anyhow::anyhow!("Input hook state lock poisoned: {}", e))?;
        if active.is_some() {
            anyhow::bail!("An input mirror is already installed");
        }
        *active = Some(HookShared {
            master,
            tx,
            last_event,
            epoch,
        });
    }

    let worker = thread::spawn(move || worker_main(master, replicas, rx));

    let (ready_tx, ready_rx) = mpsc::channel();
    let hook_thread = thread::spawn(move || hook_thread_main(ready_tx));

    match ready_rx.recv() {
        Ok(Ok(hook_thread_id)) => Ok(MirrorHandle {
            hook_thread,
            hook_thread_id,
            worker,
        }),
        Ok(Err(e)) => {
            clear_shared();
            let _ = hook_thread.join();
            let _ = worker.join();
            Err(e)
        }
        Err(_) => {
            clear_shared();
            let _ = hook_thread.join();
            let _ = worker.join();
            anyhow::bail!("The hook thread exited before reporting readiness")
        }
    }
}

impl MirrorHandle {
    /// Stop mirroring. When this returns both hooks are removed and no
    /// further events will be delivered.
    pub(super) fn uninstall(self) -> Result<()> {
        // Dropping the shared state stops event production and disconnects
        // the worker's queue.
        clear_shared();
        if let Err(e) =
            unsafe { PostThreadMessageW(self.hook_thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
        {
            // A thread stuck in GetMessageW cannot be joined without the
            // quit message; the hooks are already inert.
            warn!("Could not signal the hook thread: {}", e);
            return Ok(());
        }
        if self.hook_thread.join().is_err() {
            anyhow::bail!("The hook thread panicked");
        }
        if self.worker.join().is_err() {
            anyhow::bail!("The mirror worker panicked");
        }
        Ok(())
    }
}

#[cfg(test)]
impl MirrorHandle {
    /// A handle whose threads are already gone and whose thread id points
    /// nowhere.
    pub(super) fn detached() -> Self {
        Self {
            hook_thread: thread::spawn(|| {}),
            hook_thread_id: 0,
            worker: thread::spawn(|| {}),
        }
    }
}

fn clear_shared() {
    if let Ok(mut active) = ACTIVE.lock() {
        *active = None;
    }
}

// ============================================================================
// Hook thread
// ============================================================================

fn hook_thread_main(ready: mpsc::Sender<Result<u32>>) {
    let hooks = match install_hooks() {
        Ok(hooks) => hooks,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(unsafe { GetCurrentThreadId() }));

    unsafe {
        let mut msg = MSG::default();
        // Returns 0 on WM_QUIT and -1 on error; both end the loop.
        while GetMessageW(&mut msg, HWND::default(), 0, 0).0 > 0 {}
        let _ = UnhookWindowsHookEx(hooks.0);
        let _ = UnhookWindowsHookEx(hooks.1);
    }
}

fn install_hooks() -> Result<(HHOOK, HHOOK)> {
    unsafe {
        let module = GetModuleHandleW(None).context("Failed to resolve the module handle")?;
        let keyboard = SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), module, 0)
            .context("Failed to install the keyboard hook")?;
        let mouse = match SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), module, 0) {
            Ok(mouse) => mouse,
            Err(e) => {
                let _ = UnhookWindowsHookEx(keyboard);
                return Err(e).context("Failed to install the mouse hook");
            }
        };
        Ok((keyboard, mouse))
    }
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let event = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
        if !event.flags.contains(LLKHF_INJECTED) {
            forward(MirrorEvent::Key {
                message: wparam.0 as u32,
                vk: event.vkCode,
                scan: event.scanCode,
                extended: event.flags.contains(LLKHF_EXTENDED),
            });
        }
    }
    CallNextHookEx(HHOOK::default(), code, wparam, lparam)
}

unsafe extern "system" fn mouse_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let event = &*(lparam.0 as *const MSLLHOOKSTRUCT);
        let message = wparam.0 as u32;
        if event.flags & LLMHF_INJECTED == 0 && MIRRORED_MOUSE.contains(&message) {
            // Wheel delta rides the high word of mouseData.
            forward(MirrorEvent::Mouse {
                message,
                screen_x: event.pt.x,
                screen_y: event.pt.y,
                wheel: (event.mouseData >> 16) as i16,
            });
        }
    }
    CallNextHookEx(HHOOK::default(), code, wparam, lparam)
}

/// Runs on the hook thread for every physical input event; must not block.
fn forward(event: MirrorEvent) {
    if let Ok(guard) = ACTIVE.lock() {
        if let Some(shared) = guard.as_ref() {
            // Only input aimed at the master is mirrored.
            if unsafe { GetForegroundWindow().0 as isize } != shared.master {
                return;
            }
            shared
                .last_event
                .store(shared.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
            let _ = shared.tx.try_send(event);
        }
    }
}

// ============================================================================
// Mirror worker
// ============================================================================

struct Geometry {
    master_origin: (i32, i32),
    master_size: (i32, i32),
    replicas: Vec<(WindowHandle, (i32, i32))>,
    fetched: Instant,
}

fn worker_main(master: WindowHandle, replicas: Vec<WindowHandle>, rx: Receiver<MirrorEvent>) {
    let mut geometry: Option<Geometry> = None;

    while let Ok(event) = rx.recv() {
        match event {
            MirrorEvent::Key {
                message,
                vk,
                scan,
                extended,
            } => {
                let lparam = key_lparam(message, scan, extended);
                for &replica in &replicas {
                    post(replica, message, vk as usize, lparam);
                }
            }
            MirrorEvent::Mouse {
                message,
                screen_x,
                screen_y,
                wheel,
            } => {
                let refresh = geometry
                    .as_ref()
                    .map_or(true, |geo| geo.fetched.elapsed() > GEOMETRY_TTL);
                if refresh {
                    geometry = measure(master, &replicas);
                }
                let geo = match geometry.as_ref() {
                    Some(geo) => geo,
                    None => continue,
                };

                let client_x = screen_x - geo.master_origin.0;
                let client_y = screen_y - geo.master_origin.1;
                for &(replica, size) in &geo.replicas {
                    let (x, y) = remap_client_point(geo.master_size, size, client_x, client_y);
                    deliver_mouse(replica, message, wheel, x, y);
                }
            }
        }
    }
}

fn measure(master: WindowHandle, replicas: &[WindowHandle]) -> Option<Geometry> {
    let master_origin = client_origin(master)?;
    let master_size = client_size(master)?;
    let mut sized = Vec::with_capacity(replicas.len());
    for &replica in replicas {
        if let Some(size) = client_size(replica) {
            sized.push((replica, size));
        }
    }
    Some(Geometry {
        master_origin,
        master_size,
        replicas: sized,
        fetched: Instant::now(),
    })
}

fn deliver_mouse(replica: WindowHandle, message: u32, wheel: i16, x: i32, y: i32) {
    let wparam = match message {
        WM_LBUTTONDOWN => MK_LBUTTON.0 as usize,
        WM_RBUTTONDOWN => MK_RBUTTON.0 as usize,
        WM_MBUTTONDOWN => MK_MBUTTON.0 as usize,
        WM_MOUSEWHEEL | WM_MOUSEHWHEEL => (wheel as u16 as usize) << 16,
        _ => 0,
    };
    let lparam = match message {
        // Wheel messages carry screen coordinates; everything else is
        // client-relative.
        WM_MOUSEWHEEL | WM_MOUSEHWHEEL => match client_origin(replica) {
            Some((ox, oy)) => make_point_lparam(ox + x, oy + y),
            None => return,
        },
        _ => make_point_lparam(x, y),
    };
    post(replica, message, wparam, lparam);
}

fn post(replica: WindowHandle, message: u32, wparam: usize, lparam: isize) {
    unsafe {
        if let Err(e) = PostMessageW(to_hwnd(replica), message, WPARAM(wparam), LPARAM(lparam)) {
            debug!("Dropped mirrored event for window {:#x}: {}", replica, e);
        }
    }
}

/// Rebuild the key-message LPARAM: repeat count 1, the scan code, the
/// extended-key bit, and the previous-state/transition bits for key-ups.
fn key_lparam(message: u32, scan: u32, extended: bool) -> isize {
    let mut lparam: u32 = 1 | (scan & 0xFF) << 16;
    if extended {
        lparam |= 1 << 24;
    }
    if message == WM_SYSKEYDOWN || message == WM_SYSKEYUP {
        lparam |= 1 << 29;
    }
    if message == WM_KEYUP || message == WM_SYSKEYUP {
        lparam |= 0xC000_0000;
    }
    lparam as isize
}

/// Pack coordinates into a message LPARAM (x low word, y high word), with
/// MAKELPARAM's truncation to signed 16-bit words.
fn make_point_lparam(x: i32, y: i32) -> isize {
    let x = (x as i16) as u16 as u32;
    let y = (y as i16) as u16 as u32;
    ((y << 16) | x) as isize
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::UI::WindowsAndMessaging::WM_KEYDOWN;

    #[test]
    fn key_lparam_marks_transitions() {
        assert_eq!(key_lparam(WM_KEYDOWN, 0x1E, false), 0x001E_0001);
        let up = key_lparam(WM_KEYUP, 0x1E, false) as u32;
        assert_eq!(up & 0xC000_0000, 0xC000_0000);
        assert_eq!(up & 0x00FF_0000, 0x001E_0000);
    }

    #[test]
    fn extended_keys_set_bit_24() {
        let lparam = key_lparam(WM_KEYDOWN, 0x50, true) as u32;
        assert_ne!(lparam & (1 << 24), 0);
    }

    #[test]
    fn sys_keys_set_the_context_bit() {
        let lparam = key_lparam(WM_SYSKEYDOWN, 0x38, false) as u32;
        assert_ne!(lparam & (1 << 29), 0);
    }

    #[test]
    fn point_lparam_packs_signed_words() {
        assert_eq!(make_point_lparam(10, 20), (20 << 16) | 10);
        let packed = make_point_lparam(-5, 7) as u32;
        assert_eq!(packed & 0xFFFF, 0xFFFB);
        assert_eq!(packed >> 16, 7);
    }

    #[test]
    fn uninstall_tolerates_an_unreachable_hook_thread() {
        // No thread ever has id 0, so the quit post fails; teardown must
        // still come back instead of hanging on a join.
        assert!(MirrorHandle::detached().uninstall().is_ok());
    }
}
