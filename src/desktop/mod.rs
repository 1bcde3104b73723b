//! The desktop the engine types into: window lookup and input injection.

#[cfg(feature = "x11")]
pub mod x11;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::error::DesktopError;
use crate::keyboard::{KeyStroke, MODIFIER_KEYCODES};
use crate::model::{ControlRef, KeyState, WindowHandle, WindowInfo};
use crate::sim::SimDesktop;

pub type DesktopResult<T> = std::result::Result<T, DesktopError>;

pub trait WindowManager: Send + Sync {
    /// Titled top-level windows, sorted by title.
    fn list_windows(&self) -> DesktopResult<Vec<WindowInfo>>;

    fn activate(&self, window: WindowHandle) -> DesktopResult<()>;

    fn is_valid(&self, window: WindowHandle) -> bool;

    /// The control inside `window` that has keyboard focus, if it can be found.
    fn focused_control(&self, window: WindowHandle) -> DesktopResult<Option<ControlRef>>;

    fn foreground_window(&self) -> DesktopResult<Option<WindowHandle>>;
}

/// Whether a posted key message was taken by the receiving control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Accepted,
    Ignored,
}

pub trait InputInjector: Send + Sync {
    /// Posts a press and release of `stroke` straight to `control`.
    fn post_key(&self, control: ControlRef, stroke: KeyStroke) -> DesktopResult<PostOutcome>;

    /// Injects an OS-level key event into whatever has focus.
    fn send_key(&self, keycode: u32, state: KeyState) -> DesktopResult<()>;

    fn pointer_position(&self) -> DesktopResult<(i32, i32)>;

    fn screen_size(&self) -> DesktopResult<(i32, i32)>;

    fn click_at(&self, x: i32, y: i32) -> DesktopResult<()>;

    /// Best-effort release of every modifier, so an aborted run leaves none held.
    fn release_modifiers(&self) {
        for keycode in MODIFIER_KEYCODES {
            let _ = self.send_key(keycode, KeyState::Released);
        }
    }
}

pub trait Desktop: WindowManager + InputInjector {}

impl<T: WindowManager + InputInjector> Desktop for T {}

/// Drops untitled windows and orders the rest case-insensitively by title.
pub fn sort_windows(mut windows: Vec<WindowInfo>) -> Vec<WindowInfo> {
    windows.retain(|w| !w.title.trim().is_empty());
    windows.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then(a.handle.0.cmp(&b.handle.0))
    });
    windows
}

/// True when `(x, y)` is one of the four screen corners.
pub fn is_fail_safe_corner(position: (i32, i32), screen: (i32, i32)) -> bool {
    let (x, y) = position;
    let (w, h) = screen;
    let at_x_edge = x <= 0 || x >= w - 1;
    let at_y_edge = y <= 0 || y >= h - 1;
    at_x_edge && at_y_edge
}

/// Finds a window by handle (decimal or `0x` hex) or by title substring.
pub fn find_window(windows: &[WindowInfo], query: &str) -> Result<WindowInfo> {
    let query = query.trim();
    if query.is_empty() {
        return Err(anyhow!("window query must not be empty"));
    }

    let parsed = match query.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => query.parse::<u64>().ok(),
    };
    if let Some(id) = parsed {
        if let Some(w) = windows.iter().find(|w| w.handle.0 == id) {
            return Ok(w.clone());
        }
    }

    let needle = query.to_lowercase();
    let matches: Vec<&WindowInfo> = windows
        .iter()
        .filter(|w| w.title.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("no window matches {query:?}")),
        [only] => Ok((*only).clone()),
        many => {
            let titles: Vec<String> = many
                .iter()
                .map(|w| format!("  {} {}", w.handle, w.title))
                .collect();
            Err(anyhow!(
                "{} windows match {query:?}; pick one by id:\n{}",
                many.len(),
                titles.join("\n")
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopBackend {
    Auto,
    X11,
    Sim,
}

fn env_is_set(name: &str) -> bool {
    std::env::var_os(name)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

fn session_description() -> String {
    let mut parts = Vec::new();
    for name in ["WAYLAND_DISPLAY", "WAYLAND_SOCKET", "DISPLAY"] {
        if env_is_set(name) {
            parts.push(format!("{name} is set"));
        }
    }
    if let Ok(kind) = std::env::var("XDG_SESSION_TYPE") {
        if !kind.is_empty() {
            parts.push(format!("XDG_SESSION_TYPE={kind}"));
        }
    }

    if parts.is_empty() {
        "No display session detected (expected DISPLAY for X11).".to_string()
    } else {
        format!("Detected environment: {}", parts.join(", "))
    }
}

fn require_x11(selected: DesktopBackend) -> Result<()> {
    if cfg!(feature = "x11") {
        return Ok(());
    }
    let how = match selected {
        DesktopBackend::Auto => "detected",
        _ => "requested",
    };
    Err(anyhow!(
        "X11 backend {how} but is disabled in this build. (Rebuild with `--features x11`.) {}",
        session_description()
    ))
}

/// Picks the concrete backend for `requested`.
///
/// `Auto` means X11 whenever `DISPLAY` is set, including XWayland. A pure Wayland
/// session is rejected: it offers no way to address other clients' windows.
pub fn resolve_backend(requested: DesktopBackend) -> Result<DesktopBackend> {
    match requested {
        DesktopBackend::Sim => Ok(DesktopBackend::Sim),
        DesktopBackend::X11 => {
            require_x11(requested)?;
            Ok(DesktopBackend::X11)
        }
        DesktopBackend::Auto => {
            if env_is_set("DISPLAY") {
                require_x11(requested)?;
                return Ok(DesktopBackend::X11);
            }
            if env_is_set("WAYLAND_DISPLAY") || env_is_set("WAYLAND_SOCKET") {
                return Err(anyhow!(
                    "Wayland-only session detected; window targeting needs X11 (XWayland with DISPLAY set). {}",
                    session_description()
                ));
            }
            Err(anyhow!(
                "No supported desktop backend detected. {}\nTry `--backend sim` for a dry run.",
                session_description()
            ))
        }
    }
}

pub fn open_desktop(requested: DesktopBackend) -> Result<Arc<dyn Desktop>> {
    match resolve_backend(requested)? {
        DesktopBackend::Sim => Ok(Arc::new(SimDesktop::with_editor("Simulated editor"))),
        DesktopBackend::X11 => {
            #[cfg(feature = "x11")]
            {
                let desktop = x11::X11Desktop::connect()
                    .map_err(|err| anyhow!("failed to open X11 desktop: {err}"))?;
                Ok(Arc::new(desktop))
            }

            #[cfg(not(feature = "x11"))]
            {
                Err(anyhow!(
                    "X11 backend is disabled in this build (rebuild with `--features x11`)."
                ))
            }
        }
        DesktopBackend::Auto => Err(anyhow!("no backend resolved")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(title: &str, id: u64) -> WindowInfo {
        WindowInfo {
            title: title.to_string(),
            handle: WindowHandle(id),
        }
    }

    #[test]
    fn windows_sort_by_title_and_drop_untitled() {
        let sorted = sort_windows(vec![
            window("zed", 1),
            window("  ", 2),
            window("Alpha", 3),
            window("beta", 4),
        ]);
        let titles: Vec<&str> = sorted.iter().map(|w| w.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "beta", "zed"]);
    }

    #[test]
    fn corners_trigger_fail_safe() {
        let screen = (1920, 1080);
        assert!(is_fail_safe_corner((0, 0), screen));
        assert!(is_fail_safe_corner((1919, 0), screen));
        assert!(is_fail_safe_corner((0, 1079), screen));
        assert!(is_fail_safe_corner((1919, 1079), screen));
        assert!(!is_fail_safe_corner((0, 500), screen));
        assert!(!is_fail_safe_corner((960, 540), screen));
    }

    #[test]
    fn windows_are_found_by_id_or_title() {
        let windows = vec![window("Notes - Editor", 0x2a), window("Terminal", 7)];
        assert_eq!(find_window(&windows, "0x2a").unwrap().handle, WindowHandle(0x2a));
        assert_eq!(find_window(&windows, "7").unwrap().title, "Terminal");
        assert_eq!(find_window(&windows, "editor").unwrap().handle, WindowHandle(0x2a));
        assert!(find_window(&windows, "browser").is_err());
        assert!(find_window(&windows, "e").is_err());
    }
}
