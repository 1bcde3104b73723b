use std::ffi::OsString;
use std::sync::{Mutex, OnceLock};

use autotyper::desktop::{open_desktop, resolve_backend, DesktopBackend};

const VARS: [&str; 4] = ["WAYLAND_DISPLAY", "WAYLAND_SOCKET", "DISPLAY", "XDG_SESSION_TYPE"];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

struct EnvRestore {
    saved: Vec<(&'static str, Option<OsString>)>,
}

impl EnvRestore {
    fn snapshot() -> Self {
        Self {
            saved: VARS
                .iter()
                .map(|name| (*name, std::env::var_os(name)))
                .collect(),
        }
    }
}

impl Drop for EnvRestore {
    fn drop(&mut self) {
        // SAFETY: modifying the process environment is not thread-safe in general.
        // These tests serialize all env var mutations via the `env_lock()` mutex.
        for (name, value) in &self.saved {
            match value {
                Some(v) => unsafe { std::env::set_var(name, v) },
                None => unsafe { std::env::remove_var(name) },
            }
        }
    }
}

fn clear_session() {
    for name in VARS {
        // SAFETY: callers hold the global test mutex from `env_lock()`.
        unsafe { std::env::remove_var(name) };
    }
}

fn set(name: &str, value: &str) {
    // SAFETY: callers hold the global test mutex from `env_lock()`.
    unsafe { std::env::set_var(name, value) };
}

#[test]
fn sim_needs_no_display() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();
    clear_session();

    assert_eq!(
        resolve_backend(DesktopBackend::Sim).unwrap(),
        DesktopBackend::Sim
    );
    let desktop = open_desktop(DesktopBackend::Sim).expect("sim desktop opens anywhere");
    let windows = desktop.list_windows().unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].title, "Simulated editor");
}

#[test]
fn auto_uses_x11_when_display_is_set() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();
    clear_session();
    set("DISPLAY", ":0");
    set("WAYLAND_DISPLAY", "wayland-1");

    #[cfg(feature = "x11")]
    {
        let resolved = resolve_backend(DesktopBackend::Auto).expect("should resolve");
        assert_eq!(resolved, DesktopBackend::X11);
    }

    #[cfg(not(feature = "x11"))]
    {
        let err = resolve_backend(DesktopBackend::Auto).unwrap_err();
        assert!(err.to_string().contains("disabled in this build"));
    }
}

#[test]
fn auto_rejects_wayland_only_sessions() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();
    clear_session();
    set("WAYLAND_DISPLAY", "wayland-1");
    set("XDG_SESSION_TYPE", "wayland");

    let err = resolve_backend(DesktopBackend::Auto).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Wayland-only session"), "{msg}");
    assert!(msg.contains("XDG_SESSION_TYPE=wayland"), "{msg}");
}

#[test]
fn auto_without_any_session_points_at_sim() {
    let _guard = env_lock().lock().unwrap();
    let _restore = EnvRestore::snapshot();
    clear_session();

    let err = resolve_backend(DesktopBackend::Auto).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("No supported desktop backend"), "{msg}");
    assert!(msg.contains("--backend sim"), "{msg}");
}
