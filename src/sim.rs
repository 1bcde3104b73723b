//! In-memory desktop for tests and dry runs.
//!
//! Each window owns a tiny editor buffer. Posted keys go to the window owning
//! the control; injected keys go to the foreground window, honoring Shift.
//! Fault hooks reproduce the failures a real desktop can throw at the engine.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::desktop::{sort_windows, DesktopResult, InputInjector, PostOutcome, WindowManager};
use crate::error::DesktopError;
use crate::keyboard::{keystroke_for_output_char, KeyStroke, KEY_BACKSPACE, KEY_LEFTSHIFT, KEY_RIGHTSHIFT};
use crate::model::{ControlRef, KeyState, WindowHandle, WindowInfo};

const FIRST_HANDLE: u64 = 0x100;
const SCREEN: (i32, i32) = (1920, 1080);

#[derive(Debug, Default, Clone)]
struct SimEditorState {
    buf: Vec<char>,
    cursor: usize,
}

impl SimEditorState {
    fn insert_char(&mut self, c: char) {
        self.buf.insert(self.cursor, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.buf.remove(self.cursor);
    }

    fn as_string(&self) -> String {
        self.buf.iter().collect()
    }
}

fn us_qwerty_keystroke_map() -> HashMap<KeyStroke, char> {
    let mut map = HashMap::new();
    let candidates = ['\n', '\t', ' '].into_iter().chain((33u8..=126u8).map(char::from));
    for c in candidates {
        if let Some(stroke) = keystroke_for_output_char(c) {
            map.insert(stroke, c);
        }
    }
    map
}

/// How a key reached its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Posted,
    Injected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredKey {
    /// `None` when an injected key had no foreground window to land in.
    pub window: Option<WindowHandle>,
    pub stroke: KeyStroke,
    pub via: Delivery,
}

#[derive(Debug)]
struct SimWindow {
    info: WindowInfo,
    control: ControlRef,
    alive: bool,
    listens: bool,
    denied: bool,
    editor: SimEditorState,
}

#[derive(Debug, Default)]
struct Faults {
    corner_after_keys: Option<usize>,
    close_after_keys: Option<(WindowHandle, usize)>,
    steal_focus_after_keys: Option<usize>,
}

#[derive(Debug)]
struct SimState {
    windows: Vec<SimWindow>,
    foreground: Option<WindowHandle>,
    shift_down: bool,
    pointer: (i32, i32),
    log: Vec<DeliveredKey>,
    clicks: Vec<(i32, i32)>,
    activations: Vec<WindowHandle>,
    faults: Faults,
    keymap: HashMap<KeyStroke, char>,
}

impl SimState {
    fn window(&self, handle: WindowHandle) -> Option<&SimWindow> {
        self.windows.iter().find(|w| w.info.handle == handle)
    }

    fn window_mut(&mut self, handle: WindowHandle) -> Option<&mut SimWindow> {
        self.windows.iter_mut().find(|w| w.info.handle == handle)
    }

    fn live_window(&self, handle: WindowHandle) -> DesktopResult<&SimWindow> {
        match self.window(handle) {
            Some(w) if w.alive => Ok(w),
            _ => Err(DesktopError::WindowGone),
        }
    }

    fn apply(&mut self, window: Option<WindowHandle>, stroke: KeyStroke, via: Delivery) {
        let decoded = self.keymap.get(&stroke).copied();
        if let Some(w) = window.and_then(|h| self.window_mut(h)) {
            if stroke.keycode == KEY_BACKSPACE {
                w.editor.backspace();
            } else if let Some(c) = decoded {
                w.editor.insert_char(c);
            }
        }
        self.log.push(DeliveredKey {
            window,
            stroke,
            via,
        });
        self.fire_faults();
    }

    fn fire_faults(&mut self) {
        let delivered = self.log.len();
        if self.faults.corner_after_keys == Some(delivered) {
            self.pointer = (0, 0);
        }
        if let Some((handle, after)) = self.faults.close_after_keys {
            if after == delivered {
                if let Some(w) = self.window_mut(handle) {
                    w.alive = false;
                }
                if self.foreground == Some(handle) {
                    self.foreground = None;
                }
            }
        }
        if self.faults.steal_focus_after_keys == Some(delivered) {
            self.foreground = None;
        }
    }
}

/// A scriptable desktop with no display behind it.
#[derive(Debug)]
pub struct SimDesktop {
    state: Mutex<SimState>,
}

impl Default for SimDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDesktop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                windows: Vec::new(),
                foreground: None,
                shift_down: false,
                pointer: (SCREEN.0 / 2, SCREEN.1 / 2),
                log: Vec::new(),
                clicks: Vec::new(),
                activations: Vec::new(),
                faults: Faults::default(),
                keymap: us_qwerty_keystroke_map(),
            }),
        }
    }

    /// A desktop with one editor window that listens for keys.
    pub fn with_editor(title: &str) -> Self {
        let desktop = Self::new();
        desktop.add_window(title, true);
        desktop
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a window. `listens` controls whether posted keys are accepted.
    pub fn add_window(&self, title: &str, listens: bool) -> WindowHandle {
        let mut state = self.lock();
        let handle = WindowHandle(FIRST_HANDLE + state.windows.len() as u64);
        state.windows.push(SimWindow {
            info: WindowInfo {
                title: title.to_string(),
                handle,
            },
            control: ControlRef(handle.0 * 16 + 1),
            alive: true,
            listens,
            denied: false,
            editor: SimEditorState::default(),
        });
        handle
    }

    pub fn close_window(&self, handle: WindowHandle) {
        let mut state = self.lock();
        if let Some(w) = state.window_mut(handle) {
            w.alive = false;
        }
        if state.foreground == Some(handle) {
            state.foreground = None;
        }
    }

    /// Makes every interaction with `handle` fail with an access error.
    pub fn deny_access(&self, handle: WindowHandle) {
        if let Some(w) = self.lock().window_mut(handle) {
            w.denied = true;
        }
    }

    pub fn set_foreground(&self, handle: Option<WindowHandle>) {
        self.lock().foreground = handle;
    }

    pub fn move_pointer(&self, x: i32, y: i32) {
        self.lock().pointer = (x, y);
    }

    /// Parks the pointer at (0, 0) once `keys` keys have been delivered.
    pub fn corner_pointer_after_keys(&self, keys: usize) {
        self.lock().faults.corner_after_keys = Some(keys);
    }

    pub fn close_after_keys(&self, handle: WindowHandle, keys: usize) {
        self.lock().faults.close_after_keys = Some((handle, keys));
    }

    /// Clears the foreground window once `keys` keys have been delivered.
    pub fn steal_focus_after_keys(&self, keys: usize) {
        self.lock().faults.steal_focus_after_keys = Some(keys);
    }

    /// Current editor contents of `handle`.
    pub fn typed_text(&self, handle: WindowHandle) -> String {
        self.lock()
            .window(handle)
            .map(|w| w.editor.as_string())
            .unwrap_or_default()
    }

    pub fn key_log(&self) -> Vec<DeliveredKey> {
        self.lock().log.clone()
    }

    pub fn key_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.lock().clicks.clone()
    }

    pub fn activations(&self) -> Vec<WindowHandle> {
        self.lock().activations.clone()
    }
}

impl WindowManager for SimDesktop {
    fn list_windows(&self) -> DesktopResult<Vec<WindowInfo>> {
        let state = self.lock();
        let windows = state
            .windows
            .iter()
            .filter(|w| w.alive)
            .map(|w| w.info.clone())
            .collect();
        Ok(sort_windows(windows))
    }

    fn activate(&self, window: WindowHandle) -> DesktopResult<()> {
        let mut state = self.lock();
        if state.live_window(window)?.denied {
            return Err(DesktopError::AccessDenied);
        }
        state.foreground = Some(window);
        state.activations.push(window);
        Ok(())
    }

    fn is_valid(&self, window: WindowHandle) -> bool {
        self.lock().live_window(window).is_ok()
    }

    fn focused_control(&self, window: WindowHandle) -> DesktopResult<Option<ControlRef>> {
        let state = self.lock();
        let w = state.live_window(window)?;
        if w.denied {
            return Err(DesktopError::AccessDenied);
        }
        Ok(Some(w.control))
    }

    fn foreground_window(&self) -> DesktopResult<Option<WindowHandle>> {
        Ok(self.lock().foreground)
    }
}

impl InputInjector for SimDesktop {
    fn post_key(&self, control: ControlRef, stroke: KeyStroke) -> DesktopResult<PostOutcome> {
        let mut state = self.lock();
        let Some(target) = state.windows.iter().find(|w| w.control == control) else {
            return Err(DesktopError::WindowGone);
        };
        if !target.alive {
            return Err(DesktopError::WindowGone);
        }
        if target.denied {
            return Err(DesktopError::AccessDenied);
        }
        if !target.listens {
            return Ok(PostOutcome::Ignored);
        }

        let handle = target.info.handle;
        state.apply(Some(handle), stroke, Delivery::Posted);
        Ok(PostOutcome::Accepted)
    }

    fn send_key(&self, keycode: u32, key_state: KeyState) -> DesktopResult<()> {
        let mut state = self.lock();
        if keycode == KEY_LEFTSHIFT || keycode == KEY_RIGHTSHIFT {
            state.shift_down = key_state == KeyState::Pressed;
            return Ok(());
        }
        if key_state == KeyState::Released {
            return Ok(());
        }

        let stroke = KeyStroke {
            keycode,
            shift: state.shift_down,
        };
        let target = state
            .foreground
            .filter(|h| state.window(*h).map(|w| w.alive).unwrap_or(false));
        state.apply(target, stroke, Delivery::Injected);
        Ok(())
    }

    fn pointer_position(&self) -> DesktopResult<(i32, i32)> {
        Ok(self.lock().pointer)
    }

    fn screen_size(&self) -> DesktopResult<(i32, i32)> {
        Ok(SCREEN)
    }

    fn click_at(&self, x: i32, y: i32) -> DesktopResult<()> {
        let mut state = self.lock();
        state.pointer = (x, y);
        state.clicks.push((x, y));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::{char_to_keystroke, KEY_LEFTSHIFT};

    fn stroke(c: char) -> KeyStroke {
        char_to_keystroke(c).expect("typable")
    }

    #[test]
    fn posted_keys_land_in_the_owning_window() {
        let desktop = SimDesktop::new();
        let editor = desktop.add_window("Editor", true);
        let other = desktop.add_window("Other", true);
        let control = desktop.focused_control(editor).unwrap().unwrap();

        for c in "Hi!".chars() {
            assert_eq!(
                desktop.post_key(control, stroke(c)).unwrap(),
                PostOutcome::Accepted
            );
        }
        assert_eq!(desktop.typed_text(editor), "Hi!");
        assert_eq!(desktop.typed_text(other), "");
    }

    #[test]
    fn injected_keys_follow_shift_and_foreground() {
        let desktop = SimDesktop::with_editor("Editor");
        let editor = desktop.list_windows().unwrap()[0].handle;
        desktop.activate(editor).unwrap();

        desktop.send_key(KEY_LEFTSHIFT, KeyState::Pressed).unwrap();
        desktop.send_key(stroke('a').keycode, KeyState::Pressed).unwrap();
        desktop.send_key(stroke('a').keycode, KeyState::Released).unwrap();
        desktop.send_key(KEY_LEFTSHIFT, KeyState::Released).unwrap();
        desktop.send_key(stroke('b').keycode, KeyState::Pressed).unwrap();
        desktop.send_key(KEY_BACKSPACE, KeyState::Pressed).unwrap();
        desktop.send_key(stroke('c').keycode, KeyState::Pressed).unwrap();

        assert_eq!(desktop.typed_text(editor), "Ac");
        assert_eq!(desktop.key_count(), 4);
    }

    #[test]
    fn faults_fire_after_the_configured_key() {
        let desktop = SimDesktop::new();
        let editor = desktop.add_window("Editor", true);
        desktop.activate(editor).unwrap();
        desktop.corner_pointer_after_keys(2);
        desktop.close_after_keys(editor, 3);

        let control = desktop.focused_control(editor).unwrap().unwrap();
        desktop.post_key(control, stroke('a')).unwrap();
        assert_ne!(desktop.pointer_position().unwrap(), (0, 0));
        desktop.post_key(control, stroke('b')).unwrap();
        assert_eq!(desktop.pointer_position().unwrap(), (0, 0));
        desktop.post_key(control, stroke('c')).unwrap();

        assert!(!desktop.is_valid(editor));
        assert_eq!(
            desktop.post_key(control, stroke('d')),
            Err(DesktopError::WindowGone)
        );
        assert_eq!(desktop.foreground_window().unwrap(), None);
    }

    #[test]
    fn deaf_and_denied_windows() {
        let desktop = SimDesktop::new();
        let deaf = desktop.add_window("Deaf", false);
        let locked = desktop.add_window("Locked", true);
        desktop.deny_access(locked);

        let control = desktop.focused_control(deaf).unwrap().unwrap();
        assert_eq!(
            desktop.post_key(control, stroke('x')).unwrap(),
            PostOutcome::Ignored
        );
        assert_eq!(desktop.activate(locked), Err(DesktopError::AccessDenied));
        assert_eq!(desktop.typed_text(deaf), "");
    }
}
