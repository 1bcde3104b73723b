//! X11 desktop: EWMH for window lookup, `SendEvent` for background delivery and
//! XTEST for foreground input.

use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::xproto::{
    self, AtomEnum, ClientMessageEvent, ConnectionExt as _, EventMask, KeyButMask, KeyPressEvent,
};
use x11rb::protocol::xtest::{self, ConnectionExt as _};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;

use crate::desktop::{sort_windows, DesktopResult, InputInjector, PostOutcome, WindowManager};
use crate::error::DesktopError;
use crate::keyboard::{self, KeyStroke};
use crate::model::{ControlRef, KeyState, WindowHandle, WindowInfo};

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_CLIENT_LIST,
        _NET_ACTIVE_WINDOW,
        _NET_WM_NAME,
        UTF8_STRING,
    }
}

// Focus follows the pointer; not a real window.
const POINTER_ROOT: xproto::Window = 1;

impl From<ConnectionError> for DesktopError {
    fn from(err: ConnectionError) -> Self {
        DesktopError::Connection(err.to_string())
    }
}

impl From<ReplyError> for DesktopError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::ConnectionError(err) => err.into(),
            ReplyError::X11Error(err) => match err.error_kind {
                ErrorKind::Window | ErrorKind::Drawable => DesktopError::WindowGone,
                ErrorKind::Access => DesktopError::AccessDenied,
                other => DesktopError::Protocol(format!("{other:?}")),
            },
        }
    }
}

fn evdev_to_x11_keycode(evdev_keycode: u32) -> DesktopResult<u8> {
    // X11 keycodes are evdev + 8 on Linux Xorg setups.
    evdev_keycode
        .checked_add(8)
        .and_then(|code| u8::try_from(code).ok())
        .ok_or_else(|| {
            DesktopError::Unsupported(format!("evdev keycode {evdev_keycode} out of range for X11"))
        })
}

fn window_id(handle: WindowHandle) -> DesktopResult<xproto::Window> {
    u32::try_from(handle.0)
        .map_err(|_| DesktopError::Protocol(format!("{handle} is not an X11 window id")))
}

fn query_xtest(conn: &impl Connection) -> DesktopResult<()> {
    let ext = conn.extension_information(xtest::X11_EXTENSION_NAME)?;
    if ext.is_none() {
        return Err(DesktopError::Unsupported(
            "the XTEST extension is not present on this X server".to_string(),
        ));
    }
    Ok(())
}

fn keysyms_for(conn: &impl Connection, keycode: u8) -> DesktopResult<(u32, u32)> {
    let reply = conn.get_keyboard_mapping(keycode, 1)?.reply()?;
    let at = |i: usize| reply.keysyms.get(i).copied().unwrap_or(x11rb::NO_SYMBOL);
    Ok((at(0), at(1)))
}

/// Keystrokes are computed for a US layout; refuse to type through any other.
fn validate_us_keymap(conn: &impl Connection) -> DesktopResult<()> {
    let checks = [('a', 'A'), ('q', 'Q'), ('1', '!'), ('-', '_'), ('\'', '"'), ('[', '{')];

    for (plain, shifted) in checks {
        let Some(stroke) = keyboard::char_to_keystroke(plain) else {
            continue;
        };
        let keycode = evdev_to_x11_keycode(stroke.keycode)?;
        let (got0, got1) = keysyms_for(conn, keycode)?;

        // Latin-1 keysyms equal their code point.
        if got0 != plain as u32 || got1 != shifted as u32 {
            return Err(DesktopError::Unsupported(format!(
                "the X server keymap is not US QWERTY (keycode {keycode}: got {got0:#x}/{got1:#x}); try `setxkbmap us`"
            )));
        }
    }
    Ok(())
}

pub struct X11Desktop {
    conn: RustConnection,
    root: xproto::Window,
    atoms: Atoms,
    screen: (i32, i32),
}

impl X11Desktop {
    pub fn connect() -> DesktopResult<Self> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|err| DesktopError::Connection(err.to_string()))?;
        query_xtest(&conn)?;
        validate_us_keymap(&conn)?;

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| DesktopError::Connection("invalid X11 screen index".to_string()))?;
        let root = screen.root;
        let size = (
            i32::from(screen.width_in_pixels),
            i32::from(screen.height_in_pixels),
        );

        let atoms = Atoms::new(&conn)?.reply()?;

        Ok(Self {
            conn,
            root,
            atoms,
            screen: size,
        })
    }

    fn property_bytes(
        &self,
        window: xproto::Window,
        property: impl Into<xproto::Atom>,
        kind: impl Into<xproto::Atom>,
    ) -> DesktopResult<Vec<u8>> {
        let reply = self
            .conn
            .get_property(false, window, property, kind, 0, 1024)?
            .reply()?;
        Ok(reply.value)
    }

    fn window_title(&self, window: xproto::Window) -> String {
        let utf8 = self
            .property_bytes(window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)
            .unwrap_or_default();
        if !utf8.is_empty() {
            return String::from_utf8_lossy(&utf8).into_owned();
        }
        let legacy = self
            .property_bytes(window, AtomEnum::WM_NAME, AtomEnum::ANY)
            .unwrap_or_default();
        String::from_utf8_lossy(&legacy).into_owned()
    }

    fn is_ancestor(&self, ancestor: xproto::Window, mut window: xproto::Window) -> DesktopResult<bool> {
        while window != self.root && window != x11rb::NONE {
            if window == ancestor {
                return Ok(true);
            }
            window = self.conn.query_tree(window)?.reply()?.parent;
        }
        Ok(false)
    }

    fn xtest(&self, type_: u8, detail: u8, x: i16, y: i16) -> DesktopResult<()> {
        self.conn
            .xtest_fake_input(type_, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)?;
        Ok(())
    }

    fn send_key_event(
        &self,
        control: xproto::Window,
        response_type: u8,
        keycode: u8,
        state: KeyButMask,
    ) -> DesktopResult<()> {
        let event = KeyPressEvent {
            response_type,
            detail: keycode,
            sequence: 0,
            time: x11rb::CURRENT_TIME,
            root: self.root,
            event: control,
            child: x11rb::NONE,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state,
            same_screen: true,
        };
        self.conn
            .send_event(true, control, EventMask::KEY_PRESS, event)?
            .check()?;
        Ok(())
    }
}

impl WindowManager for X11Desktop {
    fn list_windows(&self) -> DesktopResult<Vec<WindowInfo>> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms._NET_CLIENT_LIST,
                AtomEnum::WINDOW,
                0,
                u32::MAX,
            )?
            .reply()?;
        let ids: Vec<u32> = reply.value32().map(|ids| ids.collect()).unwrap_or_default();

        let windows = ids
            .into_iter()
            .map(|id| WindowInfo {
                title: self.window_title(id),
                handle: WindowHandle(u64::from(id)),
            })
            .collect();
        Ok(sort_windows(windows))
    }

    fn activate(&self, window: WindowHandle) -> DesktopResult<()> {
        let id = window_id(window)?;
        // source indication 2: request comes from a pager-like tool
        let event = ClientMessageEvent::new(
            32,
            id,
            self.atoms._NET_ACTIVE_WINDOW,
            [2, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )?
            .check()?;
        self.conn.flush()?;
        Ok(())
    }

    fn is_valid(&self, window: WindowHandle) -> bool {
        let Ok(id) = window_id(window) else {
            return false;
        };
        self.conn
            .get_window_attributes(id)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some()
    }

    fn focused_control(&self, window: WindowHandle) -> DesktopResult<Option<ControlRef>> {
        let id = window_id(window)?;
        let focus = self.conn.get_input_focus()?.reply()?.focus;
        if focus == x11rb::NONE || focus == POINTER_ROOT {
            return Ok(None);
        }
        if self.is_ancestor(id, focus)? {
            Ok(Some(ControlRef(u64::from(focus))))
        } else {
            Ok(None)
        }
    }

    fn foreground_window(&self) -> DesktopResult<Option<WindowHandle>> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms._NET_ACTIVE_WINDOW,
                AtomEnum::WINDOW,
                0,
                1,
            )?
            .reply()?;
        let active = reply.value32().and_then(|mut ids| ids.next());
        Ok(active
            .filter(|id| *id != x11rb::NONE)
            .map(|id| WindowHandle(u64::from(id))))
    }
}

impl InputInjector for X11Desktop {
    fn post_key(&self, control: ControlRef, stroke: KeyStroke) -> DesktopResult<PostOutcome> {
        let id = window_id(WindowHandle(control.0))?;
        let attrs = self.conn.get_window_attributes(id)?.reply()?;
        if u32::from(attrs.all_event_masks) & u32::from(EventMask::KEY_PRESS) == 0 {
            return Ok(PostOutcome::Ignored);
        }

        let keycode = evdev_to_x11_keycode(stroke.keycode)?;
        let state = if stroke.shift {
            KeyButMask::SHIFT
        } else {
            KeyButMask::default()
        };
        self.send_key_event(id, xproto::KEY_PRESS_EVENT, keycode, state)?;
        self.send_key_event(id, xproto::KEY_RELEASE_EVENT, keycode, state)?;
        self.conn.flush()?;
        Ok(PostOutcome::Accepted)
    }

    fn send_key(&self, keycode: u32, state: KeyState) -> DesktopResult<()> {
        let type_ = match state {
            KeyState::Pressed => xproto::KEY_PRESS_EVENT,
            KeyState::Released => xproto::KEY_RELEASE_EVENT,
        };
        self.xtest(type_, evdev_to_x11_keycode(keycode)?, 0, 0)?;
        self.conn.flush()?;
        Ok(())
    }

    fn pointer_position(&self) -> DesktopResult<(i32, i32)> {
        let reply = self.conn.query_pointer(self.root)?.reply()?;
        Ok((i32::from(reply.root_x), i32::from(reply.root_y)))
    }

    fn screen_size(&self) -> DesktopResult<(i32, i32)> {
        Ok(self.screen)
    }

    fn click_at(&self, x: i32, y: i32) -> DesktopResult<()> {
        let clamp = |v: i32| v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        self.xtest(xproto::MOTION_NOTIFY_EVENT, 0, clamp(x), clamp(y))?;
        self.xtest(xproto::BUTTON_PRESS_EVENT, 1, 0, 0)?;
        self.xtest(xproto::BUTTON_RELEASE_EVENT, 1, 0, 0)?;
        self.conn.flush()?;
        Ok(())
    }
}
