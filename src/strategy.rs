//! Delivery of units to the target window.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::desktop::{is_fail_safe_corner, Desktop, PostOutcome};
use crate::error::{Result, TypingError};
use crate::keyboard::{
    char_to_keystroke, keystroke_for_output_char, KeyStroke, KEY_BACKSPACE, KEY_LEFTSHIFT,
};
use crate::model::{ClickPoint, ControlKey, ControlRef, KeyState, Pacing, StrategyKind, Unit, WindowHandle};

pub trait SendStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Runs once before the first unit: activation and the optional click.
    fn prepare(&mut self, click: Option<ClickPoint>) -> Result<()>;

    /// Delivers every keystroke of `unit`, or none if one of them can't be typed.
    fn deliver(&mut self, unit: &Unit) -> Result<()>;

    /// Runs once after the last unit, whatever the outcome.
    fn finish(&mut self) {}
}

/// Maps a whole unit to keystrokes before anything is sent.
pub fn keystrokes_for_unit(unit: &Unit) -> Result<Vec<KeyStroke>> {
    match unit {
        Unit::Text(text) => text
            .chars()
            .map(|c| keystroke_for_output_char(c).ok_or(TypingError::UnsupportedCharacter(c)))
            .collect(),
        Unit::Control(key) => {
            let stroke = match key {
                ControlKey::Enter => char_to_keystroke('\n'),
                ControlKey::Tab => char_to_keystroke('\t'),
                ControlKey::Backspace => Some(KeyStroke {
                    keycode: KEY_BACKSPACE,
                    shift: false,
                }),
            };
            stroke
                .map(|s| vec![s])
                .ok_or_else(|| TypingError::backend(format!("no keystroke for {key:?}")))
        }
    }
}

fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Posts key messages to the target's focused control without touching focus.
pub struct BackgroundStrategy {
    desktop: Arc<dyn Desktop>,
    target: WindowHandle,
    pacing: Pacing,
    control: Option<ControlRef>,
}

impl BackgroundStrategy {
    pub fn new(desktop: Arc<dyn Desktop>, target: WindowHandle, pacing: Pacing) -> Self {
        Self {
            desktop,
            target,
            pacing,
            control: None,
        }
    }

    fn control(&mut self) -> Result<ControlRef> {
        if let Some(control) = self.control {
            return Ok(control);
        }
        let control = self
            .desktop
            .focused_control(self.target)
            .map_err(|err| TypingError::from_desktop(err, self.target))?
            .unwrap_or(ControlRef(self.target.0));
        debug!(target_window = %self.target, control = control.0, "resolved input control");
        self.control = Some(control);
        Ok(control)
    }
}

impl SendStrategy for BackgroundStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Background
    }

    fn prepare(&mut self, click: Option<ClickPoint>) -> Result<()> {
        if !self.desktop.is_valid(self.target) {
            return Err(TypingError::TargetInvalid(self.target));
        }
        if let Some(point) = click {
            self.desktop
                .activate(self.target)
                .map_err(|err| TypingError::from_desktop(err, self.target))?;
            self.desktop
                .click_at(point.x, point.y)
                .map_err(|err| TypingError::from_desktop(err, self.target))?;
            settle(self.pacing.settle_ms);
            // the click may have moved focus to another control
            self.control = None;
        }
        Ok(())
    }

    fn deliver(&mut self, unit: &Unit) -> Result<()> {
        let strokes = keystrokes_for_unit(unit)?;
        if !self.desktop.is_valid(self.target) {
            return Err(TypingError::TargetInvalid(self.target));
        }
        let control = self.control()?;

        for stroke in strokes {
            match self.desktop.post_key(control, stroke) {
                Ok(PostOutcome::Accepted) => {}
                Ok(PostOutcome::Ignored) => {
                    return Err(TypingError::UnsupportedByTarget(self.target));
                }
                Err(err) => return Err(TypingError::from_desktop(err, self.target)),
            }
        }
        Ok(())
    }
}

/// Activates the target and injects OS-level key events.
pub struct ForegroundStrategy {
    desktop: Arc<dyn Desktop>,
    target: WindowHandle,
    pacing: Pacing,
}

impl ForegroundStrategy {
    pub fn new(desktop: Arc<dyn Desktop>, target: WindowHandle, pacing: Pacing) -> Self {
        Self {
            desktop,
            target,
            pacing,
        }
    }

    fn desktop_err(&self) -> impl Fn(crate::error::DesktopError) -> TypingError {
        let target = self.target;
        move |err| TypingError::from_desktop(err, target)
    }

    /// Fail-safe corner, then handle validity, then focus.
    fn check_guards(&self) -> Result<()> {
        let position = self.desktop.pointer_position().map_err(self.desktop_err())?;
        let screen = self.desktop.screen_size().map_err(self.desktop_err())?;
        if is_fail_safe_corner(position, screen) {
            return Err(TypingError::FailSafeAborted {
                x: position.0,
                y: position.1,
            });
        }

        if !self.desktop.is_valid(self.target) {
            return Err(TypingError::TargetInvalid(self.target));
        }

        let foreground = self.desktop.foreground_window().map_err(self.desktop_err())?;
        if foreground != Some(self.target) {
            return Err(TypingError::FocusLost(self.target));
        }
        Ok(())
    }

    fn tap(&self, stroke: KeyStroke) -> Result<()> {
        let to_err = self.desktop_err();
        if stroke.shift {
            self.desktop
                .send_key(KEY_LEFTSHIFT, KeyState::Pressed)
                .map_err(&to_err)?;
        }

        let result = self
            .desktop
            .send_key(stroke.keycode, KeyState::Pressed)
            .and_then(|()| {
                settle(self.pacing.key_hold_ms);
                self.desktop.send_key(stroke.keycode, KeyState::Released)
            });

        if stroke.shift {
            let _ = self.desktop.send_key(KEY_LEFTSHIFT, KeyState::Released);
        }
        result.map_err(to_err)
    }
}

impl SendStrategy for ForegroundStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Foreground
    }

    fn prepare(&mut self, click: Option<ClickPoint>) -> Result<()> {
        if !self.desktop.is_valid(self.target) {
            return Err(TypingError::TargetInvalid(self.target));
        }
        self.desktop.activate(self.target).map_err(self.desktop_err())?;
        settle(self.pacing.settle_ms);

        if let Some(point) = click {
            self.desktop
                .click_at(point.x, point.y)
                .map_err(self.desktop_err())?;
            settle(self.pacing.settle_ms);
        }
        Ok(())
    }

    fn deliver(&mut self, unit: &Unit) -> Result<()> {
        let strokes = keystrokes_for_unit(unit)?;
        for stroke in strokes {
            self.check_guards()?;
            self.tap(stroke)?;
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.desktop.release_modifiers();
    }
}

pub fn build_strategy(
    kind: StrategyKind,
    desktop: Arc<dyn Desktop>,
    target: WindowHandle,
    pacing: Pacing,
) -> Box<dyn SendStrategy> {
    match kind {
        StrategyKind::Background => Box::new(BackgroundStrategy::new(desktop, target, pacing)),
        StrategyKind::Foreground => Box::new(ForegroundStrategy::new(desktop, target, pacing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDesktop;

    const QUICK: Pacing = Pacing {
        settle_ms: 0,
        key_hold_ms: 0,
    };

    fn text(s: &str) -> Unit {
        Unit::Text(s.to_string())
    }

    #[test]
    fn unit_with_unmappable_char_sends_nothing() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        let mut strategy = BackgroundStrategy::new(sim.clone(), target, QUICK);

        assert_eq!(
            strategy.deliver(&text("ok\u{e9}")),
            Err(TypingError::UnsupportedCharacter('\u{e9}'))
        );
        assert_eq!(sim.key_count(), 0);

        strategy.deliver(&text("ok")).unwrap();
        assert_eq!(sim.typed_text(target), "ok");
    }

    #[test]
    fn background_reports_deaf_targets() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Canvas", false);
        let mut strategy = BackgroundStrategy::new(sim.clone(), target, QUICK);
        strategy.prepare(None).unwrap();

        assert_eq!(
            strategy.deliver(&text("a")),
            Err(TypingError::UnsupportedByTarget(target))
        );
    }

    #[test]
    fn background_leaves_focus_alone_without_a_click() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        let mut strategy = BackgroundStrategy::new(sim.clone(), target, QUICK);
        strategy.prepare(None).unwrap();
        strategy.deliver(&Unit::Control(ControlKey::Tab)).unwrap();

        assert!(sim.activations().is_empty());
        assert_eq!(sim.typed_text(target), "\t");

        strategy.prepare(Some(ClickPoint { x: 40, y: 50 })).unwrap();
        assert_eq!(sim.activations(), vec![target]);
        assert_eq!(sim.clicks(), vec![(40, 50)]);
    }

    #[test]
    fn foreground_types_shifted_chars_and_backspaces() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        let mut strategy = ForegroundStrategy::new(sim.clone(), target, QUICK);
        strategy.prepare(None).unwrap();

        strategy.deliver(&text("Hey")).unwrap();
        strategy.deliver(&Unit::Control(ControlKey::Backspace)).unwrap();
        strategy.deliver(&text("!")).unwrap();
        assert_eq!(sim.typed_text(target), "He!");
    }

    #[test]
    fn foreground_reports_focus_loss() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        let mut strategy = ForegroundStrategy::new(sim.clone(), target, QUICK);
        strategy.prepare(None).unwrap();
        sim.set_foreground(None);

        assert_eq!(
            strategy.deliver(&text("a")),
            Err(TypingError::FocusLost(target))
        );
        assert_eq!(sim.key_count(), 0);
    }

    #[test]
    fn fail_safe_is_checked_before_validity() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        let mut strategy = ForegroundStrategy::new(sim.clone(), target, QUICK);
        strategy.prepare(None).unwrap();
        sim.close_window(target);
        sim.move_pointer(1919, 0);

        assert_eq!(
            strategy.deliver(&text("a")),
            Err(TypingError::FailSafeAborted { x: 1919, y: 0 })
        );
    }

    #[test]
    fn dead_handles_fail_both_strategies() {
        let sim = Arc::new(SimDesktop::new());
        let target = sim.add_window("Editor", true);
        sim.close_window(target);

        for kind in [StrategyKind::Background, StrategyKind::Foreground] {
            let mut strategy = build_strategy(kind, sim.clone(), target, QUICK);
            assert_eq!(strategy.kind(), kind);
            assert_eq!(
                strategy.prepare(None),
                Err(TypingError::TargetInvalid(target))
            );
        }
    }
}
