use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypingError};
use crate::timing::TimingConfig;
use crate::typo::TypoConfig;

/// Opaque handle of a top-level window, as issued by the window manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The input control inside a window that receives background messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlRef(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    pub handle: WindowHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingMode {
    #[default]
    CharByChar,
    LineByLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Post key messages to the target's focused control; focus is left alone.
    #[default]
    Background,
    /// Activate the target and inject OS-level key events.
    Foreground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPoint {
    pub x: i32,
    pub y: i32,
}

/// Fixed waits around OS-level delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    /// Wait after activating the target or clicking, before the first unit.
    pub settle_ms: u64,
    /// Time between key press and release in foreground mode.
    pub key_hold_ms: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle_ms: 300,
            key_hold_ms: 12,
        }
    }
}

fn default_countdown() -> u64 {
    3
}

/// Everything needed to type one block of text. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingJob {
    pub text: String,
    #[serde(default)]
    pub mode: TypingMode,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub typo: TypoConfig,
    #[serde(default)]
    pub strategy: StrategyKind,
    pub target: WindowHandle,
    #[serde(default)]
    pub click: Option<ClickPoint>,
    #[serde(default = "default_countdown")]
    pub countdown_secs: u64,
    #[serde(default)]
    pub pacing: Pacing,
}

impl TypingJob {
    pub fn new(text: impl Into<String>, target: WindowHandle) -> Self {
        Self {
            text: text.into(),
            mode: TypingMode::default(),
            timing: TimingConfig::default(),
            typo: TypoConfig::default(),
            strategy: StrategyKind::default(),
            target,
            click: None,
            countdown_secs: default_countdown(),
            pacing: Pacing::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        self.typo.validate()?;

        let total = self.total_chars();
        for span in &self.typo.unsafe_spans {
            if span.start > span.end || span.end > total {
                return Err(TypingError::invalid_job(format!(
                    "unsafe span {}..{} is outside the text (0..{total})",
                    span.start, span.end
                )));
            }
        }

        Ok(())
    }

    /// The text as typed: CRLF line endings become `\n`.
    pub fn source_text(&self) -> String {
        self.text.replace("\r\n", "\n")
    }

    pub fn total_lines(&self) -> usize {
        self.source_text().split('\n').count()
    }

    pub fn total_chars(&self) -> usize {
        self.source_text().chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKey {
    Enter,
    Tab,
    Backspace,
}

/// The smallest piece handed to a send strategy in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Unit {
    Text(String),
    Control(ControlKey),
}

impl Unit {
    /// The unit that types `c`; newline and tab become control keys.
    pub fn for_char(c: char) -> Self {
        match c {
            '\n' => Unit::Control(ControlKey::Enter),
            '\t' => Unit::Control(ControlKey::Tab),
            _ => Unit::Text(c.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubEvent {
    TypeCorrect { unit: Unit },
    TypeWrong { wrong: char, intended: char },
    Backspace,
}

impl SubEvent {
    pub fn correct_char(c: char) -> Self {
        SubEvent::TypeCorrect {
            unit: Unit::for_char(c),
        }
    }

    /// What the send strategy is asked to deliver for this sub-event.
    pub fn unit(&self) -> Unit {
        match self {
            SubEvent::TypeCorrect { unit } => unit.clone(),
            SubEvent::TypeWrong { wrong, .. } => Unit::for_char(*wrong),
            SubEvent::Backspace => Unit::Control(ControlKey::Backspace),
        }
    }
}

/// A sub-event and the wait that precedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedSubEvent {
    pub delay_ms: u64,
    pub event: SubEvent,
}

/// One unit of source text, fully planned: every keystroke and every wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUnit {
    /// Line of the last source character covered by this unit.
    pub line_index: usize,
    /// Column of the last source character covered by this unit.
    pub char_index: usize,
    /// Source characters delivered once this unit completes.
    pub chars_done: usize,
    pub events: Vec<TimedSubEvent>,
    /// Wait after the last event (punctuation, newline, burst boundary, fixed delay).
    pub pause_after_ms: u64,
}

impl PlannedUnit {
    pub fn has_typo(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.event, SubEvent::TypeWrong { .. }))
    }

    /// Progress reached inside a typo group, one entry per event.
    ///
    /// The events that first type a source character carry the
    /// `(char_index, chars_done)` reached once they land, except the last of
    /// them, which the unit itself reports after the correction. Clean units
    /// only report at the end.
    pub fn progress_marks(&self) -> Vec<Option<(usize, usize)>> {
        let mut marks = vec![None; self.events.len()];
        if !self.has_typo() {
            return marks;
        }
        let span = self
            .events
            .iter()
            .take_while(|e| e.event != SubEvent::Backspace)
            .count();
        let first_col = (self.char_index + 1).saturating_sub(span);
        let first_done = self.chars_done.saturating_sub(span);
        for (k, mark) in marks.iter_mut().take(span.saturating_sub(1)).enumerate() {
            *mark = Some((first_col + k, first_done + k + 1));
        }
        marks
    }

    pub fn total_wait_ms(&self) -> u64 {
        self.events
            .iter()
            .fold(self.pause_after_ms, |acc, e| acc.saturating_add(e.delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Pressed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingState {
    #[default]
    Idle,
    CountingDown,
    Running,
    Paused,
    Stopping,
    Completed,
    Stopped,
    Failed,
}

impl TypingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TypingState::Completed | TypingState::Stopped | TypingState::Failed
        )
    }

    pub fn can_transition_to(self, next: TypingState) -> bool {
        use TypingState::*;
        match (self, next) {
            (Idle, CountingDown) => true,
            (CountingDown, Running | Stopping | Stopped | Failed) => true,
            (Running, Paused | Stopping | Completed | Failed) => true,
            (Paused, Running | Stopping) => true,
            (Stopping, Stopped) => true,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TypingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TypingState::Idle => "Idle",
            TypingState::CountingDown => "Countdown",
            TypingState::Running => "Typing",
            TypingState::Paused => "Paused",
            TypingState::Stopping => "Stopping",
            TypingState::Completed => "Done",
            TypingState::Stopped => "Stopped",
            TypingState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub line_index: usize,
    pub char_index: usize,
    pub total_lines: usize,
    pub total_chars: usize,
    pub chars_done: usize,
    /// Index of the unit this progress belongs to.
    pub unit_index: usize,
    pub state: TypingState,
}

/// What subscribers of a controller receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    StateChanged(TypingState),
    Countdown { remaining_secs: u64 },
    Progress(ProgressEvent),
    DeliveryFailed { error: TypingError },
    Finished {
        state: TypingState,
        error: Option<TypingError>,
    },
}

/// Point-in-time view of the controller, for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobSnapshot {
    pub state: TypingState,
    pub progress: ProgressEvent,
    pub last_error: Option<TypingError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newline_and_tab_become_control_keys() {
        assert_eq!(Unit::for_char('\n'), Unit::Control(ControlKey::Enter));
        assert_eq!(Unit::for_char('\t'), Unit::Control(ControlKey::Tab));
        assert_eq!(Unit::for_char('x'), Unit::Text("x".to_string()));
        assert_eq!(SubEvent::Backspace.unit(), Unit::Control(ControlKey::Backspace));
    }

    #[test]
    fn job_json_fills_defaults() {
        let job: TypingJob =
            serde_json::from_str(r#"{"text":"hi","target":17}"#).expect("valid job json");
        assert_eq!(job.target, WindowHandle(17));
        assert_eq!(job.mode, TypingMode::CharByChar);
        assert_eq!(job.strategy, StrategyKind::Background);
        assert_eq!(job.countdown_secs, 3);
        assert_eq!(job.pacing, Pacing::default());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use TypingState::*;
        assert!(Idle.can_transition_to(CountingDown));
        assert!(CountingDown.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Completed.can_transition_to(Idle));
        assert!(!Running.can_transition_to(Idle));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn line_and_char_totals_follow_newlines() {
        let job = TypingJob::new("hi\nyo", WindowHandle(1));
        assert_eq!(job.total_lines(), 2);
        assert_eq!(job.total_chars(), 5);

        let crlf = TypingJob::new("hi\r\nyo\r\n", WindowHandle(1));
        assert_eq!(crlf.total_lines(), 3);
        assert_eq!(crlf.total_chars(), 6);
    }

    #[test]
    fn typo_groups_mark_progress_per_first_typed_char() {
        let at = |event| TimedSubEvent { delay_ms: 0, event };
        // "abc" typed as "xbc", three backspaces, then "abc" again
        let mut events = vec![
            at(SubEvent::TypeWrong {
                wrong: 'x',
                intended: 'a',
            }),
            at(SubEvent::correct_char('b')),
            at(SubEvent::correct_char('c')),
        ];
        events.extend((0..3).map(|_| at(SubEvent::Backspace)));
        events.extend("abc".chars().map(|c| at(SubEvent::correct_char(c))));
        let unit = PlannedUnit {
            line_index: 0,
            char_index: 6,
            chars_done: 7,
            events,
            pause_after_ms: 0,
        };

        let marks = unit.progress_marks();
        assert_eq!(marks.len(), 9);
        assert_eq!(&marks[..3], &[Some((4, 5)), Some((5, 6)), None]);
        assert!(marks[3..].iter().all(Option::is_none));

        let clean = PlannedUnit {
            line_index: 0,
            char_index: 0,
            chars_done: 1,
            events: vec![at(SubEvent::correct_char('a'))],
            pause_after_ms: 0,
        };
        assert_eq!(clean.progress_marks(), vec![None]);
    }
}
