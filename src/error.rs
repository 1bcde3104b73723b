//! Error types for the typing engine.
//!
//! `TypingError` travels inside controller events, so it is `Clone` and carries
//! only plain data. Desktop backends report `DesktopError`, which the send
//! strategies translate into the typing taxonomy.

use thiserror::Error;

use crate::model::WindowHandle;

/// Everything the engine can report about a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypingError {
    /// `start` was called while another job is still active.
    #[error("a typing job is already running")]
    AlreadyRunning,

    /// The job's configuration is inconsistent.
    #[error("invalid typing job: {0}")]
    InvalidJob(String),

    /// The target window was closed or its handle went stale.
    #[error("target window {0} is no longer valid")]
    TargetInvalid(WindowHandle),

    /// Message-based delivery was not acknowledged by the target.
    #[error("target window {0} does not accept background input; try foreground mode")]
    UnsupportedByTarget(WindowHandle),

    /// The foreground target lost input focus while a unit was being typed.
    #[error("target window {0} lost input focus; the current unit was not delivered")]
    FocusLost(WindowHandle),

    /// A character has no keystroke in the active keymap.
    #[error("character {0:?} cannot be typed with the US keymap")]
    UnsupportedCharacter(char),

    /// The pointer was parked in a reserved screen corner.
    #[error("fail-safe triggered: pointer at screen corner ({x}, {y})")]
    FailSafeAborted { x: i32, y: i32 },

    /// The target runs with privileges this process does not have.
    #[error("target window {0} rejected input (access denied); run with matching privileges")]
    PrivilegeMismatch(WindowHandle),

    /// The desktop connection or protocol failed.
    #[error("desktop backend error: {0}")]
    Backend(String),
}

/// Result type alias for typing operations.
pub type Result<T> = std::result::Result<T, TypingError>;

impl TypingError {
    /// Terminal errors end the job as `Failed`; the rest are reported and the job
    /// moves on to the next unit.
    pub fn is_terminal(&self) -> bool {
        match self {
            TypingError::TargetInvalid(_)
            | TypingError::FailSafeAborted { .. }
            | TypingError::PrivilegeMismatch(_)
            | TypingError::Backend(_) => true,
            TypingError::UnsupportedByTarget(_)
            | TypingError::FocusLost(_)
            | TypingError::UnsupportedCharacter(_) => false,
            TypingError::AlreadyRunning | TypingError::InvalidJob(_) => false,
        }
    }

    pub fn invalid_job(message: impl Into<String>) -> Self {
        Self::InvalidJob(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Translate a desktop failure observed while talking to `target`.
    pub fn from_desktop(err: DesktopError, target: WindowHandle) -> Self {
        match err {
            DesktopError::WindowGone => TypingError::TargetInvalid(target),
            DesktopError::AccessDenied => TypingError::PrivilegeMismatch(target),
            DesktopError::Unsupported(_) => TypingError::UnsupportedByTarget(target),
            DesktopError::Connection(msg) | DesktopError::Protocol(msg) => {
                TypingError::Backend(msg)
            }
        }
    }
}

/// Failures reported by a `WindowManager` or `InputInjector` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesktopError {
    #[error("window no longer exists")]
    WindowGone,

    #[error("access denied")]
    AccessDenied,

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypingError::TargetInvalid(WindowHandle(0x2a));
        assert_eq!(err.to_string(), "target window 0x2a is no longer valid");

        let err = TypingError::FailSafeAborted { x: 0, y: 1079 };
        assert_eq!(
            err.to_string(),
            "fail-safe triggered: pointer at screen corner (0, 1079)"
        );
    }

    #[test]
    fn only_structural_failures_are_terminal() {
        let h = WindowHandle(7);
        assert!(TypingError::TargetInvalid(h).is_terminal());
        assert!(TypingError::PrivilegeMismatch(h).is_terminal());
        assert!(TypingError::FailSafeAborted { x: 0, y: 0 }.is_terminal());
        assert!(!TypingError::FocusLost(h).is_terminal());
        assert!(!TypingError::UnsupportedByTarget(h).is_terminal());
        assert!(!TypingError::UnsupportedCharacter('é').is_terminal());
    }

    #[test]
    fn desktop_errors_map_onto_the_taxonomy() {
        let h = WindowHandle(3);
        assert_eq!(
            TypingError::from_desktop(DesktopError::WindowGone, h),
            TypingError::TargetInvalid(h)
        );
        assert_eq!(
            TypingError::from_desktop(DesktopError::AccessDenied, h),
            TypingError::PrivilegeMismatch(h)
        );
        assert!(matches!(
            TypingError::from_desktop(DesktopError::Connection("eof".into()), h),
            TypingError::Backend(_)
        ));
    }
}
