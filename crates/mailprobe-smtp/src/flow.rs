//! Three-way outcome of a protocol step.
//!
//! A step either lets the caller carry on, stops the session on purpose at
//! a configured checkpoint, or fails. The first two are `Ok`; failure is the
//! `Err` of the surrounding [`Result`](crate::Result), so a deliberate stop
//! can never be mistaken for an error.

use crate::stage::{Checkpoint, Stage};

/// A session that ended exactly as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    /// Checkpoint that fired.
    pub stage: Stage,
    /// How the session was ended.
    pub checkpoint: Checkpoint,
}

impl Termination {
    /// Creates a termination record.
    #[must_use]
    pub const fn new(stage: Stage, checkpoint: Checkpoint) -> Self {
        Self { stage, checkpoint }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.checkpoint.as_str(), self.stage)
    }
}

/// Result of a step that did not fail.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<T> {
    /// Proceed with the next step.
    Continue(T),
    /// Stop; the session was ended by a checkpoint.
    Terminated(Termination),
}

impl<T> Flow<T> {
    /// Returns true if the session was terminated.
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    /// Returns the continued value, if any.
    pub fn continued(self) -> Option<T> {
        match self {
            Self::Continue(value) => Some(value),
            Self::Terminated(_) => None,
        }
    }

    /// Returns the termination, if any.
    pub const fn termination(&self) -> Option<Termination> {
        match self {
            Self::Continue(_) => None,
            Self::Terminated(t) => Some(*t),
        }
    }

    /// Maps the continued value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Flow<U> {
        match self {
            Self::Continue(value) => Flow::Continue(f(value)),
            Self::Terminated(t) => Flow::Terminated(t),
        }
    }
}

/// Unwraps [`Flow::Continue`], or returns `Ok(Flow::Terminated(..))` from the
/// enclosing function.
///
/// ```ignore
/// let reply = proceed!(self.command(250, Stage::Mail, cmd).await?);
/// ```
#[macro_export]
macro_rules! proceed {
    ($flow:expr) => {
        match $flow {
            $crate::Flow::Continue(value) => value,
            $crate::Flow::Terminated(termination) => {
                return Ok($crate::Flow::Terminated(termination));
            }
        }
    };
}
