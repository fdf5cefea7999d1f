//! Lifecycle states of the shared engine runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::FailureCause;

/// The lifecycle state of the shared runtime.
///
/// Exactly one value is visible at any instant. `R` is the native resource,
/// owned by the state while `Ready`.
#[derive(Debug)]
pub enum LifecycleState<R> {
    /// No initialization attempted yet.
    Idle,
    /// One initialization attempt is running.
    InProgress,
    /// The runtime is built and usable.
    Ready(R),
    /// The last attempt failed.
    Failed(FailureCause),
    /// The runtime has been torn down. Terminal.
    Disposed,
}

impl<R> LifecycleState<R> {
    /// Returns the data-free discriminant of this state.
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::InProgress => Phase::InProgress,
            Self::Ready(_) => Phase::Ready,
            Self::Failed(_) => Phase::Failed,
            Self::Disposed => Phase::Disposed,
        }
    }

    /// Consumes the state, returning the resource if it was `Ready`.
    pub fn into_resource(self) -> Option<R> {
        match self {
            Self::Ready(resource) => Some(resource),
            _ => None,
        }
    }
}

/// Discriminant of [`LifecycleState`], used for waits and conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// See [`LifecycleState::Idle`].
    Idle,
    /// See [`LifecycleState::InProgress`].
    InProgress,
    /// See [`LifecycleState::Ready`].
    Ready,
    /// See [`LifecycleState::Failed`].
    Failed,
    /// See [`LifecycleState::Disposed`].
    Disposed,
}

impl Phase {
    /// Whether an `initialize` call may claim a new attempt from this phase.
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }

    /// Whether no attempt is currently running.
    pub const fn is_stable(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::InProgress => "in-progress",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Identifies one initialization attempt.
///
/// Incremented on every successful claim; the initial `Idle` state belongs
/// to attempt zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct AttemptId(u64);

impl AttemptId {
    /// The attempt id of the initial state.
    pub const INITIAL: Self = Self(0);

    /// Returns the id of the attempt following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
