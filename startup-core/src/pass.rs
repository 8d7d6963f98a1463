//! Passes
//!
//! A pass is one walk of a frozen registry: build the graph, validate it,
//! resolve an order, execute. Each pass has its own identifier and its own
//! execution context, so any number of passes can run over one registry.
//!
//! ```text
//! Building -> Validated -> Resolved -> Executing -> Completed
//!     \___________\____________\___________\______> Failed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::span::EnteredSpan;
use tracing::{debug, info_span};

use crate::error::{Error, Result};

/// Unique identifier for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(u64);

impl PassId {
    /// Generate a new unique pass ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for PassId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a pass is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    /// Assembling the dependency graph from the registry and the roots.
    Building,
    /// The graph has a single producer per name and every requirement is met.
    Validated,
    /// An execution order exists.
    Resolved,
    /// Steps are running.
    Executing,
    Completed,
    Failed,
}

impl PassState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The state that follows this one on success.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Building => Some(Self::Validated),
            Self::Validated => Some(Self::Resolved),
            Self::Resolved => Some(Self::Executing),
            Self::Executing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }
}

impl fmt::Display for PassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Building => "building",
            Self::Validated => "validated",
            Self::Resolved => "resolved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tracks the state of a single pass and logs its transitions.
///
/// The pass span stays entered until the pass is dropped, so everything
/// logged on this thread in between is attributed to it.
#[derive(Debug)]
pub(crate) struct Pass {
    id: PassId,
    state: PassState,
    _span: EnteredSpan,
}

impl Pass {
    pub(crate) fn begin() -> Self {
        let id = PassId::new();
        let span = info_span!("pass", id = id.raw()).entered();
        debug!(state = %PassState::Building, "pass started");
        Self {
            id,
            state: PassState::Building,
            _span: span,
        }
    }

    pub(crate) fn state(&self) -> PassState {
        self.state
    }

    /// Move to the next state on the success path.
    pub(crate) fn advance(&mut self) -> Result<PassState> {
        let next = self.state.next().ok_or_else(|| {
            Error::Invariant(format!("pass {} cannot leave state {}", self.id, self.state))
        })?;
        self.transition(next);
        Ok(next)
    }

    /// Record `err` and move to `Failed`.
    pub(crate) fn fail(&mut self, err: &Error) {
        if self.state.is_terminal() {
            return;
        }
        debug!(state = %self.state, stage = %err.stage(), error = %err, "pass failed");
        self.state = PassState::Failed;
    }

    fn transition(&mut self, next: PassState) {
        debug!(from = %self.state, to = %next, "pass transition");
        self.state = next;
    }
}
