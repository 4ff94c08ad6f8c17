//! States of one recreate run and the transitions between them.

use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateState {
    Inspecting,
    Destroying,
    AwaitingDestruction,
    Creating,
    Reattaching,
    Starting,
    Committed,
    RollingBack,
    Failed,
}

impl RecreateState {
    pub fn can_transition(self, next: RecreateState) -> bool {
        use RecreateState::*;
        matches!(
            (self, next),
            // A restore run has nothing to destroy.
            (Inspecting, Destroying | Creating | Failed)
                | (Destroying, AwaitingDestruction | Failed)
                | (AwaitingDestruction, Creating | Failed)
                | (Creating, Reattaching | RollingBack | Failed)
                | (Reattaching, Starting)
                | (Starting, Committed | RollingBack | Failed)
                | (RollingBack, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecreateState::Committed | RecreateState::Failed)
    }
}

/// Tracks the state of a single run and logs each step.
#[derive(Debug)]
pub(crate) struct Progress {
    target: String,
    state: RecreateState,
}

impl Progress {
    pub(crate) fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: RecreateState::Inspecting,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RecreateState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: RecreateState) {
        debug_assert!(
            self.state.can_transition(next),
            "illegal recreate transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Recreate {}: {:?} -> {:?}", self.target, self.state, next);
        self.state = next;
    }

    /// Moves to `Failed` and hands the error back for `?`.
    pub(crate) fn fail<E>(&mut self, err: E) -> E {
        self.advance(RecreateState::Failed);
        err
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        // Only a cancelled run ends outside a terminal state.
        if !self.state.is_terminal() {
            warn!(
                "Recreate {} abandoned while {:?}, the instance may need attention",
                self.target, self.state
            );
        }
    }
}
