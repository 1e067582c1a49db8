use std::fmt;

/// Lifecycle of the single simulation instance.
///
/// `Uninitialized -> Loading -> Ready <-> Stepping`; a `Make` from any state
/// re-enters `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// No instance exists.
    #[default]
    Uninitialized,
    /// Waiting on the compute module; commands are deferred.
    Loading,
    /// An instance exists and is idle.
    Ready,
    /// An instance exists and ticks are running.
    Stepping,
}

impl RunState {
    /// Whether an instance is reachable in this state.
    pub fn has_instance(self) -> bool {
        matches!(self, RunState::Ready | RunState::Stepping)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (_, Loading) => true,
            (Loading, Ready) | (Loading, Uninitialized) => true,
            (Ready, Stepping) | (Stepping, Ready) => true,
            (Ready, Uninitialized) | (Stepping, Uninitialized) => true,
            (a, b) => a == b,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Uninitialized => "uninitialized",
            RunState::Loading => "loading",
            RunState::Ready => "ready",
            RunState::Stepping => "stepping",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
