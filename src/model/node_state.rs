//! Node lifecycle states and the transitions each operation may drive
//!
//! Node state is only ever written by sub-task execution. Each operation
//! type walks nodes along a fixed path; a transition outside that path is a
//! bug in the phase sequence and is rejected rather than applied.

use serde::{Deserialize, Serialize};

use super::params::OperationType;

/// Lifecycle tag of a single node
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Provisioning intent recorded, machine not yet part of the universe
    ToBeAdded,
    /// Processes (and for paused universes, the machine) are stopped
    Stopped,
    /// Machine up, processes being started
    Starting,
    /// Serving traffic
    #[default]
    Live,
    /// Removed from the universe
    Decommissioned,
}

impl NodeState {
    /// Returns true if the state machine allows moving from `self` to `next`
    ///
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (ToBeAdded, Starting)
                | (Stopped, Starting)
                | (Stopped, Decommissioned)
                | (Starting, Live)
                | (Live, Stopped)
                | (Live, Decommissioned)
        )
    }

    /// Returns true if this state is terminal
    pub fn is_terminal(self) -> bool {
        self == NodeState::Decommissioned
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToBeAdded => write!(f, "ToBeAdded"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Starting => write!(f, "Starting"),
            Self::Live => write!(f, "Live"),
            Self::Decommissioned => write!(f, "Decommissioned"),
        }
    }
}

const RESUME_PATH: &[(NodeState, NodeState)] = &[
    (NodeState::Stopped, NodeState::Starting),
    (NodeState::Starting, NodeState::Live),
];

const RESTART_PATH: &[(NodeState, NodeState)] = &[
    (NodeState::Live, NodeState::Stopped),
    (NodeState::Stopped, NodeState::Starting),
    (NodeState::Starting, NodeState::Live),
];

impl OperationType {
    /// The transitions this operation is allowed to drive
    pub fn node_path(self) -> &'static [(NodeState, NodeState)] {
        match self {
            OperationType::Resume => RESUME_PATH,
            OperationType::ResizeNode | OperationType::TlsToggle => RESTART_PATH,
        }
    }

    /// Returns true if `from -> to` lies on this operation's path
    pub fn allows_transition(self, from: NodeState, to: NodeState) -> bool {
        from == to
            || (from.can_transition_to(to) && self.node_path().contains(&(from, to)))
    }
}
