//! Progress tracking for a chain of exit-triggered stages

use crate::runtime::action::ActionId;
use crate::runtime::plan::Chain;
use indexmap::IndexMap;
use std::fmt;

/// State of one stage in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Not launched yet
    Pending,
    /// Process running
    Activating,
    /// Process exited
    Done(Option<i32>),
    /// Process could not be started
    LaunchFailed,
}

/// State of a whole chain
///
/// For the bringup chain this reads `NotStarted`, `Activating(spawn_entity)`,
/// `Active(spawn_entity)`, `Activating(load_joint_state_broadcaster)`, ...
/// up to `Complete`. A stage that fails to launch leaves the chain
/// `Stalled` for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    Activating(ActionId),
    Active(ActionId),
    Stalled(ActionId),
    Complete,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::NotStarted => write!(f, "not started"),
            ChainState::Activating(id) => write!(f, "activating '{}'", id),
            ChainState::Active(id) => write!(f, "'{}' done", id),
            ChainState::Stalled(id) => write!(f, "stalled at '{}'", id),
            ChainState::Complete => write!(f, "complete"),
        }
    }
}

/// Tracks the stages of one chain as launches and exits are observed
#[derive(Debug, Clone)]
pub struct ChainTracker {
    root: ActionId,
    stages: IndexMap<ActionId, StageState>,
}

impl ChainTracker {
    pub fn new(chain: Chain) -> Self {
        Self {
            root: chain.root,
            stages: chain
                .stages
                .into_iter()
                .map(|id| (id, StageState::Pending))
                .collect(),
        }
    }

    pub fn root(&self) -> &ActionId {
        &self.root
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stages.contains_key(id)
    }

    pub fn stage(&self, id: &str) -> Option<StageState> {
        self.stages.get(id).copied()
    }

    pub fn on_launched(&mut self, id: &str) {
        self.advance(id, StageState::Pending, StageState::Activating);
    }

    pub fn on_launch_failed(&mut self, id: &str) {
        self.advance(id, StageState::Pending, StageState::LaunchFailed);
    }

    pub fn on_exited(&mut self, id: &str, code: Option<i32>) {
        self.advance(id, StageState::Activating, StageState::Done(code));
    }

    /// Stages only move forward: the transition applies from `from` only
    fn advance(&mut self, id: &str, from: StageState, to: StageState) {
        if let Some(stage) = self.stages.get_mut(id) {
            if *stage == from {
                *stage = to;
            } else {
                log::debug!(
                    "[{}] Ignoring stage transition {:?} -> {:?} in chain '{}'",
                    id,
                    stage,
                    to,
                    self.root
                );
            }
        }
    }

    pub fn state(&self) -> ChainState {
        if let Some((id, _)) = self
            .stages
            .iter()
            .find(|(_, s)| **s == StageState::LaunchFailed)
        {
            return ChainState::Stalled(id.clone());
        }

        if self.stages.values().all(|s| matches!(s, StageState::Done(_))) {
            return ChainState::Complete;
        }

        match self
            .stages
            .iter()
            .rev()
            .find(|(_, s)| **s != StageState::Pending)
        {
            Some((id, StageState::Activating)) => ChainState::Activating(id.clone()),
            Some((id, _)) => ChainState::Active(id.clone()),
            None => ChainState::NotStarted,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == ChainState::Complete
    }
}
