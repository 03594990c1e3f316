//! Orchestration plan construction and validation

use crate::runtime::action::{Action, ActionId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Actions to start when a given process exits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    trigger: ActionId,
    on_exit: Vec<Action>,
}

impl Binding {
    pub fn trigger(&self) -> &ActionId {
        &self.trigger
    }

    pub fn on_exit(&self) -> &[Action] {
        &self.on_exit
    }
}

/// A chain of actions rooted at an immediately launched action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Root action, launched with the plan
    pub root: ActionId,
    /// Root followed by every action reachable through bindings, in trigger order
    pub stages: Vec<ActionId>,
}

/// Immediately launched actions plus exit bindings
///
/// Only [`PlanBuilder::build`] creates a plan, so every plan has unique
/// action ids, no dangling triggers and an acyclic trigger graph.
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    immediate: Vec<Action>,
    bindings: Vec<Binding>,
    /// All action ids in topological order
    order: Vec<ActionId>,
}

impl OrchestrationPlan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::new()
    }

    /// Actions started as soon as the plan runs, in launch order
    pub fn immediate(&self) -> &[Action] {
        &self.immediate
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Look up any action in the plan
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.immediate
            .iter()
            .chain(self.bindings.iter().flat_map(|b| b.on_exit.iter()))
            .find(|a| a.id().as_str() == id)
    }

    /// Action ids in topological order (every trigger before its follow-ons)
    pub fn launch_order(&self) -> impl Iterator<Item = &ActionId> {
        self.order.iter()
    }

    /// Trigger of the action, if it is started by a binding
    pub fn trigger_of(&self, id: &str) -> Option<&ActionId> {
        self.bindings
            .iter()
            .find(|b| b.on_exit.iter().any(|a| a.id().as_str() == id))
            .map(|b| &b.trigger)
    }

    /// Actions started on the exit of `id`
    pub fn followers(&self, id: &str) -> Vec<&Action> {
        self.bindings
            .iter()
            .filter(|b| b.trigger.as_str() == id)
            .flat_map(|b| b.on_exit.iter())
            .collect()
    }

    /// One chain per immediate action that triggers at least one binding
    pub fn chains(&self) -> Vec<Chain> {
        self.immediate
            .iter()
            .filter(|a| !self.followers(a.id().as_str()).is_empty())
            .map(|root| {
                let mut stages = Vec::new();
                let mut queue = VecDeque::from([root.id().clone()]);
                while let Some(id) = queue.pop_front() {
                    queue.extend(self.followers(id.as_str()).into_iter().map(|a| a.id().clone()));
                    stages.push(id);
                }
                Chain {
                    root: root.id().clone(),
                    stages,
                }
            })
            .collect()
    }
}

/// Collects actions and bindings, then validates them into a plan
#[derive(Debug, Default)]
pub struct PlanBuilder {
    immediate: Vec<Action>,
    bindings: Vec<Binding>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch the action as soon as the plan starts
    pub fn launch(mut self, action: Action) -> Self {
        self.immediate.push(action);
        self
    }

    /// Start `actions` when the process of `trigger` exits, whatever its exit code
    pub fn on_exit(mut self, trigger: impl Into<ActionId>, actions: Vec<Action>) -> Self {
        self.bindings.push(Binding {
            trigger: trigger.into(),
            on_exit: actions,
        });
        self
    }

    pub fn build(self) -> Result<OrchestrationPlan, ConfigurationError> {
        // Unique ids across immediate and triggered actions
        let mut seen: HashSet<&ActionId> = HashSet::new();
        let all = self
            .immediate
            .iter()
            .chain(self.bindings.iter().flat_map(|b| b.on_exit.iter()));
        for action in all {
            if !seen.insert(action.id()) {
                return Err(ConfigurationError::DuplicateAction(action.id().clone()));
            }
        }

        for binding in &self.bindings {
            if !seen.contains(&binding.trigger) {
                return Err(ConfigurationError::DanglingTrigger {
                    trigger: binding.trigger.clone(),
                    actions: binding.on_exit.iter().map(|a| a.id().clone()).collect(),
                });
            }
        }

        let order = self.topological_sort()?;

        Ok(OrchestrationPlan {
            immediate: self.immediate,
            bindings: self.bindings,
            order,
        })
    }

    /// Kahn's algorithm over the trigger graph
    fn topological_sort(&self) -> Result<Vec<ActionId>, ConfigurationError> {
        let mut nodes: IndexMap<&ActionId, usize> = IndexMap::new();
        let mut dependents: HashMap<&ActionId, Vec<&ActionId>> = HashMap::new();

        for action in &self.immediate {
            nodes.insert(action.id(), 0);
        }
        for binding in &self.bindings {
            nodes.entry(&binding.trigger).or_insert(0);
            for action in &binding.on_exit {
                *nodes.entry(action.id()).or_insert(0) += 1;
                dependents
                    .entry(&binding.trigger)
                    .or_default()
                    .push(action.id());
            }
        }

        let mut queue: VecDeque<&ActionId> = nodes
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut sorted: Vec<ActionId> = Vec::with_capacity(nodes.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.clone());

            for &dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = nodes.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let sorted_ids: HashSet<_> = sorted.iter().collect();
            let cycle: Vec<ActionId> = nodes
                .keys()
                .filter(|id| !sorted_ids.contains(**id))
                .map(|id| (*id).clone())
                .collect();
            return Err(ConfigurationError::CyclicBinding(cycle));
        }

        Ok(sorted)
    }
}

/// Plan errors, all detected before any process is launched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Binding for [{}] is triggered by '{trigger}', which is not an action of the plan", join(.actions))]
    DanglingTrigger {
        trigger: ActionId,
        actions: Vec<ActionId>,
    },

    #[error("Action '{0}' is declared more than once")]
    DuplicateAction(ActionId),

    #[error("Cyclic binding detected involving actions: {}", join(.0))]
    CyclicBinding(Vec<ActionId>),
}

fn join(ids: &[ActionId]) -> String {
    ids.iter()
        .map(ActionId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Display the plan in a human-readable format
impl fmt::Display for OrchestrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bringup Plan")?;
        writeln!(f, "============")?;
        writeln!(f)?;

        writeln!(f, "Launched immediately:")?;
        for (i, action) in self.immediate.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, action.id())?;
            writeln!(f, "     Command: {}", action.command_line())?;
        }

        if !self.bindings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Started on exit:")?;
            for binding in &self.bindings {
                for action in &binding.on_exit {
                    writeln!(f, "  {} -> {}", binding.trigger, action.id())?;
                    writeln!(f, "     Command: {}", action.command_line())?;
                }
            }
        }

        for chain in self.chains() {
            writeln!(f)?;
            let stages: Vec<&str> = chain.stages.iter().map(ActionId::as_str).collect();
            writeln!(f, "Chain '{}': {}", chain.root, stages.join(" -> "))?;
        }

        Ok(())
    }
}
