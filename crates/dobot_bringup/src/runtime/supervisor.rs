//! Process supervisor - launches plan actions and sequences them on exit events

use crate::runtime::action::{Action, ActionId, OutputMode};
use crate::runtime::bus::{EventBus, ExitEvent, Subscription};
use crate::runtime::chain::ChainTracker;
use crate::runtime::plan::OrchestrationPlan;
use crate::runtime::process::{
    LaunchFailure, ManagedProcess, ProcessError, ProcessEvent, ProcessHandle, ProcessStatus,
};
use indexmap::IndexMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Time allowed for killed processes to be reaped
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time allowed for processes to exit after SIGTERM
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// A follow-on action that could not be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredFailure {
    /// Action that failed to launch
    pub action: ActionId,
    /// Action whose exit triggered it
    pub trigger: ActionId,
    /// OS error message
    pub error: String,
}

/// Supervisor state
pub struct Supervisor {
    /// Configuration
    config: SupervisorConfig,
    /// Exit handlers wired from plan bindings
    bus: EventBus,
    /// Every process launched or attempted, in launch order
    processes: IndexMap<ActionId, ManagedProcess>,
    /// Progress of each chain of the plan
    chains: Vec<ChainTracker>,
    /// Exits observed, in order
    exits: Vec<ExitEvent>,
    /// Follow-on launch failures
    triggered_failures: Vec<TriggeredFailure>,
    /// Set once shutdown begins; exits are no longer dispatched
    shutting_down: bool,
    /// Event channel
    event_tx: mpsc::UnboundedSender<(ActionId, ProcessEvent)>,
    event_rx: mpsc::UnboundedReceiver<(ActionId, ProcessEvent)>,
}

impl Supervisor {
    /// Create a new supervisor
    pub fn new(config: SupervisorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            bus: EventBus::new(),
            processes: IndexMap::new(),
            chains: Vec::new(),
            exits: Vec::new(),
            triggered_failures: Vec::new(),
            shutting_down: false,
            event_tx,
            event_rx,
        }
    }

    /// Launch one action without waiting for it
    pub fn launch(&mut self, action: Action) -> Result<ProcessHandle, LaunchFailure> {
        let id = action.id().clone();
        if self.processes.contains_key(&id) {
            // Plans have unique ids, so this only happens on direct misuse
            log::warn!("[{}] Already launched, ignoring", id);
            return Err(LaunchFailure {
                action: id,
                executable: action.executable().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "action already launched",
                ),
            });
        }

        let mut process = ManagedProcess::new(action).with_event_sender(self.event_tx.clone());
        let result = process.start();
        self.processes.insert(id.clone(), process);

        match result {
            Ok(handle) => {
                for chain in &mut self.chains {
                    chain.on_launched(id.as_str());
                }
                Ok(handle)
            }
            Err(ProcessError::Launch(failure)) => {
                for chain in &mut self.chains {
                    chain.on_launch_failed(id.as_str());
                }
                Err(failure)
            }
            Err(ProcessError::AlreadyStarted(id)) => Err(LaunchFailure {
                executable: String::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("process '{}' already started", id),
                ),
                action: id,
            }),
        }
    }

    /// Wire the plan's bindings, then launch its immediate actions in order
    ///
    /// Every binding is subscribed before the first process starts, so no
    /// exit can be missed. The first immediate launch failure aborts: later
    /// immediate actions are never attempted.
    pub fn start(&mut self, plan: &OrchestrationPlan) -> Result<(), SupervisorError> {
        self.chains = plan.chains().into_iter().map(ChainTracker::new).collect();

        for binding in plan.bindings() {
            let actions = binding.on_exit().to_vec();
            let subscription = self
                .bus
                .subscribe(binding.trigger(), move |_: &ExitEvent| actions.clone());
            if subscription == Subscription::Expired {
                return Err(SupervisorError::TriggerAlreadyExited(binding.trigger().clone()));
            }
        }

        log::info!("Launching {} actions...", plan.immediate().len());

        for action in plan.immediate() {
            if let Err(failure) = self.launch(action.clone()) {
                log::error!("[{}] {}", failure.action, failure);
                return Err(SupervisorError::ImmediateLaunch(failure));
            }
        }

        log::info!("All immediate actions launched");
        Ok(())
    }

    /// Dispatch process events until every process has exited or shutdown is requested
    pub async fn wait(&mut self, mut shutdown_rx: watch::Receiver<()>) {
        while self.has_running() {
            tokio::select! {
                biased;

                // Check for shutdown signal
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    self.shutting_down = true;
                    break;
                }

                // Process events
                event = self.event_rx.recv() => {
                    match event {
                        Some((id, event)) => self.handle_event(id, event),
                        None => break,
                    }
                }
            }
        }

        // Output that arrived after the last exit
        while let Ok((id, event)) = self.event_rx.try_recv() {
            self.handle_event(id, event);
        }

        if !self.has_running() {
            log::info!("All processes have stopped");
        }
    }

    fn handle_event(&mut self, id: ActionId, event: ProcessEvent) {
        match event {
            ProcessEvent::Started { pid } => {
                log::info!("[{}] Process started with PID: {}", id, pid);
            }
            ProcessEvent::Output { line, is_stderr } => {
                let mode = self
                    .processes
                    .get(&id)
                    .map(|p| p.action().output_mode())
                    .unwrap_or_default();
                match (mode, is_stderr) {
                    (OutputMode::Screen, false) => log::info!("[{}] {}", id, line),
                    (OutputMode::Screen, true) => log::warn!("[{}] {}", id, line),
                    (OutputMode::Log, _) => log::debug!("[{}] {}", id, line),
                }
            }
            ProcessEvent::Exited { code } => self.handle_exit(id, code),
        }
    }

    fn handle_exit(&mut self, id: ActionId, code: Option<i32>) {
        if let Some(process) = self.processes.get_mut(&id) {
            process.mark_exited(code);
        }

        match code {
            Some(0) => log::info!("[{}] Process exited with code: 0", id),
            Some(code) => log::warn!("[{}] Process exited with code: {}", id, code),
            None => log::warn!("[{}] Process terminated by signal", id),
        }

        for chain in &mut self.chains {
            chain.on_exited(id.as_str(), code);
        }

        let event = ExitEvent::new(id.clone(), code);
        if self.shutting_down {
            self.exits.push(event);
            return;
        }

        // Follow-ons start on any exit, successful or not
        let follow_ons = self.bus.publish(&event);
        self.exits.push(event);

        for action in follow_ons {
            self.launch_triggered(&id, action);
        }

        for chain in self.chains.iter().filter(|c| c.contains(id.as_str())) {
            log::info!("Chain '{}': {}", chain.root(), chain.state());
        }
    }

    fn launch_triggered(&mut self, trigger: &ActionId, action: Action) {
        log::info!("[{}] Exit of '{}' triggers start", action.id(), trigger);
        if let Err(failure) = self.launch(action) {
            log::error!(
                "[{}] {} (triggered by '{}'); chain stalls here",
                failure.action,
                failure,
                trigger
            );
            self.triggered_failures.push(TriggeredFailure {
                action: failure.action.clone(),
                trigger: trigger.clone(),
                error: failure.source.to_string(),
            });
        }
    }

    /// Stop all running processes, last launched first
    pub async fn shutdown(&mut self) {
        self.shutting_down = true;

        let running: Vec<ActionId> = self
            .processes
            .iter()
            .rev()
            .filter(|(_, p)| p.status().is_running())
            .map(|(id, _)| id.clone())
            .collect();

        if running.is_empty() {
            return;
        }

        log::info!("Shutting down {} processes...", running.len());

        for id in &running {
            if let Some(process) = self.processes.get_mut(id) {
                log::info!("[{}] Stopping process...", id);
                process.terminate();
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        if !self.drain_until(deadline).await {
            for (id, process) in self.processes.iter_mut() {
                if process.status().is_running() {
                    log::warn!("[{}] Process did not exit gracefully, forcing kill", id);
                    process.kill();
                }
            }
            let deadline = tokio::time::Instant::now() + KILL_GRACE;
            if !self.drain_until(deadline).await {
                for (id, _) in self.status().iter().filter(|(_, s)| s.is_running()) {
                    log::error!("[{}] Process still running after kill", id);
                }
                return;
            }
        }

        log::info!("All processes shut down");
    }

    /// Handle events until nothing runs or the deadline passes
    async fn drain_until(&mut self, deadline: tokio::time::Instant) -> bool {
        while self.has_running() {
            match tokio::time::timeout_at(deadline, self.event_rx.recv()).await {
                Ok(Some((id, event))) => self.handle_event(id, event),
                Ok(None) | Err(_) => return false,
            }
        }
        true
    }

    fn has_running(&self) -> bool {
        self.processes.values().any(|p| p.status().is_running())
    }

    /// Get process status summary, in launch order
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|(id, process)| (id.as_str(), process.status()))
            .collect()
    }

    /// Whether a launch of `id` was attempted
    pub fn was_launched(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    /// Exits observed so far, in order
    pub fn exits(&self) -> &[ExitEvent] {
        &self.exits
    }

    pub fn triggered_failures(&self) -> &[TriggeredFailure] {
        &self.triggered_failures
    }

    pub fn chains(&self) -> &[ChainTracker] {
        &self.chains
    }

    /// Chain rooted at `root`
    pub fn chain(&self, root: &str) -> Option<&ChainTracker> {
        self.chains.iter().find(|c| c.root().as_str() == root)
    }
}

/// Errors that can occur in the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Immediate action failed to launch, aborting plan: {0}")]
    ImmediateLaunch(#[source] LaunchFailure),

    #[error("Binding trigger '{0}' has already exited")]
    TriggerAlreadyExited(ActionId),
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::chain::ChainState;

    async fn run(plan: &OrchestrationPlan) -> (Supervisor, Result<(), SupervisorError>) {
        let mut supervisor = Supervisor::new(SupervisorConfig::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        let result = supervisor.start(plan);
        if result.is_ok() {
            tokio::time::timeout(Duration::from_secs(10), supervisor.wait(shutdown_rx))
                .await
                .unwrap();
        }
        supervisor.shutdown().await;
        (supervisor, result)
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("spawn", "true"))
            .on_exit("spawn", vec![Action::new("load_a", "true")])
            .on_exit("load_a", vec![Action::new("load_b", "true")])
            .build()
            .unwrap();

        let (supervisor, result) = run(&plan).await;
        result.unwrap();

        let exits: Vec<_> = supervisor.exits().iter().map(|e| e.source.as_str()).collect();
        assert_eq!(exits, vec!["spawn", "load_a", "load_b"]);
        assert_eq!(supervisor.chain("spawn").unwrap().state(), ChainState::Complete);
    }

    #[tokio::test]
    async fn test_non_zero_exit_still_triggers() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("spawn", "false"))
            .on_exit("spawn", vec![Action::new("load_a", "true")])
            .build()
            .unwrap();

        let (supervisor, result) = run(&plan).await;
        result.unwrap();

        assert_eq!(supervisor.exits()[0].code, Some(1));
        assert!(supervisor.was_launched("load_a"));
        assert_eq!(supervisor.status()[1], ("load_a", ProcessStatus::Exited(Some(0))));
    }

    #[tokio::test]
    async fn test_triggered_launch_failure_is_recorded() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("spawn", "true"))
            .on_exit("spawn", vec![Action::new("load_a", "/nonexistent/dobot/loader")])
            .on_exit("load_a", vec![Action::new("load_b", "true")])
            .build()
            .unwrap();

        let (supervisor, result) = run(&plan).await;
        result.unwrap();

        assert_eq!(supervisor.triggered_failures().len(), 1);
        assert_eq!(supervisor.triggered_failures()[0].trigger.as_str(), "spawn");
        assert!(!supervisor.was_launched("load_b"));
        assert_eq!(
            supervisor.chain("spawn").unwrap().state(),
            ChainState::Stalled("load_a".into())
        );
    }

    #[tokio::test]
    async fn test_immediate_launch_failure_aborts() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("simulator", "/nonexistent/dobot/sim"))
            .launch(Action::new("spawn", "true"))
            .on_exit("spawn", vec![Action::new("load_a", "true")])
            .build()
            .unwrap();

        let (supervisor, result) = run(&plan).await;

        assert!(matches!(
            result,
            Err(SupervisorError::ImmediateLaunch(ref f)) if f.action.as_str() == "simulator"
        ));
        assert!(!supervisor.was_launched("spawn"));
        assert!(!supervisor.was_launched("load_a"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_long_running_processes() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("simulator", "sleep").arg("30"))
            .build()
            .unwrap();

        let mut supervisor = Supervisor::new(SupervisorConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        supervisor.start(&plan).unwrap();
        shutdown_tx.send(()).unwrap();
        supervisor.wait(shutdown_rx).await;
        supervisor.shutdown().await;

        assert_eq!(supervisor.status(), vec![("simulator", ProcessStatus::Exited(None))]);
    }

    #[tokio::test]
    async fn test_exit_queued_at_shutdown_starts_nothing() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("spawn", "true"))
            .on_exit("spawn", vec![Action::new("load_a", "true")])
            .build()
            .unwrap();

        let mut supervisor = Supervisor::new(SupervisorConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        supervisor.start(&plan).unwrap();

        // Let the spawn exit reach the event queue before shutdown is requested
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown_tx.send(()).unwrap();
        supervisor.wait(shutdown_rx).await;
        supervisor.shutdown().await;

        assert_eq!(supervisor.status(), vec![("spawn", ProcessStatus::Exited(Some(0)))]);
        assert_eq!(supervisor.exits().len(), 1);
        assert!(!supervisor.was_launched("load_a"));
        assert_eq!(
            supervisor.chain("spawn").unwrap().state(),
            ChainState::Active("spawn".into())
        );
    }

    #[tokio::test]
    async fn test_shutdown_kills_process_ignoring_sigterm() {
        let plan = OrchestrationPlan::builder()
            .launch(Action::new("simulator", "sh").args(["-c", "trap '' TERM; sleep 30"]))
            .build()
            .unwrap();

        let mut supervisor = Supervisor::new(SupervisorConfig {
            shutdown_timeout: Duration::from_millis(300),
        });
        supervisor.start(&plan).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
            .await
            .unwrap();

        assert_eq!(supervisor.status(), vec![("simulator", ProcessStatus::Exited(None))]);
        assert_eq!(supervisor.exits().len(), 1);
    }
}
