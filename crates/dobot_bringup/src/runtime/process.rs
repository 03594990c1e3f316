//! Managed process abstraction

use crate::runtime::action::{Action, ActionId};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is pending start
    Pending,
    /// Process is running
    Running,
    /// Process has exited with exit code (`None` if killed by a signal)
    Exited(Option<i32>),
    /// Process failed to start
    Failed,
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Exited(_) | ProcessStatus::Failed)
    }
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
}

/// Sender for events tagged with the originating action
pub type EventSender = mpsc::UnboundedSender<(ActionId, ProcessEvent)>;

/// A running instance of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub action: ActionId,
    pub pid: u32,
}

/// A managed child process
///
/// The child itself is owned by a waiter task that reports its exit as
/// soon as the OS does; this struct keeps the bookkeeping and a channel to
/// force-kill it.
pub struct ManagedProcess {
    action: Action,
    status: ProcessStatus,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    event_tx: Option<EventSender>,
}

impl ManagedProcess {
    /// Create a new managed process
    pub fn new(action: Action) -> Self {
        Self {
            action,
            status: ProcessStatus::Pending,
            pid: None,
            kill_tx: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Start the process without waiting for it
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<ProcessHandle, ProcessError> {
        let id = self.action.id().clone();
        if self.status != ProcessStatus::Pending {
            return Err(ProcessError::AlreadyStarted(id));
        }

        log::info!("[{}] Starting: {}", id, self.action.command_line());

        let mut cmd = Command::new(self.action.executable());
        cmd.args(self.action.arguments())
            .envs(self.action.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                return Err(ProcessError::Launch(LaunchFailure {
                    action: id,
                    executable: self.action.executable().to_string(),
                    source: e,
                }));
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;

        if let Some(tx) = &self.event_tx {
            let _ = tx.send((id.clone(), ProcessEvent::Started { pid }));

            if let Some(stdout) = child.stdout.take() {
                forward_lines(id.clone(), stdout, false, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(id.clone(), stderr, true, tx.clone());
            }
        }

        // Exit observation: exactly one Exited event per child
        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill_tx = Some(kill_tx);
        let event_tx = self.event_tx.clone();
        let waiter_id = id.clone();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    log::error!("[{}] Error waiting for process: {}", waiter_id, e);
                    None
                }
            };

            if let Some(tx) = event_tx {
                let _ = tx.send((waiter_id, ProcessEvent::Exited { code }));
            }
        });

        Ok(ProcessHandle { action: id, pid })
    }

    /// Record the exit reported by the waiter task
    pub fn mark_exited(&mut self, code: Option<i32>) {
        self.status = ProcessStatus::Exited(code);
        self.pid = None;
        self.kill_tx = None;
    }

    /// Ask the process to stop (SIGTERM on Unix, kill elsewhere)
    pub fn terminate(&mut self) {
        if !self.status.is_running() {
            return;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::warn!("[{}] Failed to send SIGTERM: {}", self.action.id(), e);
                }
            }
        }

        #[cfg(not(unix))]
        {
            self.kill();
        }
    }

    /// Force-kill the process
    pub fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }
}

fn forward_lines<R>(id: ActionId, stream: R, is_stderr: bool, tx: EventSender)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    // The pipe stays open until EOF; closing it early would SIGPIPE the child
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    let _ = tx.send((id.clone(), ProcessEvent::Output { line, is_stderr }));
                }
                Err(e) => {
                    log::debug!("[{}] Output stream closed: {}", id, e);
                    break;
                }
            }
        }
    });
}

/// An action whose process could not be started by the OS
#[derive(Debug, thiserror::Error)]
#[error("Failed to launch '{action}' ({executable}): {source}")]
pub struct LaunchFailure {
    pub action: ActionId,
    pub executable: String,
    #[source]
    pub source: std::io::Error,
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' was already started")]
    AlreadyStarted(ActionId),

    #[error(transparent)]
    Launch(#[from] LaunchFailure),
}
