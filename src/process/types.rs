use crate::config::ProcessSpec;
use crate::process::restart::RestartTracker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Exit code recorded when the child could not be spawned at all
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Exited,
    Crashed,
    RestartPending,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Exited => write!(f, "exited"),
            ProcessState::Crashed => write!(f, "crashed"),
            ProcessState::RestartPending => write!(f, "restart-pending"),
        }
    }
}

/// Why a controlled termination was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Watched files changed, start again immediately
    Reload,
    /// Memory ceiling exceeded, treat the exit as a crash
    MemoryRestart,
    /// Supervisor is shutting down
    Shutdown,
}

/// Runtime view of one managed process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub spec: Arc<ProcessSpec>,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub exit_code: Option<i32>,
    /// Restarts triggered by watched file changes
    pub reload_count: u32,
    pub memory_usage: Option<u64>,
    pub memory_violations: u32,
    /// Incremented every time a new instance is launched
    pub generation: u64,
    pub restart_tracker: RestartTracker,
    pub(crate) pending: Option<PendingAction>,
}

impl ProcessHandle {
    pub fn new(spec: Arc<ProcessSpec>) -> Self {
        Self {
            spec,
            state: ProcessState::Stopped,
            pid: None,
            started_at: None,
            exit_code: None,
            reload_count: 0,
            memory_usage: None,
            memory_violations: 0,
            generation: 0,
            restart_tracker: RestartTracker::new(),
            pending: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Automatic restarts performed so far
    pub fn restart_count(&self) -> u32 {
        self.restart_tracker.restart_count()
    }

    pub fn last_restart_at(&self) -> Option<SystemTime> {
        self.restart_tracker.last_restart_time()
    }

    /// Whether a live child may exist for this handle
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    pub(crate) fn mark_starting(&mut self) -> u64 {
        self.generation += 1;
        self.state = ProcessState::Starting;
        self.pid = None;
        self.started_at = None;
        self.memory_usage = None;
        self.pending = None;
        self.generation
    }

    pub(crate) fn mark_running(&mut self, pid: u32) {
        self.state = ProcessState::Running;
        self.pid = Some(pid);
        self.started_at = Some(SystemTime::now());
    }

    pub(crate) fn mark_stopping(&mut self, action: PendingAction) {
        self.state = ProcessState::Stopping;
        self.pending = Some(action);
    }

    /// Record an exit: a zero code is a clean exit, anything else a crash
    pub(crate) fn record_exit(&mut self, exit_code: Option<i32>) {
        self.exit_code = exit_code;
        self.pid = None;
        self.state = if exit_code == Some(0) {
            ProcessState::Exited
        } else {
            ProcessState::Crashed
        };
    }

    pub(crate) fn mark_crashed(&mut self) {
        self.state = ProcessState::Crashed;
    }

    pub(crate) fn mark_restart_pending(&mut self) {
        self.state = ProcessState::RestartPending;
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.state = ProcessState::Stopped;
        self.pid = None;
        self.pending = None;
    }

    pub(crate) fn record_memory_violation(&mut self, observed_bytes: u64) {
        self.memory_usage = Some(observed_bytes);
        self.memory_violations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessConfig;
    use std::path::Path;

    fn handle() -> ProcessHandle {
        let spec = ProcessSpec::from_config(ProcessConfig::new("api", "/bin/true"), Path::new("/"))
            .unwrap();
        ProcessHandle::new(Arc::new(spec))
    }

    #[test]
    fn test_new_handle_is_stopped() {
        let handle = handle();
        assert_eq!(handle.state, ProcessState::Stopped);
        assert_eq!(handle.restart_count(), 0);
        assert_eq!(handle.generation, 0);
        assert!(!handle.is_active());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut handle = handle();

        assert_eq!(handle.mark_starting(), 1);
        assert_eq!(handle.state, ProcessState::Starting);

        handle.mark_running(4242);
        assert_eq!(handle.state, ProcessState::Running);
        assert_eq!(handle.pid, Some(4242));
        assert!(handle.started_at.is_some());

        handle.record_exit(Some(1));
        assert_eq!(handle.state, ProcessState::Crashed);
        assert_eq!(handle.exit_code, Some(1));
        assert_eq!(handle.pid, None);

        handle.mark_restart_pending();
        assert_eq!(handle.mark_starting(), 2);
    }

    #[test]
    fn test_clean_and_signal_exits() {
        let mut handle = handle();
        handle.mark_starting();
        handle.record_exit(Some(0));
        assert_eq!(handle.state, ProcessState::Exited);

        handle.mark_starting();
        handle.record_exit(None);
        assert_eq!(handle.state, ProcessState::Crashed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ProcessState::RestartPending.to_string(), "restart-pending");
        assert_eq!(ProcessState::Crashed.to_string(), "crashed");
    }
}
