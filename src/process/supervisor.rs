use crate::config::{Ecosystem, ProcessSpec, SupervisorSettings};
use crate::error::{Result, WardenError};
use crate::process::events::{ChangeEvent, MemoryAlert, SupervisorEvent};
use crate::process::instance::{self, InstanceControl};
use crate::process::monitor::{MemoryMonitor, MemorySampler, SysinfoSampler};
use crate::process::restart::{RestartDecision, RestartPolicy, StopReason};
use crate::process::types::{PendingAction, ProcessHandle, ProcessState, SPAWN_FAILURE_EXIT_CODE};
use crate::process::watcher::Watcher;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};


/// Outcome of a shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Processes that exited on their own after the stop signal
    pub stopped: Vec<String>,
    /// Processes that had to be force-killed after the shutdown timeout
    pub stragglers: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.stragglers.is_empty()
    }

    /// `ShutdownTimeout` naming the stragglers, if there were any
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(WardenError::ShutdownTimeout(self.stragglers.join(", ")))
        }
    }
}

/// Everything the supervisor keeps for one process
struct Slot {
    handle: ProcessHandle,
    policy: RestartPolicy,
    instance: Option<InstanceControl>,
    monitor: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    restart_timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn new(spec: ProcessSpec) -> Self {
        let policy = RestartPolicy::from_spec(&spec);
        Self {
            handle: ProcessHandle::new(Arc::new(spec)),
            policy,
            instance: None,
            monitor: None,
            watcher: None,
            restart_timer: None,
        }
    }

    /// Launch a new instance; the spawn itself happens in the instance task
    fn launch(&mut self, settings: &SupervisorSettings, events: &mpsc::UnboundedSender<SupervisorEvent>) {
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }

        let generation = self.handle.mark_starting();
        debug!("Starting process {} (generation {})", self.handle.name(), generation);
        self.instance = Some(instance::launch(
            Arc::clone(&self.handle.spec),
            generation,
            events.clone(),
        ));

        if self.handle.spec.watch && self.watcher.is_none() {
            self.watcher = Some(spawn_watcher(
                Arc::clone(&self.handle.spec),
                settings,
                events.clone(),
            ));
        }
    }

    fn cancel_tasks(&mut self) {
        for task in [
            self.monitor.take(),
            self.watcher.take(),
            self.restart_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

fn spawn_watcher(
    spec: Arc<ProcessSpec>,
    settings: &SupervisorSettings,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> JoinHandle<()> {
    let poll_interval = settings.watch_poll_interval();
    let debounce = settings.watch_debounce();

    tokio::spawn(async move {
        match Watcher::new(
            spec.name.clone(),
            spec.cwd.clone(),
            &spec.ignore_watch,
            poll_interval,
            debounce,
        )
        .await
        {
            Ok(watcher) => watcher.run(events).await,
            Err(e) => warn!("{}; watching disabled for {}", e, spec.name),
        }
    })
}

fn schedule_restart(
    name: String,
    generation: u64,
    delay: Duration,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(SupervisorEvent::RestartDue { name, generation });
    })
}

/// Single-host process supervisor
///
/// The supervisor exclusively owns every `ProcessHandle`. Instance tasks,
/// memory monitors, watchers and restart timers only send events into one
/// queue, and all state transitions happen while that queue is drained by
/// `handle_event`.
pub struct Supervisor {
    settings: SupervisorSettings,
    /// Process names in configuration order
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events_rx: mpsc::UnboundedReceiver<SupervisorEvent>,
    sampler: Arc<dyn MemorySampler>,
    shutting_down: bool,
    shutdown_report: Option<ShutdownReport>,
    fatal: Vec<String>,
}

impl Supervisor {
    /// Create a supervisor for `specs`; nothing is started yet
    pub fn new(specs: Vec<ProcessSpec>, settings: SupervisorSettings) -> Result<Self> {
        let mut order = Vec::with_capacity(specs.len());
        let mut slots = HashMap::with_capacity(specs.len());

        for spec in specs {
            let name = spec.name.clone();
            if slots.contains_key(&name) {
                return Err(WardenError::DuplicateName(name));
            }
            order.push(name.clone());
            slots.insert(name, Slot::new(spec));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            settings,
            order,
            slots,
            events_tx,
            events_rx,
            sampler: Arc::new(SysinfoSampler::new()),
            shutting_down: false,
            shutdown_report: None,
            fatal: Vec::new(),
        })
    }

    pub fn from_ecosystem(ecosystem: Ecosystem) -> Result<Self> {
        Self::new(ecosystem.specs, ecosystem.settings)
    }

    /// Replace the memory sampler used by memory monitors
    pub fn with_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Sender for injecting events into the supervisor queue
    pub fn events(&self) -> mpsc::UnboundedSender<SupervisorEvent> {
        self.events_tx.clone()
    }

    pub fn handle(&self, name: &str) -> Option<&ProcessHandle> {
        self.slots.get(name).map(|slot| &slot.handle)
    }

    /// All handles in configuration order
    pub fn handles(&self) -> Vec<&ProcessHandle> {
        self.order
            .iter()
            .filter_map(|name| self.handle(name))
            .collect()
    }

    /// Processes that were given up on after reaching their restart limit
    pub fn fatal_failures(&self) -> &[String] {
        &self.fatal
    }

    pub fn start_all(&mut self) -> Result<()> {
        for name in self.order.clone() {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Start a stopped process; a process that is already active is left alone
    pub fn start(&mut self, name: &str) -> Result<()> {
        if self.shutting_down {
            return Err(WardenError::SupervisorClosed);
        }

        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| WardenError::ProcessNotFound(name.to_string()))?;

        if slot.handle.is_active() {
            debug!("Process {} is already {}", name, slot.handle.state);
            return Ok(());
        }

        info!("Starting process {}", name);
        slot.launch(&self.settings, &self.events_tx);
        Ok(())
    }

    /// Wait for the next event and apply it
    ///
    /// Returns `false` once the supervisor has shut down.
    pub async fn process_next(&mut self) -> bool {
        if self.shutdown_report.is_some() {
            return false;
        }

        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Start everything and supervise until `shutdown_signal` resolves or
    /// nothing is left to supervise, then shut down
    pub async fn run<F>(&mut self, shutdown_signal: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        self.start_all()?;
        info!("Supervising {} process(es)", self.order.len());

        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }

            if self.is_idle() {
                info!("All processes stopped, nothing left to supervise");
                break;
            }
        }

        self.shutdown().await
    }

    /// No process is active or pending a restart
    fn is_idle(&self) -> bool {
        self.slots
            .values()
            .all(|slot| slot.handle.state == ProcessState::Stopped)
    }

    /// Apply one event to the process it belongs to
    pub fn handle_event(&mut self, event: SupervisorEvent) {
        trace!("Event for {}: {:?}", event.process_name(), event);

        match event {
            SupervisorEvent::Started {
                name,
                generation,
                pid,
            } => self.on_started(&name, generation, pid),
            SupervisorEvent::SpawnFailed {
                name,
                generation,
                error,
            } => self.on_spawn_failed(&name, generation, &error),
            SupervisorEvent::Exited {
                name,
                generation,
                exit_code,
            } => self.on_exit(&name, generation, exit_code),
            SupervisorEvent::RestartDue { name, generation } => {
                self.on_restart_due(&name, generation)
            }
            SupervisorEvent::Change(change) => self.on_change_event(change),
            SupervisorEvent::Memory(alert) => self.on_memory_alert(alert),
        }
    }

    fn on_started(&mut self, name: &str, generation: u64, pid: u32) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if slot.handle.generation != generation {
            debug!("Ignoring stale start of {} (generation {})", name, generation);
            return;
        }

        match slot.handle.state {
            ProcessState::Starting => {
                slot.handle.mark_running(pid);

                if let Some(ceiling) = slot.handle.spec.memory_ceiling {
                    let monitor = MemoryMonitor::new(
                        name.to_string(),
                        pid,
                        ceiling,
                        self.settings.memory_sample_interval(),
                        Arc::clone(&self.sampler),
                    );
                    slot.monitor = Some(tokio::spawn(monitor.run(self.events_tx.clone())));
                }
            }
            // Termination was requested before the child came up
            ProcessState::Stopping => slot.handle.pid = Some(pid),
            state => debug!("Ignoring start of {} in state {}", name, state),
        }
    }

    fn on_spawn_failed(&mut self, name: &str, generation: u64, error: &str) {
        warn!("{}", error);
        self.on_exit(name, generation, Some(SPAWN_FAILURE_EXIT_CODE));
    }

    fn on_exit(&mut self, name: &str, generation: u64, exit_code: Option<i32>) {
        let shutting_down = self.shutting_down;
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if slot.handle.generation != generation {
            debug!("Ignoring stale exit of {} (generation {})", name, generation);
            return;
        }

        slot.instance = None;
        if let Some(monitor) = slot.monitor.take() {
            monitor.abort();
        }

        let pending = slot.handle.pending.take();
        slot.handle.record_exit(exit_code);

        let policy_code = match pending {
            Some(PendingAction::Shutdown) => {
                info!("Process {} stopped", name);
                slot.handle.mark_stopped();
                return;
            }
            _ if shutting_down => {
                slot.handle.mark_stopped();
                return;
            }
            Some(PendingAction::Reload) => {
                slot.handle.reload_count += 1;
                info!("Reloading process {}", name);
                slot.launch(&self.settings, &self.events_tx);
                return;
            }
            Some(PendingAction::MemoryRestart) => {
                slot.handle.mark_crashed();
                None
            }
            None => {
                match exit_code {
                    Some(0) => info!("Process {} exited cleanly", name),
                    Some(code) => warn!("{}", WardenError::UnexpectedExit(name.to_string(), code)),
                    None => warn!("Process {} was killed by a signal", name),
                }
                exit_code
            }
        };

        match slot.policy.decide(&slot.handle.restart_tracker, policy_code) {
            RestartDecision::Restart { delay } => {
                info!("Restarting process {} in {:?}", name, delay);
                slot.handle.mark_restart_pending();
                slot.restart_timer = Some(schedule_restart(
                    name.to_string(),
                    generation,
                    delay,
                    self.events_tx.clone(),
                ));
            }
            RestartDecision::Stop(reason) => {
                slot.handle.mark_stopped();
                if let Some(watcher) = slot.watcher.take() {
                    watcher.abort();
                }

                if let StopReason::RestartLimitExceeded { .. } = reason {
                    error!(
                        "{} ({}), giving up",
                        WardenError::RestartLimitExceeded(name.to_string()),
                        reason
                    );
                    self.fatal.push(name.to_string());
                } else {
                    info!("Process {} will not be restarted: {}", name, reason);
                }
            }
        }
    }

    fn on_restart_due(&mut self, name: &str, generation: u64) {
        if self.shutting_down {
            return;
        }
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if slot.handle.state != ProcessState::RestartPending || slot.handle.generation != generation {
            debug!("Ignoring stale restart of {}", name);
            return;
        }

        slot.restart_timer = None;
        slot.handle.restart_tracker.record_restart();
        info!(
            "Restarting process {} (restart #{})",
            name,
            slot.handle.restart_count()
        );
        slot.launch(&self.settings, &self.events_tx);
    }

    fn on_change_event(&mut self, change: ChangeEvent) {
        if self.shutting_down {
            return;
        }
        let name = change.spec_name.as_str();
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };

        match slot.handle.state {
            ProcessState::Running => {
                info!(
                    "Restarting process {} after change to {}",
                    name,
                    change.changed_path.display()
                );
                slot.handle.mark_stopping(PendingAction::Reload);
                if let Some(instance) = slot.instance.as_mut() {
                    instance.terminate();
                }
            }
            state => debug!("Ignoring change for {} in state {}", name, state),
        }
    }

    fn on_memory_alert(&mut self, alert: MemoryAlert) {
        if self.shutting_down {
            return;
        }
        let name = alert.spec_name.as_str();
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if slot.handle.state != ProcessState::Running || slot.handle.pid != Some(alert.pid) {
            debug!("Ignoring memory alert for {} (PID: {})", name, alert.pid);
            return;
        }

        let ceiling = match slot.handle.spec.memory_ceiling {
            Some(ceiling) if alert.observed_bytes > ceiling => ceiling,
            _ => return,
        };

        slot.handle.record_memory_violation(alert.observed_bytes);
        warn!(
            "{}, restarting",
            WardenError::MemoryCeilingExceeded(name.to_string(), alert.observed_bytes, ceiling)
        );
        slot.handle.mark_stopping(PendingAction::MemoryRestart);
        if let Some(instance) = slot.instance.as_mut() {
            instance.terminate();
        }
    }

    /// Stop every process and stop accepting events
    ///
    /// Monitoring tasks and pending restarts are cancelled, every live process
    /// gets its stop signal, and exits are awaited up to the shutdown timeout.
    /// Whatever is still running then is force-killed and listed in the
    /// report. Calling this again returns the first report.
    pub async fn shutdown(&mut self) -> Result<ShutdownReport> {
        if let Some(report) = &self.shutdown_report {
            return Ok(report.clone());
        }
        self.shutting_down = true;
        info!("Shutting down supervisor");

        let mut terminating = Vec::new();
        for name in &self.order {
            let Some(slot) = self.slots.get_mut(name) else {
                continue;
            };
            slot.cancel_tasks();

            match slot.instance.as_mut() {
                Some(instance) => {
                    slot.handle.mark_stopping(PendingAction::Shutdown);
                    instance.terminate();
                    terminating.push(name.clone());
                }
                None => slot.handle.mark_stopped(),
            }
        }

        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout();
        while self.slots.values().any(|slot| slot.instance.is_some()) {
            match tokio::time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) | Err(_) => break,
            }
        }

        let mut stragglers = Vec::new();
        for name in &self.order {
            let Some(slot) = self.slots.get_mut(name) else {
                continue;
            };
            if let Some(instance) = slot.instance.take() {
                warn!(
                    "Process {} did not stop within {:?}, killing it",
                    name,
                    self.settings.shutdown_timeout()
                );
                instance.force_kill(slot.handle.pid);
                slot.handle.mark_stopped();
                stragglers.push(name.clone());
            }
        }
        self.events_rx.close();

        let report = ShutdownReport {
            stopped: terminating
                .into_iter()
                .filter(|name| !stragglers.contains(name))
                .collect(),
            stragglers,
        };
        info!(
            "Supervisor shut down ({} stopped, {} killed)",
            report.stopped.len(),
            report.stragglers.len()
        );

        self.shutdown_report = Some(report.clone());
        Ok(report)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel_tasks();
            if let Some(instance) = slot.instance.take() {
                instance.force_kill(slot.handle.pid);
            }
        }
    }
}
