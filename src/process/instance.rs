use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::process::events::SupervisorEvent;
use crate::process::output::forward_output;
use crate::process::spawner::spawn_process;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Debug)]
enum InstanceCommand {
    Terminate,
}

/// Control side of one running instance
///
/// The instance task owns the child: it spawns it, reports `Started` (or
/// `SpawnFailed`), waits for it, and reports `Exited`. Termination requests
/// are carried out inside the task so the supervisor loop never blocks on a
/// child.
#[derive(Debug)]
pub struct InstanceControl {
    commands: mpsc::UnboundedSender<InstanceCommand>,
    task: JoinHandle<()>,
    terminate_sent: bool,
}

impl InstanceControl {
    /// Ask the instance to stop: stop signal, grace period, then SIGKILL
    ///
    /// Repeated calls send nothing further.
    pub fn terminate(&mut self) {
        if self.terminate_sent {
            return;
        }
        self.terminate_sent = true;
        let _ = self.commands.send(InstanceCommand::Terminate);
    }

    #[cfg(test)]
    fn terminate_requested(&self) -> bool {
        self.terminate_sent
    }

    /// Kill without waiting: SIGKILL the PID and drop the task (and its child)
    pub fn force_kill(self, pid: Option<u32>) {
        if let Some(pid) = pid {
            kill_pid(pid);
        }
        self.task.abort();
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("SIGKILL to {} failed: {}", pid, e);
    }
}

// Dropping the aborted task kills the child on other platforms
#[cfg(not(unix))]
fn kill_pid(_pid: u32) {}

/// Launch a new instance of `spec` in the background
pub fn launch(
    spec: Arc<ProcessSpec>,
    generation: u64,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> InstanceControl {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_instance(spec, generation, events, command_rx));

    InstanceControl {
        commands,
        task,
        terminate_sent: false,
    }
}

async fn run_instance(
    spec: Arc<ProcessSpec>,
    generation: u64,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    mut commands: mpsc::UnboundedReceiver<InstanceCommand>,
) {
    let name = spec.name.clone();

    let spawned = match spawn_process(&spec).await {
        Ok(spawned) => spawned,
        Err(e) => {
            let _ = events.send(SupervisorEvent::SpawnFailed {
                name,
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    let pid = spawned.pid;
    let mut child = spawned.child;
    forward_output(&name, &mut child);

    info!("Process {} started (PID: {})", name, pid);
    let _ = events.send(SupervisorEvent::Started {
        name: name.clone(),
        generation,
        pid,
    });

    let status = tokio::select! {
        status = child.wait() => status,
        Some(InstanceCommand::Terminate) = commands.recv() => {
            terminate(&spec, &mut child, pid).await
        }
    };

    let exit_code = match status {
        Ok(status) => exit_code_of(&name, status),
        Err(e) => {
            warn!("Failed to wait for process {}: {}", name, e);
            None
        }
    };

    let _ = events.send(SupervisorEvent::Exited {
        name,
        generation,
        exit_code,
    });
}

/// Stop signal, bounded wait, then SIGKILL
async fn terminate(spec: &ProcessSpec, child: &mut Child, pid: u32) -> std::io::Result<ExitStatus> {
    match send_stop_signal(spec, pid) {
        Ok(()) => info!(
            "Gracefully stopping process {} (PID: {}) with {}",
            spec.name, pid, spec.stop_signal
        ),
        // The child may already be gone; the wait below settles it
        Err(e) => debug!("{}", e),
    }

    match tokio::time::timeout(spec.stop_timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Process {} did not exit within {:?}, sending SIGKILL",
                spec.name, spec.stop_timeout
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_stop_signal(spec: &ProcessSpec, pid: u32) -> Result<()> {
    let stop_signal = parse_signal(&spec.stop_signal)?;
    signal::kill(Pid::from_raw(pid as i32), stop_signal).map_err(|e| {
        WardenError::StopError(
            spec.name.clone(),
            format!("Failed to send {}: {}", spec.stop_signal, e),
        )
    })
}

#[cfg(not(unix))]
fn send_stop_signal(spec: &ProcessSpec, _pid: u32) -> Result<()> {
    Err(WardenError::SignalError(format!(
        "{} is not supported on this platform",
        spec.stop_signal
    )))
}

#[cfg(unix)]
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(WardenError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

fn exit_code_of(name: &str, status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            debug!("Process {} was terminated by signal {}", name, signal);
        }
    }
    #[cfg(not(unix))]
    let _ = name;

    None
}
