use std::path::PathBuf;
use std::time::SystemTime;

/// A debounced change inside a watched working directory
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub spec_name: String,
    pub changed_path: PathBuf,
    pub timestamp: SystemTime,
}

/// A memory sample above the configured ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryAlert {
    pub spec_name: String,
    /// PID the sample was taken from
    pub pid: u32,
    pub observed_bytes: u64,
    pub timestamp: SystemTime,
}

/// Everything the supervisor loop reacts to
///
/// Instance events carry the generation of the instance that produced them so
/// the loop can drop anything left over from a previous instance.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Started {
        name: String,
        generation: u64,
        pid: u32,
    },
    SpawnFailed {
        name: String,
        generation: u64,
        error: String,
    },
    Exited {
        name: String,
        generation: u64,
        /// `None` when the process was terminated by a signal
        exit_code: Option<i32>,
    },
    RestartDue {
        name: String,
        generation: u64,
    },
    Change(ChangeEvent),
    Memory(MemoryAlert),
}

impl SupervisorEvent {
    /// Name of the process the event belongs to
    pub fn process_name(&self) -> &str {
        match self {
            SupervisorEvent::Started { name, .. }
            | SupervisorEvent::SpawnFailed { name, .. }
            | SupervisorEvent::Exited { name, .. }
            | SupervisorEvent::RestartDue { name, .. } => name,
            SupervisorEvent::Change(event) => &event.spec_name,
            SupervisorEvent::Memory(alert) => &alert.spec_name,
        }
    }
}
