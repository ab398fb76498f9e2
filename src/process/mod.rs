// Process module - supervision of child processes

pub mod events;
pub mod instance;
pub mod monitor;
pub mod output;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;
pub mod watcher;

pub use events::{ChangeEvent, MemoryAlert, SupervisorEvent};
pub use monitor::{MemoryMonitor, MemorySampler, SysinfoSampler};
pub use restart::{BackoffStrategy, RestartDecision, RestartPolicy, RestartTracker, StopReason};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{ShutdownReport, Supervisor};
pub use types::{PendingAction, ProcessHandle, ProcessState, SPAWN_FAILURE_EXIT_CODE};
pub use watcher::Watcher;
