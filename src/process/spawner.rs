use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Spawn a process based on the provided spec
///
/// The command is the interpreter (if any) followed by the script and its
/// arguments. The child runs in the configured working directory with its
/// environment applied, stdout and stderr piped for forwarding, and is killed
/// if its handle is dropped.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(WardenError::SpawnFailure)` - Command not found, permission denied,
///   missing working directory
pub async fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    let (program, args) = spec.command_line();

    // A script path (not a bare name looked up in PATH) must exist
    if spec.interpreter.is_none() && program.components().count() > 1 && !program.exists() {
        return Err(WardenError::SpawnFailure(
            spec.name.clone(),
            format!("Script does not exist: {}", program.display()),
        ));
    }

    let mut command = Command::new(&program);
    command
        .args(&args)
        .current_dir(&spec.cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        WardenError::SpawnFailure(
            spec.name.clone(),
            format!("{} ({})", e, program.display()),
        )
    })?;

    let pid = child.id().ok_or_else(|| {
        WardenError::SpawnFailure(spec.name.clone(), "Failed to get PID".to_string())
    })?;

    Ok(SpawnedProcess { child, pid })
}
