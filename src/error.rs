use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Process-related errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to spawn process {0}: {1}")]
    SpawnFailure(String, String),

    #[error("Process {0} exited unexpectedly with code {1}")]
    UnexpectedExit(String, i32),

    #[error("Memory ceiling exceeded for process {0}: {1} bytes (limit: {2} bytes)")]
    MemoryCeilingExceeded(String, u64, u64),

    #[error("Process restart limit exceeded for {0}")]
    RestartLimitExceeded(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    // Watch errors
    #[error("Cannot watch {0}: {1}")]
    WatchFailure(String, String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Duplicate process name: {0}")]
    DuplicateName(String),

    #[error("Invalid memory limit: {0}")]
    InvalidMemoryLimit(String),

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Shutdown timed out, force-killed: {0}")]
    ShutdownTimeout(String),

    #[error("Supervisor is shut down")]
    SupervisorClosed,
}

impl WardenError {
    /// Whether the error is a configuration-time error that must abort startup
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            WardenError::ConfigError(_)
                | WardenError::InvalidConfig(_)
                | WardenError::MissingConfigField(_)
                | WardenError::ConfigValidationError(_)
                | WardenError::DuplicateName(_)
                | WardenError::InvalidMemoryLimit(_)
        )
    }
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
