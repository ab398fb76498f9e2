mod memory;

pub use memory::{parse_memory, MemoryValue};

use crate::error::{Result, WardenError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signals accepted for `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// One process entry as written in an ecosystem file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name (unique identifier)
    #[serde(default)]
    pub name: String,

    /// Script or executable to run
    #[serde(default, alias = "command")]
    pub script: PathBuf,

    /// Command-line arguments, either a list or a whitespace-separated string
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,

    /// Interpreter used to run the script (`"none"` runs the script directly)
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Arguments placed between the interpreter and the script
    #[serde(default, deserialize_with = "deserialize_args")]
    pub interpreter_args: Vec<String>,

    /// Working directory, relative paths resolve against the config file
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Restart the process when its working directory changes
    #[serde(default)]
    pub watch: bool,

    /// File or directory names skipped by the watcher
    #[serde(default)]
    pub ignore_watch: Vec<String>,

    /// Whether to automatically restart on exit
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Delay before an automatic restart (in seconds)
    #[serde(default)]
    pub restart_delay: f64,

    /// Initial delay for exponential back-off (in seconds)
    ///
    /// Each restart within 30 s of the previous one waits 1.5 times longer,
    /// up to 15 s.
    #[serde(default)]
    pub exp_backoff_restart_delay: Option<f64>,

    /// Give up after this many automatic restarts
    #[serde(default)]
    pub max_restarts: Option<u32>,

    /// Exit codes that never trigger an automatic restart
    #[serde(default)]
    pub stop_exit_codes: Vec<i32>,

    /// Restart when resident memory exceeds this amount
    #[serde(default)]
    pub max_memory_restart: Option<MemoryValue>,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before force kill (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

// Default value functions for serde
fn default_autorestart() -> bool {
    true
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_memory_sample_interval() -> u64 {
    5_000
}

fn default_watch_poll_interval() -> u64 {
    500
}

fn default_watch_debounce() -> u64 {
    1_000
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn deserialize_args<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Args {
        List(Vec<String>),
        Line(String),
    }

    Ok(match Args::deserialize(deserializer)? {
        Args::List(list) => list,
        Args::Line(line) => line.split_whitespace().map(str::to_string).collect(),
    })
}

impl ProcessConfig {
    /// Create a configuration with default settings for the given script
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            interpreter: None,
            interpreter_args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            watch: false,
            ignore_watch: Vec::new(),
            autorestart: default_autorestart(),
            restart_delay: 0.0,
            exp_backoff_restart_delay: None,
            max_restarts: None,
            stop_exit_codes: Vec::new(),
            max_memory_restart: None,
            stop_signal: default_stop_signal(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(WardenError::MissingConfigField(format!(
                "script (process '{}')",
                self.name
            )));
        }

        if !self.restart_delay.is_finite() || self.restart_delay < 0.0 {
            return Err(WardenError::ConfigValidationError(format!(
                "restart_delay for '{}' must be a non-negative number of seconds",
                self.name
            )));
        }

        if let Some(initial) = self.exp_backoff_restart_delay {
            if !initial.is_finite() || initial <= 0.0 {
                return Err(WardenError::ConfigValidationError(format!(
                    "exp_backoff_restart_delay for '{}' must be positive",
                    self.name
                )));
            }
        }

        if !VALID_STOP_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(WardenError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        if let Some(ref limit) = self.max_memory_restart {
            limit.to_bytes()?;
        }

        Ok(())
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }

        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Expand `$VAR` and `${VAR}` references from the supervisor's environment
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    // Longest names first so `$HOME_DIR` is not clobbered by `$HOME`
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

fn seconds(name: &str, field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        WardenError::ConfigValidationError(format!(
            "{} for '{}' is out of range: {}",
            field, name, secs
        ))
    })
}

/// Immutable, validated description of one managed process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub name: String,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub watch: bool,
    pub ignore_watch: Vec<String>,
    pub autorestart: bool,
    pub restart_delay: Duration,
    pub exp_backoff_restart_delay: Option<Duration>,
    pub max_restarts: Option<u32>,
    pub stop_exit_codes: Vec<i32>,
    pub memory_ceiling: Option<u64>,
    pub stop_signal: String,
    pub stop_timeout: Duration,
}

impl ProcessSpec {
    /// Validate a raw configuration entry and resolve it against `base_dir`
    pub fn from_config(config: ProcessConfig, base_dir: &Path) -> Result<Self> {
        config.validate()?;

        let cwd = match config.cwd {
            Some(cwd) if cwd.is_absolute() => cwd,
            Some(cwd) => base_dir.join(cwd),
            None => base_dir.to_path_buf(),
        };

        let memory_ceiling = config
            .max_memory_restart
            .as_ref()
            .map(MemoryValue::to_bytes)
            .transpose()?;

        let restart_delay = seconds(&config.name, "restart_delay", config.restart_delay)?;
        let exp_backoff_restart_delay = config
            .exp_backoff_restart_delay
            .map(|secs| seconds(&config.name, "exp_backoff_restart_delay", secs))
            .transpose()?;

        let interpreter = config
            .interpreter
            .filter(|i| !i.trim().is_empty() && i.as_str() != "none");

        Ok(Self {
            name: config.name,
            script: config.script,
            args: config.args,
            interpreter,
            interpreter_args: config.interpreter_args,
            cwd,
            env: config.env,
            watch: config.watch,
            ignore_watch: config.ignore_watch,
            autorestart: config.autorestart,
            restart_delay,
            exp_backoff_restart_delay,
            max_restarts: config.max_restarts,
            stop_exit_codes: config.stop_exit_codes,
            memory_ceiling,
            stop_signal: config.stop_signal,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        })
    }

    /// Program and argument list used to launch the process
    pub fn command_line(&self) -> (PathBuf, Vec<String>) {
        match self.interpreter {
            Some(ref interpreter) => {
                let mut args = self.interpreter_args.clone();
                args.push(self.script.to_string_lossy().into_owned());
                args.extend(self.args.iter().cloned());
                (PathBuf::from(interpreter), args)
            }
            None => {
                // Relative paths with a directory part resolve against cwd,
                // bare names are left for PATH lookup
                let program = if self.script.is_relative() && self.script.components().count() > 1
                {
                    self.cwd.join(&self.script)
                } else {
                    self.script.clone()
                };
                (program, self.args.clone())
            }
        }
    }
}

/// Settings for the supervisor itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// How often memory usage is sampled (in milliseconds)
    #[serde(default = "default_memory_sample_interval")]
    pub memory_sample_interval_ms: u64,

    /// How often watched directories are scanned (in milliseconds)
    #[serde(default = "default_watch_poll_interval")]
    pub watch_poll_interval_ms: u64,

    /// Quiet period used to coalesce bursts of changes (in milliseconds)
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce_ms: u64,

    /// Upper bound on waiting for processes during shutdown (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            memory_sample_interval_ms: default_memory_sample_interval(),
            watch_poll_interval_ms: default_watch_poll_interval(),
            watch_debounce_ms: default_watch_debounce(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SupervisorSettings {
    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms.max(1))
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_interval_ms.max(1))
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// A fully loaded configuration: supervisor settings plus process specs
#[derive(Debug, Clone)]
pub struct Ecosystem {
    pub settings: SupervisorSettings,
    pub specs: Vec<ProcessSpec>,
}

#[derive(Deserialize)]
struct EcosystemFile {
    #[serde(default, alias = "processes")]
    apps: Vec<ProcessConfig>,
    #[serde(default)]
    supervisor: SupervisorSettings,
}

impl Ecosystem {
    /// Load an ecosystem from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base_dir = std::fs::canonicalize(&base_dir).unwrap_or(base_dir);

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Self::from_toml_str(&contents, &base_dir),
            "json" => Self::from_json_str(&contents, &base_dir),
            _ => Err(WardenError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    /// Parse a TOML ecosystem
    pub fn from_toml_str(contents: &str, base_dir: &Path) -> Result<Self> {
        let value: serde_json::Value = toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;
        Self::from_value(value, base_dir)
    }

    /// Parse a JSON ecosystem
    pub fn from_json_str(contents: &str, base_dir: &Path) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;
        Self::from_value(value, base_dir)
    }

    fn from_value(mut value: serde_json::Value, base_dir: &Path) -> Result<Self> {
        let object = value.as_object_mut().ok_or_else(|| {
            WardenError::InvalidConfig("Configuration root must be a table".to_string())
        })?;

        // A top-level single process is wrapped into a one-entry app list
        let is_list = object.contains_key("apps") || object.contains_key("processes");
        let is_single = ["name", "script", "command"]
            .iter()
            .any(|key| object.contains_key(*key));
        if !is_list && is_single {
            let supervisor = object.remove("supervisor");
            let single = std::mem::take(object);
            object.insert("apps".to_string(), serde_json::Value::Array(vec![single.into()]));
            if let Some(supervisor) = supervisor {
                object.insert("supervisor".to_string(), supervisor);
            }
        }

        let file: EcosystemFile = serde_json::from_value(value)
            .map_err(|e| WardenError::InvalidConfig(format!("Invalid configuration: {}", e)))?;

        Self::from_configs(file.apps, file.supervisor, base_dir)
    }

    /// Validate raw entries into specs; any error rejects the whole set
    pub fn from_configs(
        configs: Vec<ProcessConfig>,
        settings: SupervisorSettings,
        base_dir: &Path,
    ) -> Result<Self> {
        if configs.is_empty() {
            return Err(WardenError::InvalidConfig(
                "No process configuration found in file".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(configs.len());

        for mut config in configs {
            config.expand_env_vars();
            let spec = ProcessSpec::from_config(config, base_dir)?;
            if !seen.insert(spec.name.clone()) {
                return Err(WardenError::DuplicateName(spec.name));
            }
            specs.push(spec);
        }

        Ok(Self { settings, specs })
    }
}
