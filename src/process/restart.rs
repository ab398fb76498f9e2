use crate::config::ProcessSpec;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Restarts older than this no longer count towards exponential back-off
pub const BACKOFF_RESET_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound for exponential back-off delays
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(15);

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Give up once this many restarts have been performed
    pub max_restarts: Option<u32>,
    /// Delay before a restart
    pub delay: Duration,
    /// Backoff strategy to use
    pub backoff_strategy: BackoffStrategy,
    /// Exit codes that never trigger a restart
    pub stop_exit_codes: Vec<i32>,
}

/// Outcome of a restart decision
#[derive(Debug, Clone, PartialEq)]
pub enum RestartDecision {
    Restart { delay: Duration },
    Stop(StopReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    AutorestartDisabled,
    StopExitCode(i32),
    RestartLimitExceeded { max_restarts: u32 },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::AutorestartDisabled => write!(f, "autorestart disabled"),
            StopReason::StopExitCode(code) => write!(f, "exit code {} is a stop code", code),
            StopReason::RestartLimitExceeded { max_restarts } => {
                write!(f, "restart limit of {} reached", max_restarts)
            }
        }
    }
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_restarts: None,
            delay: Duration::from_secs(0),
            backoff_strategy: BackoffStrategy::Fixed,
            stop_exit_codes: Vec::new(),
        }
    }

    /// Create a restart policy from a process spec
    pub fn from_spec(spec: &ProcessSpec) -> Self {
        let backoff_strategy = match spec.exp_backoff_restart_delay {
            Some(initial) => BackoffStrategy::Exponential {
                initial,
                max_delay: MAX_BACKOFF_DELAY,
            },
            None => BackoffStrategy::Fixed,
        };

        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            delay: spec.restart_delay,
            backoff_strategy,
            stop_exit_codes: spec.stop_exit_codes.clone(),
        }
    }

    /// Decide what to do after an exit
    ///
    /// `exit_code` is `None` for exits that count as crashes regardless of
    /// code (death by signal, memory kills).
    pub fn decide(&self, tracker: &RestartTracker, exit_code: Option<i32>) -> RestartDecision {
        self.decide_at(tracker, exit_code, SystemTime::now())
    }

    pub fn decide_at(
        &self,
        tracker: &RestartTracker,
        exit_code: Option<i32>,
        now: SystemTime,
    ) -> RestartDecision {
        if !self.enabled {
            return RestartDecision::Stop(StopReason::AutorestartDisabled);
        }

        if let Some(code) = exit_code {
            if self.stop_exit_codes.contains(&code) {
                return RestartDecision::Stop(StopReason::StopExitCode(code));
            }
        }

        if !self.should_restart(tracker) {
            return RestartDecision::Stop(StopReason::RestartLimitExceeded {
                max_restarts: self.max_restarts.unwrap_or(0),
            });
        }

        RestartDecision::Restart {
            delay: self.calculate_delay(tracker, now),
        }
    }

    /// Check if restart should be attempted based on restart history
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        if !self.enabled {
            return false;
        }

        match self.max_restarts {
            Some(max) => tracker.restart_count() < max,
            None => true,
        }
    }

    /// Calculate the delay before the next restart attempt
    pub fn calculate_delay(&self, tracker: &RestartTracker, now: SystemTime) -> Duration {
        match self.backoff_strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential { .. } => {
                let recent = tracker.count_restarts_since(now, BACKOFF_RESET_WINDOW);
                self.backoff_strategy.calculate_delay(self.delay, recent)
            }
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// The configured delay between every restart
    Fixed,
    /// `initial * 1.5^n` where n counts recent restarts, capped at `max_delay`
    Exponential { initial: Duration, max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given number of recent restarts
    pub fn calculate_delay(&self, fixed_delay: Duration, recent_restarts: usize) -> Duration {
        match self {
            BackoffStrategy::Fixed => fixed_delay,
            BackoffStrategy::Exponential { initial, max_delay } => {
                let mut delay = *initial;
                for _ in 0..recent_restarts {
                    if delay >= *max_delay {
                        break;
                    }
                    delay = delay.saturating_mul(3) / 2;
                }
                delay.min(*max_delay)
            }
        }
    }
}

/// Tracks restart history for a process
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    restarts: u32,
    /// Timestamps of restarts still inside the back-off window
    restart_times: VecDeque<SystemTime>,
}

impl RestartTracker {
    /// Create a new restart tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart attempt
    pub fn record_restart(&mut self) {
        self.record_restart_at(SystemTime::now());
    }

    pub fn record_restart_at(&mut self, at: SystemTime) {
        self.restarts += 1;
        self.restart_times.push_back(at);
        self.prune_before(at, BACKOFF_RESET_WINDOW);
    }

    /// Get the total number of restarts
    pub fn restart_count(&self) -> u32 {
        self.restarts
    }

    /// Get the time of the last restart, if any
    pub fn last_restart_time(&self) -> Option<SystemTime> {
        self.restart_times.back().copied()
    }

    /// Count restarts that happened within `window` before `now`
    pub fn count_restarts_since(&self, now: SystemTime, window: Duration) -> usize {
        self.restart_times
            .iter()
            .filter(|&&time| {
                now.duration_since(time)
                    .map(|d| d < window)
                    .unwrap_or(true)
            })
            .count()
    }

    fn prune_before(&mut self, now: SystemTime, window: Duration) {
        // Keep the newest entry so the last restart time stays available
        while self.restart_times.len() > 1 {
            let expired = self
                .restart_times
                .front()
                .and_then(|&time| now.duration_since(time).ok())
                .map(|age| age >= window)
                .unwrap_or(false);
            if !expired {
                break;
            }
            self.restart_times.pop_front();
        }
    }
}
