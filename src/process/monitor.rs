use crate::process::events::{MemoryAlert, SupervisorEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Source of resident memory readings
pub trait MemorySampler: Send + Sync {
    /// Resident memory of `pid` in bytes, `None` if the process is gone
    fn resident_memory(&self, pid: u32) -> Option<u64>;
}

/// Memory sampler backed by `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn resident_memory(&self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = self.system.lock().ok()?;

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        system.process(sys_pid).map(|process| process.memory())
    }
}

/// Periodic memory check for one running process
pub struct MemoryMonitor {
    name: String,
    pid: u32,
    ceiling: u64,
    interval: Duration,
    sampler: Arc<dyn MemorySampler>,
}

impl MemoryMonitor {
    pub fn new(
        name: String,
        pid: u32,
        ceiling: u64,
        interval: Duration,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        Self {
            name,
            pid,
            ceiling,
            interval,
            sampler,
        }
    }

    /// Take one sample and produce an alert if it is over the ceiling
    pub fn check(&self) -> Option<MemoryAlert> {
        let observed = self.sampler.resident_memory(self.pid)?;
        trace!("Process {} (PID: {}) uses {} bytes", self.name, self.pid, observed);

        if observed > self.ceiling {
            Some(MemoryAlert {
                spec_name: self.name.clone(),
                pid: self.pid,
                observed_bytes: observed,
                timestamp: SystemTime::now(),
            })
        } else {
            None
        }
    }

    /// Sample once per interval until the receiver goes away
    ///
    /// Every tick is evaluated on its own, so a process that stays over its
    /// ceiling produces exactly one alert per tick.
    pub async fn run(self, events: mpsc::UnboundedSender<SupervisorEvent>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; give the process one interval
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Some(alert) = self.check() {
                if events.send(SupervisorEvent::Memory(alert)).is_err() {
                    debug!("Memory monitor for {} stopping, supervisor gone", self.name);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedSampler {
        readings: HashMap<u32, u64>,
    }

    impl MemorySampler for FixedSampler {
        fn resident_memory(&self, pid: u32) -> Option<u64> {
            self.readings.get(&pid).copied()
        }
    }

    fn monitor(observed: u64, interval: Duration) -> MemoryMonitor {
        let sampler = FixedSampler {
            readings: HashMap::from([(42, observed)]),
        };
        MemoryMonitor::new(
            "api".to_string(),
            42,
            200_000_000,
            interval,
            Arc::new(sampler),
        )
    }

    #[test]
    fn test_check_over_ceiling() {
        let alert = monitor(250_000_000, Duration::from_secs(1)).check().unwrap();
        assert_eq!(alert.spec_name, "api");
        assert_eq!(alert.pid, 42);
        assert_eq!(alert.observed_bytes, 250_000_000);
    }

    #[test]
    fn test_check_under_or_at_ceiling() {
        assert!(monitor(150_000_000, Duration::from_secs(1)).check().is_none());
        assert!(monitor(200_000_000, Duration::from_secs(1)).check().is_none());
    }

    #[test]
    fn test_check_missing_process() {
        let monitor = MemoryMonitor::new(
            "gone".to_string(),
            7,
            1,
            Duration::from_secs(1),
            Arc::new(FixedSampler {
                readings: HashMap::new(),
            }),
        );
        assert!(monitor.check().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_alert_per_tick() {
        let interval = Duration::from_secs(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(monitor(250_000_000, interval).run(tx));

        tokio::time::sleep(interval * 5 + interval / 2).await;
        task.abort();

        let mut alerts = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, SupervisorEvent::Memory(_)));
            alerts += 1;
        }
        assert_eq!(alerts, 5);
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            monitor(250_000_000, Duration::from_millis(10)).run(tx),
        )
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_sysinfo_sampler_reads_own_process() {
        let sampler = SysinfoSampler::new();
        let memory = sampler.resident_memory(std::process::id());
        assert!(memory.unwrap_or(0) > 0);
    }
}
