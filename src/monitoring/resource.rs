//! Resource Usage Sampling
//!
//! Reads host CPU usage and the resident memory of the monitor process
//! immediately before each task runs.

use std::thread;
use std::time::Duration;

use log::debug;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

use crate::error::{MonitorError, Result};

/// Default window over which CPU usage is measured.
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// A single resource usage reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSample {
    /// Host-wide CPU usage percentage (0-100)
    pub cpu_percent: f32,
    /// Resident memory of this process in megabytes
    pub memory_mb: f64,
}

/// Source of resource samples.
///
/// The runner only depends on this trait so tests can feed it fixed
/// readings instead of waiting on real CPU windows.
pub trait Sampler: Send {
    /// Takes one blocking sample.
    fn sample(&mut self) -> ResourceSample;
}

/// Samples CPU and memory through `sysinfo`.
///
/// # Example
///
/// ```rust,no_run
/// use casa_monitor::monitoring::{ResourceSampler, Sampler};
///
/// let mut sampler = ResourceSampler::new().expect("telemetry available");
/// let sample = sampler.sample();
/// println!("CPU: {:.1}% | RAM: {:.0}MB", sample.cpu_percent, sample.memory_mb);
/// ```
pub struct ResourceSampler {
    system: System,
    process_id: Pid,
    window: Duration,
}

impl ResourceSampler {
    /// Creates a sampler for the current process.
    ///
    /// Fails when the host exposes no process telemetry; callers treat this
    /// as a fatal startup error.
    pub fn new() -> Result<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(MonitorError::Telemetry(
                "this operating system is not supported by sysinfo".to_string(),
            ));
        }

        let process_id = get_current_pid()
            .map_err(|e| MonitorError::Telemetry(format!("cannot resolve own pid: {}", e)))?;

        Ok(Self {
            system: System::new(),
            process_id,
            window: DEFAULT_SAMPLE_WINDOW,
        })
    }

    /// Sets the CPU measurement window.
    ///
    /// Windows shorter than `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL` are
    /// raised to that minimum, below which readings are meaningless.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Returns the effective measurement window.
    pub fn window(&self) -> Duration {
        self.window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }

    fn memory_mb(&mut self) -> f64 {
        let pid = self.process_id;
        let refreshed = self
            .system
            .refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory());

        match self.system.process(pid) {
            Some(process) if refreshed => process.memory() as f64 / (1024.0 * 1024.0),
            _ => {
                debug!("Process {} not visible to sysinfo", pid);
                0.0
            }
        }
    }
}

impl Sampler for ResourceSampler {
    fn sample(&mut self) -> ResourceSample {
        // CPU usage is a delta between two refreshes
        self.system.refresh_cpu();
        thread::sleep(self.window());
        self.system.refresh_cpu();

        let cpu_percent = self.system.global_cpu_info().cpu_usage();
        let memory_mb = self.memory_mb();

        ResourceSample {
            cpu_percent,
            memory_mb,
        }
    }
}
