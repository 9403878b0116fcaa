//! Resident-memory sampling of a running child
//!
//! The monitor polls the child's liveness on a short tick and records a
//! resident-memory sample whenever a full interval has passed since the
//! previous sample deadline. Sample times are measured from a monotonic
//! clock started at spawn, so timestamps never go backwards. Each tick reads
//! memory before checking for exit, so the final sample carries the last
//! reading taken while the child was still unreaped (zero if it could not
//! be queried). An operator interrupt terminates the child and keeps
//! whatever was collected so far.

use crate::error::{ProcessError, ProcessResult};
use crate::supervisor::{RunResult, SupervisedProcess};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Default artifact written by the monitor command
pub const DEFAULT_OUTPUT_FILE: &str = "memory_usage.json";

/// One point of the memory time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Seconds since the child was spawned
    pub elapsed_seconds: f64,
    /// Resident set size in MiB
    pub resident_mb: f64,
}

impl MemorySample {
    fn new(elapsed: Duration, resident_bytes: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let resident_mb = resident_bytes as f64 / BYTES_PER_MB;
        Self {
            elapsed_seconds: elapsed.as_secs_f64(),
            resident_mb,
        }
    }
}

/// Source of resident-memory readings
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes of `pid`, or `None` if it can't be queried
    fn resident_bytes(&self, pid: u32) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/<pid>/status`
#[derive(Debug, Clone)]
pub struct ProcStatusProbe {
    proc_root: PathBuf,
}

impl Default for ProcStatusProbe {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcStatusProbe {
    /// Probe reading from an alternate proc mount
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl MemoryProbe for ProcStatusProbe {
    fn resident_bytes(&self, pid: u32) -> Option<u64> {
        let path = self.proc_root.join(pid.to_string()).join("status");
        let status = std::fs::read_to_string(path).ok()?;
        parse_vm_rss(&status)
    }
}

/// Extract `VmRSS` (reported in kB) from a proc status file, in bytes
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Interval deadlines, measured from spawn
#[derive(Debug, Clone, Copy)]
pub struct SampleSchedule {
    interval: Duration,
    next_deadline: Duration,
}

impl SampleSchedule {
    /// First deadline is one interval after spawn
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_deadline: interval,
        }
    }

    /// Whether a sample is owed at `elapsed`
    pub fn is_due(&self, elapsed: Duration) -> bool {
        elapsed >= self.next_deadline
    }

    /// Move the deadline forward by one interval
    pub fn advance(&mut self) {
        self.next_deadline += self.interval;
    }

    /// Upcoming deadline
    pub fn next_deadline(&self) -> Duration {
        self.next_deadline
    }
}

/// Result of one sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Keep sampling
    Continue,
    /// The probe lost the process; stop sampling
    Vanished,
}

/// Collects samples according to a [`SampleSchedule`]
#[derive(Debug, Clone)]
pub struct Sampler {
    schedule: SampleSchedule,
    samples: Vec<MemorySample>,
}

impl Sampler {
    /// Sampler with an empty series
    pub fn new(interval: Duration) -> Self {
        Self {
            schedule: SampleSchedule::new(interval),
            samples: Vec::new(),
        }
    }

    /// Record `reading` if a deadline has passed
    pub fn poll(&mut self, reading: Option<u64>, elapsed: Duration) -> PollOutcome {
        if !self.schedule.is_due(elapsed) {
            return PollOutcome::Continue;
        }
        match reading {
            Some(bytes) => {
                self.samples.push(MemorySample::new(elapsed, bytes));
                self.schedule.advance();
                PollOutcome::Continue
            }
            None => PollOutcome::Vanished,
        }
    }

    /// Record the closing sample, zero when nothing could be read
    pub fn finish(&mut self, reading: Option<u64>, elapsed: Duration) {
        self.samples.push(MemorySample::new(elapsed, reading.unwrap_or(0)));
    }

    /// Samples collected so far
    pub fn samples(&self) -> &[MemorySample] {
        &self.samples
    }

    /// Consume into the series
    pub fn into_samples(self) -> Vec<MemorySample> {
        self.samples
    }
}

/// Monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between samples
    pub interval: Duration,
    /// Liveness polling period
    pub tick: Duration,
    /// Wait between SIGTERM and SIGKILL on interrupt
    pub grace_period: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            tick: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Outcome of a monitored run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Child exit code (128+N when terminated by signal N)
    pub exit_code: i32,
    /// Samples in time order
    pub samples: Vec<MemorySample>,
    /// The run was cut short by an interrupt
    pub cancelled: bool,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl MonitorReport {
    /// Highest resident value seen
    pub fn peak_resident_mb(&self) -> f64 {
        self.samples.iter().map(|s| s.resident_mb).fold(0.0, f64::max)
    }
}

impl From<MonitorReport> for RunResult {
    fn from(report: MonitorReport) -> Self {
        RunResult {
            exit_code: report.exit_code,
            attempts: 1,
            samples: Some(report.samples),
        }
    }
}

/// Samples a child's memory until it exits or the run is interrupted
pub struct ResourceMonitor<P: MemoryProbe = ProcStatusProbe> {
    config: MonitorConfig,
    probe: P,
    cancel: CancellationToken,
}

impl ResourceMonitor<ProcStatusProbe> {
    /// Monitor reading `/proc`
    pub fn system(config: MonitorConfig, cancel: CancellationToken) -> Self {
        Self::new(config, ProcStatusProbe::default(), cancel)
    }
}

impl<P: MemoryProbe> ResourceMonitor<P> {
    /// Monitor with a custom probe
    pub fn new(config: MonitorConfig, probe: P, cancel: CancellationToken) -> Self {
        Self { config, probe, cancel }
    }

    /// Active configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Spawn `command_line` and watch it
    pub async fn supervise(&self, command_line: Vec<String>) -> ProcessResult<MonitorReport> {
        let mut process = SupervisedProcess::new(command_line);
        process.spawn()?;
        self.watch(&mut process).await
    }

    /// Watch an already running child
    pub async fn watch(&self, process: &mut SupervisedProcess) -> ProcessResult<MonitorReport> {
        let pid = process
            .pid()
            .ok_or_else(|| ProcessError::InvalidTransition("monitoring a process that never started".to_string()))?;
        let started = Instant::now();
        let mut sampler = Sampler::new(self.config.interval);
        let mut sampling = true;

        info!(pid, interval_ms = %self.config.interval.as_millis(), "📈 Monitoring memory");

        let (exit_code, cancelled) = loop {
            let elapsed = started.elapsed();
            // read before reaping; afterwards the pid may be gone or reused
            let reading = if sampling { self.probe.resident_bytes(pid) } else { None };

            if let Some(code) = process.try_exit_code()? {
                sampler.finish(reading, elapsed);
                break (code, false);
            }

            if sampling && sampler.poll(reading, elapsed) == PollOutcome::Vanished {
                debug!(pid, "Process no longer readable, sampling stopped");
                sampling = false;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.tick) => {}
                () = self.cancel.cancelled() => {
                    warn!(pid, "Interrupt received, terminating monitored process");
                    break (process.terminate(self.config.grace_period).await?, true);
                }
            }
        };

        let duration = started.elapsed();
        let samples = sampler.into_samples();
        info!(
            pid,
            exit_code,
            samples = samples.len(),
            duration_ms = %duration.as_millis(),
            "Monitoring finished"
        );

        Ok(MonitorReport {
            exit_code,
            samples,
            cancelled,
            duration,
        })
    }
}

/// Persisted memory time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Format version
    pub version: String,
    /// When the artifact was produced
    pub timestamp: DateTime<Utc>,
    /// Monitored command line
    pub command: Vec<String>,
    /// Sampling interval in seconds
    pub interval_seconds: f64,
    /// Child exit code
    pub exit_code: i32,
    /// Whether the run was interrupted
    pub cancelled: bool,
    /// Highest resident value in MiB
    pub peak_resident_mb: f64,
    /// Samples in time order
    pub samples: Vec<MemorySample>,
}

impl TimeSeries {
    /// Build the artifact from a finished run
    pub fn from_report(command: &[String], config: &MonitorConfig, report: &MonitorReport) -> Self {
        Self {
            version: "1.0".to_string(),
            timestamp: Utc::now(),
            command: command.to_vec(),
            interval_seconds: config.interval.as_secs_f64(),
            exit_code: report.exit_code,
            cancelled: report.cancelled,
            peak_resident_mb: report.peak_resident_mb(),
            samples: report.samples.clone(),
        }
    }

    /// Write pretty-printed JSON to `path`
    pub fn write_json(&self, path: &Path) -> ProcessResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), samples = self.samples.len(), "Memory time series written");
        Ok(())
    }

    /// Read an artifact back
    pub fn read_json(path: &Path) -> ProcessResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
