//! Supervisor and monitor driving real children through `sh`

use async_trait::async_trait;
use convenient_process::{
    Acknowledgment, AutoAcknowledge, MonitorConfig, Operator, ProcessResult, RestartPolicy, ResourceMonitor,
    Supervisor, TimeSeries,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Counts prompts and cancels the run from inside the first one
struct CancellingOperator {
    prompts: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

#[async_trait]
impl Operator for CancellingOperator {
    async fn acknowledge(&mut self, _exit_code: i32) -> ProcessResult<Acknowledgment> {
        let _ = self.prompts.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(Acknowledgment::Continue)
    }
}

/// Exits 0 on the first attempt and 1 on every later one
fn counting_script(dir: &TempDir) -> Vec<String> {
    let counter = dir.path().join("attempts");
    let script = format!(
        "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; [ $n -eq 1 ]",
        c = counter.display()
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

#[tokio::test]
async fn test_single_run_propagates_exit_code() {
    let mut supervisor = Supervisor::new(
        vec!["sh".into(), "-c".into(), "exit 7".into()],
        RestartPolicy::default(),
        AutoAcknowledge::default(),
        CancellationToken::new(),
    );

    let result = supervisor.run().await.unwrap();
    assert_eq!(result.exit_code, 7);
    assert_eq!(result.attempts, 1);
    assert!(result.samples.is_none());
}

#[tokio::test]
async fn test_restart_loop_gates_crash_and_honors_cancellation() {
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let prompts = Arc::new(AtomicUsize::new(0));
    let operator = CancellingOperator {
        prompts: prompts.clone(),
        cancel: cancel.clone(),
    };

    let mut supervisor = Supervisor::new(
        counting_script(&tmp),
        RestartPolicy { restart_loop: true },
        operator,
        cancel,
    );
    let result = supervisor.run().await.unwrap();

    assert_eq!(prompts.load(Ordering::SeqCst), 1);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.exit_code, 1);
    assert_eq!(supervisor.history().len(), 2);
    assert_eq!(supervisor.history()[0].exit_code, 0);
}

#[tokio::test]
async fn test_cancelled_before_spawn_never_starts_child() {
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut supervisor = Supervisor::new(
        counting_script(&tmp),
        RestartPolicy { restart_loop: true },
        AutoAcknowledge::default(),
        cancel,
    );
    let result = supervisor.run().await.unwrap();

    assert_eq!(result.attempts, 0);
    assert_eq!(result.exit_code, convenient_process::INTERRUPTED_EXIT_CODE);
    assert!(!tmp.path().join("attempts").exists());
}

#[tokio::test]
async fn test_monitored_run_writes_time_series() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("memory_usage.json");
    let config = MonitorConfig {
        interval: Duration::from_millis(100),
        tick: Duration::from_millis(10),
        grace_period: Duration::from_secs(1),
    };
    let command = vec!["sh".to_string(), "-c".to_string(), "sleep 0.35".to_string()];

    let monitor = ResourceMonitor::system(config, CancellationToken::new());
    let report = monitor.supervise(command.clone()).await.unwrap();
    TimeSeries::from_report(&command, &config, &report)
        .write_json(&output)
        .unwrap();

    let series = TimeSeries::read_json(&output).unwrap();
    assert_eq!(series.exit_code, 0);
    assert!(!series.cancelled);
    assert!(!series.samples.is_empty());
    assert!(
        series
            .samples
            .windows(2)
            .all(|w| w[0].elapsed_seconds <= w[1].elapsed_seconds)
    );
}
