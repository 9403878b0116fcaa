//! Sequential pipeline execution
//!
//! A pipeline is an ordered list of [`PipelineStep`]s. Steps run one at a
//! time with the caller's standard streams; the first step whose exit code
//! differs from its expected code stops the pipeline and its code becomes
//! the pipeline's result. Nothing is retried.
//!
//! Process spawning sits behind the [`StepRunner`] trait so the variant and
//! coverage runners can be driven by a scripted runner in tests.

use crate::error::{GENERIC_FAILURE_CODE, ProcessError, ProcessResult};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a step's standard output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdoutMode {
    /// Inherit the driver's stdout
    #[default]
    Inherit,
    /// Capture stdout and hand it back in the [`StepOutcome`]
    Capture,
}

/// One external-process invocation with a pass/fail exit-code contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    /// Program followed by its arguments
    pub command_line: Vec<String>,
    /// Exit code that counts as success
    pub expected_exit_code: i32,
    /// Extra environment for the child
    pub env: Vec<(String, String)>,
    /// Working directory; inherits the driver's when unset
    pub current_dir: Option<PathBuf>,
    /// Standard output disposition
    pub stdout: StdoutMode,
}

impl PipelineStep {
    /// Create a step from a program and its arguments
    pub fn new<I, S>(command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command_line: command_line.into_iter().map(Into::into).collect(),
            expected_exit_code: 0,
            env: Vec::new(),
            current_dir: None,
            stdout: StdoutMode::Inherit,
        }
    }

    /// Add one environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run inside `dir`
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Capture stdout instead of inheriting it
    #[must_use]
    pub fn capture_stdout(mut self) -> Self {
        self.stdout = StdoutMode::Capture;
        self
    }

    /// Program name (first argument), empty for a degenerate step
    pub fn program(&self) -> &str {
        self.command_line.first().map_or("", String::as_str)
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        f.write_str(&self.command_line.join(" "))
    }
}

/// What a step produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Exit code (signals map to `128 + signal`)
    pub exit_code: i32,
    /// Captured stdout when the step asked for it
    pub stdout: Option<Vec<u8>>,
    /// Wall-clock duration of the step
    pub duration: Duration,
}

/// Spawns a step and waits for it
#[async_trait]
pub trait StepRunner: Send {
    /// Run one step to completion. Only spawn/IO failures are errors; a
    /// non-zero exit is reported through [`StepOutcome::exit_code`].
    async fn run(&mut self, step: &PipelineStep) -> ProcessResult<StepOutcome>;
}

/// Runs steps as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl StepRunner for SystemRunner {
    async fn run(&mut self, step: &PipelineStep) -> ProcessResult<StepOutcome> {
        let (program, args) = step
            .command_line
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        let mut command = Command::new(program);
        let _ = command.args(args).envs(step.env.iter().cloned());
        if let Some(dir) = &step.current_dir {
            let _ = command.current_dir(dir);
        }

        let spawn_error = |source| ProcessError::Spawn {
            program: program.clone(),
            source,
        };

        let start = Instant::now();
        let (status, stdout) = match step.stdout {
            StdoutMode::Inherit => (command.status().await.map_err(spawn_error)?, None),
            StdoutMode::Capture => {
                let output = command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .output()
                    .await
                    .map_err(spawn_error)?;
                (output.status, Some(output.stdout))
            }
        };

        Ok(StepOutcome {
            exit_code: exit_code_of(status),
            stdout,
            duration: start.elapsed(),
        })
    }
}

/// Convert an exit status to a shell-style exit code
pub fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => GENERIC_FAILURE_CODE,
    }
}

/// Outcomes of a fully successful pipeline, in step order
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// One outcome per executed step
    pub outcomes: Vec<StepOutcome>,
}

impl PipelineReport {
    /// Total wall-clock time across all steps
    pub fn duration(&self) -> Duration {
        self.outcomes.iter().map(|o| o.duration).sum()
    }

    /// Captured stdout of the last step, if it captured any
    pub fn last_stdout(&self) -> Option<&[u8]> {
        self.outcomes.last().and_then(|o| o.stdout.as_deref())
    }
}

/// Executes pipelines through a [`StepRunner`]
#[derive(Debug)]
pub struct PipelineExecutor<R = SystemRunner> {
    runner: R,
    steps_run: usize,
    cancel: Option<CancellationToken>,
}

impl PipelineExecutor<SystemRunner> {
    /// Executor that spawns real processes
    pub fn system() -> Self {
        Self::new(SystemRunner)
    }
}

impl<R: StepRunner> PipelineExecutor<R> {
    /// Create an executor around `runner`
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            steps_run: 0,
            cancel: None,
        }
    }

    /// Refuse to start further steps once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fail with [`ProcessError::Interrupted`] if the operator asked to stop
    pub fn check_cancelled(&self, next: &str) -> ProcessResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => {
                warn!(next, "Interrupted, not starting");
                Err(ProcessError::Interrupted { next: next.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Access the runner (test doubles record invocations here)
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Number of steps started over the executor's lifetime
    pub fn steps_run(&self) -> usize {
        self.steps_run
    }

    /// Run `steps` in order, stopping at the first unexpected exit code
    pub async fn execute(&mut self, steps: &[PipelineStep]) -> ProcessResult<PipelineReport> {
        let mut report = PipelineReport::default();
        let total = steps.len();

        for (position, step) in steps.iter().enumerate() {
            let index = position + 1;
            self.check_cancelled(step.program())?;
            info!(step = index, total, "▶ {}", step);
            self.steps_run += 1;

            let outcome = self.runner.run(step).await?;
            debug!(
                step = index,
                exit_code = outcome.exit_code,
                duration_ms = %outcome.duration.as_millis(),
                "Step finished"
            );

            if outcome.exit_code != step.expected_exit_code {
                let exit_code = if outcome.exit_code == 0 {
                    GENERIC_FAILURE_CODE
                } else {
                    outcome.exit_code
                };
                error!(
                    step = index,
                    program = step.program(),
                    exit_code,
                    "Step failed, aborting pipeline"
                );
                return Err(ProcessError::StepFailed {
                    index,
                    program: step.program().to_string(),
                    exit_code,
                });
            }

            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Run a single step as a one-element pipeline
    pub async fn execute_one(&mut self, step: PipelineStep) -> ProcessResult<StepOutcome> {
        let mut report = self.execute(std::slice::from_ref(&step)).await?;
        report.outcomes.pop().ok_or(ProcessError::EmptyCommand)
    }
}
