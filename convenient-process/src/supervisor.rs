//! Restart supervision for a long-running artifact
//!
//! [`SupervisedProcess`] wraps one OS child at a time and tracks its
//! lifecycle (`NotStarted → Running → Exited | Killed`). [`Supervisor`]
//! drives it through an explicit state machine:
//!
//! | state         | event          | next                                          |
//! |---------------|----------------|-----------------------------------------------|
//! | `Spawning`    | `Spawned`      | `Waiting`                                     |
//! | `Spawning`    | `Cancelled`    | `Finished(last exit)`                         |
//! | `Waiting`     | `Cancelled`    | `Waiting` (recorded, child keeps running)     |
//! | `Waiting`     | `ChildExited`  | `Finished` / `AwaitingAck` / `Spawning`       |
//! | `AwaitingAck` | `Acknowledged` | `Spawning`, or `Finished` if cancelled        |
//! | `AwaitingAck` | `Cancelled`    | `Finished`                                    |
//!
//! Cancellation is sticky: once observed it only affects the next
//! scheduling decision, never the in-flight child.

use crate::cancel::INTERRUPTED_EXIT_CODE;
use crate::error::{ProcessError, ProcessResult};
use crate::monitor::MemorySample;
use crate::pipeline::exit_code_of;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a supervised OS process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Not spawned yet
    NotStarted,
    /// Child is alive
    Running,
    /// Child exited on its own with this code
    Exited(i32),
    /// Child was terminated by the driver
    Killed,
}

/// A child process owned by the supervisor
#[derive(Debug)]
pub struct SupervisedProcess {
    command_line: Vec<String>,
    child: Option<Child>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    last_exit_code: Option<i32>,
    state: ProcessState,
}

impl SupervisedProcess {
    /// Describe a process without starting it
    pub fn new(command_line: Vec<String>) -> Self {
        Self {
            command_line,
            child: None,
            pid: None,
            started_at: None,
            last_exit_code: None,
            state: ProcessState::NotStarted,
        }
    }

    /// Program and arguments
    pub fn command_line(&self) -> &[String] {
        &self.command_line
    }

    /// OS pid of the current (or last) child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Exit code of the last finished child
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Time since the current child was spawned
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Start a new child. Fails while a previous child is still running.
    pub fn spawn(&mut self) -> ProcessResult<()> {
        if self.state == ProcessState::Running {
            return Err(ProcessError::InvalidTransition(
                "spawn requested while a child is still running".to_string(),
            ));
        }

        let (program, args) = self
            .command_line
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        self.pid = child.id();
        self.started_at = Some(Instant::now());
        self.child = Some(child);
        self.state = ProcessState::Running;
        debug!(pid = ?self.pid, program = %program, "Child spawned");
        Ok(())
    }

    fn running_child(&mut self) -> ProcessResult<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| ProcessError::InvalidTransition("no running child".to_string()))
    }

    fn record_exit(&mut self, exit_code: i32, state: ProcessState) -> i32 {
        self.child = None;
        self.last_exit_code = Some(exit_code);
        self.state = state;
        exit_code
    }

    /// Wait for the child to exit, riding out operator interrupts.
    ///
    /// The first cancellation seen here is logged; the wait then continues
    /// until the child exits on its own.
    pub async fn wait_through_interrupts(&mut self, cancel: &CancellationToken) -> ProcessResult<i32> {
        let pid = self.pid;
        let mut interrupted = cancel.is_cancelled();
        let child = self.running_child()?;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                () = cancel.cancelled(), if !interrupted => {
                    interrupted = true;
                    warn!(pid = ?pid, "Interrupt received, waiting for child to exit");
                }
            }
        };

        let code = exit_code_of(status);
        Ok(self.record_exit(code, ProcessState::Exited(code)))
    }

    /// Non-blocking liveness check; `Some(code)` once the child has exited
    pub fn try_exit_code(&mut self) -> ProcessResult<Option<i32>> {
        let child = self.running_child()?;
        match child.try_wait()? {
            Some(status) => {
                let code = exit_code_of(status);
                Ok(Some(self.record_exit(code, ProcessState::Exited(code))))
            }
            None => Ok(None),
        }
    }

    /// Ask the child to stop (SIGTERM), escalating to SIGKILL after `grace`
    pub async fn terminate(&mut self, grace: Duration) -> ProcessResult<i32> {
        let child = self.running_child()?;

        if let Some(raw) = child.id().and_then(|id| i32::try_from(id).ok()) {
            match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let status = if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            status?
        } else {
            warn!(pid = ?child.id(), grace_ms = %grace.as_millis(), "Child ignored SIGTERM, killing");
            child.kill().await?;
            child.wait().await?
        };

        Ok(self.record_exit(exit_code_of(status), ProcessState::Killed))
    }
}

/// Restart behavior, read once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy {
    /// Respawn the child after every exit until cancelled
    pub restart_loop: bool,
}

impl RestartPolicy {
    /// Interpret a restart toggle value: anything but `"0"` enables the loop
    pub fn from_toggle(value: Option<&str>) -> Self {
        Self {
            restart_loop: value.is_some_and(|v| v != "0"),
        }
    }
}

/// Named supervisor states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    /// About to start `attempt` (1-based)
    Spawning {
        /// Attempt number to start
        attempt: u32,
        /// Exit code of the previous attempt
        last_exit: Option<i32>,
    },
    /// Child of `attempt` is running
    Waiting {
        /// Running attempt
        attempt: u32,
    },
    /// Child crashed; operator must confirm the restart
    AwaitingAck {
        /// Attempt that crashed
        attempt: u32,
        /// Its exit code
        exit_code: i32,
    },
    /// Terminal state
    Finished {
        /// Code propagated to the caller
        exit_code: i32,
        /// Attempts that ran to completion
        attempts: u32,
    },
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Child started
    Spawned,
    /// Child exited with a code
    ChildExited(i32),
    /// Operator confirmed the restart
    Acknowledged,
    /// Cancellation observed at a scheduling point
    Cancelled,
}

impl SupervisorState {
    /// Starting state of every run
    pub fn initial() -> Self {
        SupervisorState::Spawning {
            attempt: 1,
            last_exit: None,
        }
    }

    /// Whether the run is over
    pub fn is_finished(&self) -> bool {
        matches!(self, SupervisorState::Finished { .. })
    }

    /// Pure transition function; `cancelled` is the sticky cancellation flag
    pub fn transition(self, event: SupervisorEvent, policy: &RestartPolicy, cancelled: bool) -> ProcessResult<Self> {
        use SupervisorEvent as E;
        use SupervisorState as S;

        let next = match (self, event) {
            (S::Spawning { attempt, .. }, E::Spawned) => S::Waiting { attempt },
            (S::Spawning { attempt, last_exit }, E::Cancelled) => S::Finished {
                exit_code: last_exit.unwrap_or(INTERRUPTED_EXIT_CODE),
                attempts: attempt.saturating_sub(1),
            },
            (S::Waiting { attempt }, E::Cancelled) => S::Waiting { attempt },
            (S::Waiting { attempt }, E::ChildExited(exit_code)) => {
                if !policy.restart_loop || cancelled {
                    S::Finished {
                        exit_code,
                        attempts: attempt,
                    }
                } else if exit_code != 0 {
                    S::AwaitingAck { attempt, exit_code }
                } else {
                    S::Spawning {
                        attempt: attempt + 1,
                        last_exit: Some(exit_code),
                    }
                }
            }
            (S::AwaitingAck { attempt, exit_code }, E::Acknowledged) => {
                if cancelled {
                    S::Finished {
                        exit_code,
                        attempts: attempt,
                    }
                } else {
                    S::Spawning {
                        attempt: attempt + 1,
                        last_exit: Some(exit_code),
                    }
                }
            }
            (S::AwaitingAck { attempt, exit_code }, E::Cancelled) => S::Finished {
                exit_code,
                attempts: attempt,
            },
            (state, event) => {
                return Err(ProcessError::InvalidTransition(format!("{state:?} on {event:?}")));
            }
        };

        Ok(next)
    }
}

/// Operator's answer to a crash prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgment {
    /// Restart the child
    Continue,
    /// Stop the loop (e.g. input closed)
    Stop,
}

/// Source of crash acknowledgments
#[async_trait]
pub trait Operator: Send {
    /// Called after a non-zero exit in restart mode, before the next spawn
    async fn acknowledge(&mut self, exit_code: i32) -> ProcessResult<Acknowledgment>;
}

#[async_trait]
impl<T: Operator + ?Sized> Operator for Box<T> {
    async fn acknowledge(&mut self, exit_code: i32) -> ProcessResult<Acknowledgment> {
        (**self).acknowledge(exit_code).await
    }
}

/// Prompts on the terminal and waits for Enter. End of input stops the loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalOperator;

#[async_trait]
impl Operator for TerminalOperator {
    async fn acknowledge(&mut self, exit_code: i32) -> ProcessResult<Acknowledgment> {
        use std::io::Write;

        println!("Exit code: {exit_code}");
        print!("Press Enter to continue...");
        std::io::stdout().flush()?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            println!();
            warn!("Input closed, leaving restart loop");
            return Ok(Acknowledgment::Stop);
        }
        Ok(Acknowledgment::Continue)
    }
}

/// Non-interactive acknowledgment with a fixed pause before restarting
#[derive(Debug, Clone, Copy)]
pub struct AutoAcknowledge {
    /// Pause before the restart
    pub delay: Duration,
}

impl Default for AutoAcknowledge {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl Operator for AutoAcknowledge {
    async fn acknowledge(&mut self, exit_code: i32) -> ProcessResult<Acknowledgment> {
        warn!(exit_code, delay_ms = %self.delay.as_millis(), "Child crashed, restarting without confirmation");
        tokio::time::sleep(self.delay).await;
        Ok(Acknowledgment::Continue)
    }
}

/// One finished attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Exit code of the attempt
    pub exit_code: i32,
    /// How long the child ran
    pub duration: Duration,
}

/// Final artifact of a supervised run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    /// Code propagated to the caller; 0 is success
    pub exit_code: i32,
    /// Number of attempts that ran to completion
    pub attempts: u32,
    /// Memory time series when the run was monitored
    pub samples: Option<Vec<MemorySample>>,
}

impl RunResult {
    /// Whether the run counts as success
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command once or in a restart loop
pub struct Supervisor<O: Operator> {
    command_line: Vec<String>,
    policy: RestartPolicy,
    operator: O,
    cancel: CancellationToken,
    history: Vec<AttemptRecord>,
}

impl<O: Operator> Supervisor<O> {
    /// Create a supervisor
    pub fn new(command_line: Vec<String>, policy: RestartPolicy, operator: O, cancel: CancellationToken) -> Self {
        Self {
            command_line,
            policy,
            operator,
            cancel,
            history: Vec::new(),
        }
    }

    /// Completed attempts so far
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    /// Drive the state machine until it finishes
    pub async fn run(&mut self) -> ProcessResult<RunResult> {
        let mut process = SupervisedProcess::new(self.command_line.clone());
        let mut state = SupervisorState::initial();

        if self.policy.restart_loop {
            println!("Running forever, press Ctrl+C to stop");
        }

        loop {
            let event = match state {
                SupervisorState::Finished { exit_code, attempts } => {
                    info!(exit_code, attempts, "Supervised run finished");
                    return Ok(RunResult {
                        exit_code,
                        attempts,
                        samples: None,
                    });
                }
                SupervisorState::Spawning { attempt, .. } => {
                    if self.cancel.is_cancelled() {
                        SupervisorEvent::Cancelled
                    } else {
                        if attempt > 1 {
                            println!("Restarting...");
                        }
                        process.spawn()?;
                        info!(attempt, pid = ?process.pid(), "🚀 Child started");
                        SupervisorEvent::Spawned
                    }
                }
                SupervisorState::Waiting { attempt } => {
                    let exit_code = process.wait_through_interrupts(&self.cancel).await?;
                    let duration = process.uptime().unwrap_or_default();
                    self.history.push(AttemptRecord {
                        attempt,
                        exit_code,
                        duration,
                    });
                    info!(attempt, exit_code, duration_ms = %duration.as_millis(), "Child exited");
                    SupervisorEvent::ChildExited(exit_code)
                }
                SupervisorState::AwaitingAck { exit_code, .. } => {
                    tokio::select! {
                        answer = self.operator.acknowledge(exit_code) => match answer? {
                            Acknowledgment::Continue => SupervisorEvent::Acknowledged,
                            Acknowledgment::Stop => SupervisorEvent::Cancelled,
                        },
                        () = self.cancel.cancelled() => SupervisorEvent::Cancelled,
                    }
                }
            };

            let next = state.transition(event, &self.policy, self.cancel.is_cancelled())?;
            debug!(?state, ?event, ?next, "Supervisor transition");
            state = next;
        }
    }
}
