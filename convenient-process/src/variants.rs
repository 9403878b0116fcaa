//! Multi-variant test runs
//!
//! The test suite is built and executed under three configurations in a
//! fixed order:
//!
//! 1. **Normal** - instrumentation explicitly off (the build system caches
//!    options, so "not mentioned" would silently inherit the last run). The
//!    test binary runs twice, the second time under a wall-clock timer.
//! 2. **GC debug** - the normal configuration with `DAI_DEBUG_GC=ON`.
//! 3. **Sanitizer** - the separate `santest` target.
//!
//! Every stage is a full configure/build pipeline followed by a run of the
//! produced binary. The first failure aborts all remaining stages.

use crate::config::{BuildConfiguration, BuildFlag, split_arguments};
use crate::error::ProcessResult;
use crate::pipeline::StepRunner;
use crate::workspace::{BuildSession, Workspace};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// GC stress instrumentation switch
pub const DEBUG_GC_FLAG: &str = "DAI_DEBUG_GC";

/// Verbose test output switch
pub const TEST_VERBOSE_FLAG: &str = "DAI_TEST_VERBOSE";

/// Target holding the regular test suite
pub const TEST_TARGET: &str = "test";

/// Target holding the sanitizer-instrumented test suite
pub const SANITIZER_TARGET: &str = "santest";

/// Named build configuration used to rerun the suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Instrumentation off
    Normal,
    /// GC debug instrumentation on
    GcDebug,
    /// Address/UB sanitizer build
    Sanitizer,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Normal => write!(f, "Normal"),
            Variant::GcDebug => write!(f, "DEBUG GC"),
            Variant::Sanitizer => write!(f, "Sanitizer Test"),
        }
    }
}

/// One stage of the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStage {
    /// Which variant this stage exercises
    pub variant: Variant,
    /// Configuration to build with
    pub configuration: BuildConfiguration,
    /// Test binary produced by the build
    pub binary: PathBuf,
    /// Run the binary a second time under a wall-clock timer
    pub timed_rerun: bool,
}

/// Ordered stages plus the arguments passed to every test binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    /// Stages in execution order
    pub stages: Vec<VariantStage>,
    /// Arguments for the test binary
    pub program_args: Vec<String>,
}

impl TestPlan {
    /// Build the fixed three-stage plan from raw caller arguments
    pub fn from_args<S: AsRef<str>>(workspace: &Workspace, args: &[S]) -> Self {
        let (overrides, program_args) = split_arguments(args);

        let mut normal = BuildConfiguration::new(TEST_TARGET)
            .with_flag(DEBUG_GC_FLAG, "OFF")
            .with_flag(TEST_VERBOSE_FLAG, "OFF");
        normal.merge(overrides);

        let gc_debug = normal.derive(TEST_TARGET, [BuildFlag::new(DEBUG_GC_FLAG, "ON")]);

        let stages = vec![
            VariantStage {
                variant: Variant::Normal,
                configuration: normal,
                binary: workspace.target_binary(TEST_TARGET),
                timed_rerun: true,
            },
            VariantStage {
                variant: Variant::GcDebug,
                configuration: gc_debug,
                binary: workspace.target_binary(TEST_TARGET),
                timed_rerun: false,
            },
            VariantStage {
                variant: Variant::Sanitizer,
                configuration: BuildConfiguration::new(SANITIZER_TARGET),
                binary: workspace.target_binary(SANITIZER_TARGET),
                timed_rerun: false,
            },
        ];

        Self {
            stages,
            program_args,
        }
    }
}

/// Result of one completed stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// Variant that ran
    pub variant: Variant,
    /// Duration of the untimed test run
    pub run_duration: Duration,
    /// Duration of the timed rerun, when the stage had one
    pub timed_duration: Option<Duration>,
}

/// All stages completed; the runner never returns a partial report
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariantReport {
    /// Stage reports in execution order
    pub stages: Vec<StageReport>,
}

/// Runs a [`TestPlan`] through a [`BuildSession`]
pub struct VariantTestRunner<'s, 'a, R: StepRunner> {
    session: &'s mut BuildSession<'a, R>,
}

impl<'s, 'a, R: StepRunner> VariantTestRunner<'s, 'a, R> {
    /// Create a runner borrowing `session`
    pub fn new(session: &'s mut BuildSession<'a, R>) -> Self {
        Self { session }
    }

    /// Run every stage in order; the first failure propagates unchanged
    pub async fn run(&mut self, plan: &TestPlan) -> ProcessResult<VariantReport> {
        let mut report = VariantReport::default();

        for stage in &plan.stages {
            self.session.ensure_not_cancelled(&stage.variant.to_string())?;
            println!("############## {} {}", stage.variant, "#".repeat(60));
            info!(variant = %stage.variant, target = %stage.configuration.target, "Starting test stage");

            let _ = self.session.compile(&stage.configuration).await?;
            let run = self.session.run_artifact(&stage.binary, &plan.program_args).await?;

            let timed_duration = if stage.timed_rerun {
                let timed = self.session.run_artifact(&stage.binary, &plan.program_args).await?;
                println!("⏱️  real {:.3}s", timed.duration.as_secs_f64());
                Some(timed.duration)
            } else {
                None
            };

            report.stages.push(StageReport {
                variant: stage.variant,
                run_duration: run.duration,
                timed_duration,
            });
        }

        Ok(report)
    }
}
