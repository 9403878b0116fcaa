//! Process orchestration for a CMake/Ninja interpreter project
//!
//! This crate drives external tools in well-defined sequences and reports
//! their outcome as exit codes:
//!
//! - Toolchain discovery with environment overrides
//! - Ordered `-DKEY=VALUE` build configurations with last-write-wins merging
//! - Sequential pipelines that stop at the first failing step
//! - Multi-variant test runs (normal, GC debug, sanitizer)
//! - LLVM source-based coverage reports
//! - Restart supervision gated by operator acknowledgment
//! - Resident-memory sampling written as a JSON time series
//!
//! # Example
//!
//! ```no_run
//! use convenient_process::{
//!     BuildConfiguration, BuildSession, PipelineExecutor, ToolchainOverrides, ToolchainPaths,
//!     Workspace,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let toolchain = ToolchainPaths::locate(ToolchainOverrides::default())?;
//!     let workspace = Workspace::default();
//!     let mut session = BuildSession::new(&workspace, &toolchain, PipelineExecutor::system());
//!
//!     let config = BuildConfiguration::new("dai").with_flag("DAI_DEBUG_GC", "OFF");
//!     let report = session.compile(&config).await?;
//!     println!("built in {:?}", report.duration());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod cancel;
pub mod config;
pub mod coverage;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod supervisor;
pub mod toolchain;
pub mod variants;
pub mod workspace;

pub use cancel::{INTERRUPTED_EXIT_CODE, listen_for_interrupts};
pub use config::{BuildConfiguration, BuildFlag, split_arguments};
pub use coverage::{CoveragePipeline, CoveragePlan, CoverageReport, ReportKind};
pub use error::{GENERIC_FAILURE_CODE, ProcessError, ProcessResult};
pub use monitor::{
    MemoryProbe, MemorySample, MonitorConfig, MonitorReport, ProcStatusProbe, ResourceMonitor, TimeSeries,
};
pub use pipeline::{PipelineExecutor, PipelineReport, PipelineStep, StdoutMode, StepOutcome, StepRunner, SystemRunner};
pub use supervisor::{
    Acknowledgment, AutoAcknowledge, Operator, ProcessState, RestartPolicy, RunResult, SupervisedProcess, Supervisor,
    SupervisorEvent, SupervisorState, TerminalOperator,
};
pub use toolchain::{ToolchainOverrides, ToolchainPaths};
pub use variants::{TestPlan, Variant, VariantReport, VariantTestRunner};
pub use workspace::{BuildSession, INTERPRETER_TARGET, Workspace};
