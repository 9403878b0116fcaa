//! LLVM source-based coverage pipeline
//!
//! Four strictly sequential stages:
//!
//! 1. build the `coverage` target with clang
//! 2. run it with `LLVM_PROFILE_FILE` set, producing a raw profile
//! 3. `llvm-profdata merge -sparse` into a profile database
//! 4. `llvm-cov report` (no filters) or `llvm-cov show` (with filters)
//!
//! The report tool's stdout is captured and written to the report file only
//! after it exits successfully, so a failed run never leaves a truncated
//! report behind.

use crate::config::BuildConfiguration;
use crate::error::ProcessResult;
use crate::pipeline::{PipelineStep, StepRunner};
use crate::toolchain::ToolchainPaths;
use crate::workspace::{BuildSession, Workspace};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Target producing the instrumented binary
pub const COVERAGE_TARGET: &str = "coverage";

/// Raw profile written by the instrumented run
pub const RAW_PROFILE_FILE: &str = "coverage.profraw";

/// Merged profile database
pub const PROFILE_DATABASE_FILE: &str = "coverage.profdata";

/// Text report
pub const REPORT_FILE: &str = "coverage.txt";

/// Granularity of the generated report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// Per-file summary table
    Summary,
    /// Annotated per-line/per-branch view restricted to the given filters
    Expansion {
        /// File or function filters handed to `llvm-cov show`
        filters: Vec<String>,
    },
}

impl ReportKind {
    /// Summary without filters, expansion view otherwise
    pub fn from_filters<S: AsRef<str>>(filters: &[S]) -> Self {
        if filters.is_empty() {
            ReportKind::Summary
        } else {
            ReportKind::Expansion {
                filters: filters.iter().map(|f| f.as_ref().to_string()).collect(),
            }
        }
    }
}

/// Paths and steps for one coverage run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveragePlan {
    /// Build configuration for stage 1
    pub build: BuildConfiguration,
    /// Instrumented run (stage 2)
    pub profile_run: PipelineStep,
    /// Profile merge (stage 3)
    pub merge: PipelineStep,
    /// Report generation (stage 4), stdout captured
    pub report: PipelineStep,
    /// Requested report granularity
    pub kind: ReportKind,
    /// Destination of the report text
    pub report_path: PathBuf,
}

impl CoveragePlan {
    /// Assemble the four stages for `filters`
    pub fn new<S: AsRef<str>>(workspace: &Workspace, toolchain: &ToolchainPaths, filters: &[S]) -> Self {
        let binary = workspace.target_binary(COVERAGE_TARGET).display().to_string();
        let raw_profile = workspace.root_file(RAW_PROFILE_FILE).display().to_string();
        let database = workspace.root_file(PROFILE_DATABASE_FILE).display().to_string();
        let instr_profile = format!("-instr-profile={database}");
        let llvm_cov = toolchain.llvm_tool("llvm-cov").display().to_string();

        let build = BuildConfiguration::new(COVERAGE_TARGET).with_flag(
            "CMAKE_C_COMPILER",
            toolchain.llvm_tool("clang").display().to_string(),
        );

        let profile_run =
            PipelineStep::new([binary.clone(), "--no-fork".to_string()]).env("LLVM_PROFILE_FILE", raw_profile.clone());

        let merge = PipelineStep::new([
            toolchain.llvm_tool("llvm-profdata").display().to_string(),
            "merge".to_string(),
            "-sparse".to_string(),
            raw_profile,
            "-o".to_string(),
            database,
        ]);

        let kind = ReportKind::from_filters(filters);
        let report = match &kind {
            ReportKind::Summary => PipelineStep::new([llvm_cov, "report".to_string(), binary, instr_profile]),
            ReportKind::Expansion { filters } => {
                let mut command_line = vec![
                    llvm_cov,
                    "show".to_string(),
                    "-show-expansions".to_string(),
                    "-show-branches=count".to_string(),
                    instr_profile,
                    binary,
                ];
                command_line.extend(filters.iter().cloned());
                PipelineStep::new(command_line)
            }
        }
        .capture_stdout();

        Self {
            build,
            profile_run,
            merge,
            report,
            kind,
            report_path: workspace.root_file(REPORT_FILE),
        }
    }
}

/// Outcome of a successful coverage run
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    /// Report granularity that was produced
    pub kind: ReportKind,
    /// File the report was written to
    pub path: PathBuf,
    /// Report size in bytes
    pub bytes: usize,
}

/// Drives a [`CoveragePlan`] through a [`BuildSession`]
pub struct CoveragePipeline<'s, 'a, R: StepRunner> {
    session: &'s mut BuildSession<'a, R>,
}

impl<'s, 'a, R: StepRunner> CoveragePipeline<'s, 'a, R> {
    /// Create a pipeline borrowing `session`
    pub fn new(session: &'s mut BuildSession<'a, R>) -> Self {
        Self { session }
    }

    /// Run all four stages; any failure aborts the rest
    pub async fn run(&mut self, plan: &CoveragePlan) -> ProcessResult<CoverageReport> {
        self.session.ensure_not_cancelled("instrumented build")?;
        info!("📊 [1/4] Building instrumented target");
        let _ = self.session.compile(&plan.build).await?;

        self.session.ensure_not_cancelled("profile run")?;
        info!("📊 [2/4] Collecting raw profile");
        let _ = self.session.run_step(plan.profile_run.clone()).await?;

        self.session.ensure_not_cancelled("profile merge")?;
        info!("📊 [3/4] Merging profile");
        let _ = self.session.run_step(plan.merge.clone()).await?;

        self.session.ensure_not_cancelled("coverage report")?;
        info!(kind = ?plan.kind, "📊 [4/4] Generating report");
        let outcome = self.session.run_step(plan.report.clone()).await?;

        let text = outcome.stdout.unwrap_or_default();
        std::fs::write(&plan.report_path, &text)?;
        info!(path = %plan.report_path.display(), bytes = text.len(), "Coverage report written");

        Ok(CoverageReport {
            kind: plan.kind.clone(),
            path: plan.report_path.clone(),
            bytes: text.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StdoutMode;

    fn toolchain() -> ToolchainPaths {
        ToolchainPaths {
            build_system: PathBuf::from("/usr/bin/cmake"),
            backend: PathBuf::from("/usr/bin/ninja"),
            compiler_bin_dir: PathBuf::from("/opt/llvm/bin"),
        }
    }

    #[test]
    fn test_summary_plan() {
        let ws = Workspace::default();
        let plan = CoveragePlan::new::<&str>(&ws, &toolchain(), &[]);

        assert_eq!(plan.kind, ReportKind::Summary);
        assert_eq!(
            plan.build.get("CMAKE_C_COMPILER"),
            Some(Some("/opt/llvm/bin/clang"))
        );
        assert_eq!(
            plan.profile_run.env,
            vec![("LLVM_PROFILE_FILE".to_string(), "./coverage.profraw".to_string())]
        );
        assert_eq!(plan.merge.command_line[0], "/opt/llvm/bin/llvm-profdata");
        assert_eq!(plan.report.command_line[1], "report");
        assert_eq!(plan.report.stdout, StdoutMode::Capture);
        assert_eq!(plan.report_path, PathBuf::from("./coverage.txt"));
    }

    #[test]
    fn test_expansion_plan_appends_filters() {
        let ws = Workspace::default();
        let plan = CoveragePlan::new(&ws, &toolchain(), &["src/dai_vm.c"]);

        assert_eq!(
            plan.kind,
            ReportKind::Expansion {
                filters: vec!["src/dai_vm.c".to_string()]
            }
        );
        assert_eq!(plan.report.command_line[1], "show");
        assert!(plan.report.command_line.contains(&"-show-expansions".to_string()));
        assert!(plan.report.command_line.contains(&"-show-branches=count".to_string()));
        assert_eq!(plan.report.command_line.last().map(String::as_str), Some("src/dai_vm.c"));
        assert_eq!(plan.report.stdout, StdoutMode::Capture);
    }
}
