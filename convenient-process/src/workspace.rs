//! Project layout and build-system step construction
//!
//! [`Workspace`] knows where the source tree and the build directory live
//! and how to phrase configure/build/clean invocations for CMake with the
//! Ninja generator. [`BuildSession`] couples a workspace and a toolchain with
//! a [`PipelineExecutor`] so higher-level runners can compile targets and
//! run artifacts without repeating that plumbing.

use crate::config::{BuildConfiguration, BuildFlag};
use crate::error::ProcessResult;
use crate::pipeline::{PipelineExecutor, PipelineReport, PipelineStep, StepOutcome, StepRunner};
use crate::toolchain::ToolchainPaths;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the compile-command database emitted by the configure step
pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";

/// Target producing the interpreter
pub const INTERPRETER_TARGET: &str = "dai";

/// Directory layout and build defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Project root (`-S`)
    pub source_dir: PathBuf,
    /// Build tree (`-B`)
    pub build_dir: PathBuf,
    /// `CMAKE_BUILD_TYPE`
    pub build_type: String,
    /// Parallel build jobs (`-j`)
    pub jobs: usize,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(".")
    }
}

impl Workspace {
    /// Workspace rooted at `source_dir` with a `cmake-build-debug` build tree
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        let source_dir = source_dir.into();
        Self {
            build_dir: source_dir.join("cmake-build-debug"),
            source_dir,
            build_type: "Debug".to_string(),
            jobs: 9,
        }
    }

    /// Flags the driver always sets; they win over caller flags
    pub fn fixed_flags(&self, toolchain: &ToolchainPaths) -> Vec<BuildFlag> {
        vec![
            BuildFlag::new("CMAKE_EXPORT_COMPILE_COMMANDS", "1"),
            BuildFlag::new("CMAKE_BUILD_TYPE", self.build_type.clone()),
            BuildFlag::new("CMAKE_MAKE_PROGRAM", toolchain.backend.display().to_string()),
        ]
    }

    /// `cmake <flags> -G Ninja -S <src> -B <build>`
    pub fn configure_step(&self, toolchain: &ToolchainPaths, config: &BuildConfiguration) -> PipelineStep {
        let effective = config.derive(config.target.clone(), self.fixed_flags(toolchain));

        let mut command_line = vec![toolchain.build_system.display().to_string()];
        command_line.extend(effective.to_args());
        command_line.extend([
            "-G".to_string(),
            "Ninja".to_string(),
            "-S".to_string(),
            self.source_dir.display().to_string(),
            "-B".to_string(),
            self.build_dir.display().to_string(),
        ]);
        PipelineStep::new(command_line)
    }

    /// `cmake --build <build> --target <target> -j <jobs>`
    pub fn build_step(&self, toolchain: &ToolchainPaths, target: &str) -> PipelineStep {
        PipelineStep::new([
            toolchain.build_system.display().to_string(),
            "--build".to_string(),
            self.build_dir.display().to_string(),
            "--target".to_string(),
            target.to_string(),
            "-j".to_string(),
            self.jobs.to_string(),
        ])
    }

    /// `cmake --build <build> --target clean`
    pub fn clean_step(&self, toolchain: &ToolchainPaths) -> PipelineStep {
        PipelineStep::new([
            toolchain.build_system.display().to_string(),
            "--build".to_string(),
            self.build_dir.display().to_string(),
            "--target".to_string(),
            "clean".to_string(),
        ])
    }

    /// Configure followed by build
    pub fn compile_steps(&self, toolchain: &ToolchainPaths, config: &BuildConfiguration) -> Vec<PipelineStep> {
        vec![
            self.configure_step(toolchain, config),
            self.build_step(toolchain, &config.target),
        ]
    }

    /// Binary produced by a single-config target (e.g. `test`, `coverage`)
    pub fn target_binary(&self, target: &str) -> PathBuf {
        self.build_dir.join(target)
    }

    /// The interpreter binary, which lands in a per-config subdirectory
    pub fn interpreter_binary(&self) -> PathBuf {
        self.build_dir.join(&self.build_type).join(INTERPRETER_TARGET)
    }

    /// Path inside the project root
    pub fn root_file(&self, name: &str) -> PathBuf {
        self.source_dir.join(name)
    }

    /// Copy the compile-command database to the project root for editor tooling
    pub fn copy_compile_commands(&self) -> ProcessResult<PathBuf> {
        let from = self.build_dir.join(COMPILE_COMMANDS_FILE);
        let to = self.root_file(COMPILE_COMMANDS_FILE);
        let _ = std::fs::copy(&from, &to)?;
        debug!(from = %from.display(), to = %to.display(), "Copied compile commands");
        Ok(to)
    }
}

/// Workspace + toolchain + executor, shared by the higher-level runners
#[derive(Debug)]
pub struct BuildSession<'a, R: StepRunner> {
    /// Layout used for every step
    pub workspace: &'a Workspace,
    /// Resolved tools
    pub toolchain: &'a ToolchainPaths,
    executor: PipelineExecutor<R>,
}

impl<'a, R: StepRunner> BuildSession<'a, R> {
    /// Create a session
    pub fn new(workspace: &'a Workspace, toolchain: &'a ToolchainPaths, executor: PipelineExecutor<R>) -> Self {
        Self {
            workspace,
            toolchain,
            executor,
        }
    }

    /// Underlying executor
    pub fn executor(&self) -> &PipelineExecutor<R> {
        &self.executor
    }

    /// Fail if the operator interrupted the run before `next`
    pub fn ensure_not_cancelled(&self, next: &str) -> ProcessResult<()> {
        self.executor.check_cancelled(next)
    }

    /// Configure and build `config.target`, then refresh the compile database
    pub async fn compile(&mut self, config: &BuildConfiguration) -> ProcessResult<PipelineReport> {
        info!(target = %config.target, flags = config.len(), "🔨 Compiling");
        let steps = self.workspace.compile_steps(self.toolchain, config);
        let report = self.executor.execute(&steps).await?;
        let _ = self.workspace.copy_compile_commands()?;
        Ok(report)
    }

    /// Clean the build tree
    pub async fn clean(&mut self) -> ProcessResult<StepOutcome> {
        let step = self.workspace.clean_step(self.toolchain);
        self.executor.execute_one(step).await
    }

    /// Run a built artifact with arguments, inheriting the terminal
    pub async fn run_artifact<S: AsRef<str>>(&mut self, binary: &Path, args: &[S]) -> ProcessResult<StepOutcome> {
        let mut command_line = vec![binary.display().to_string()];
        command_line.extend(args.iter().map(|a| a.as_ref().to_string()));
        self.executor.execute_one(PipelineStep::new(command_line)).await
    }

    /// Run an arbitrary step
    pub async fn run_step(&mut self, step: PipelineStep) -> ProcessResult<StepOutcome> {
        self.executor.execute_one(step).await
    }

    /// Run an arbitrary pipeline
    pub async fn run_pipeline(&mut self, steps: &[PipelineStep]) -> ProcessResult<PipelineReport> {
        self.executor.execute(steps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> ToolchainPaths {
        ToolchainPaths {
            build_system: PathBuf::from("/usr/bin/cmake"),
            backend: PathBuf::from("/usr/bin/ninja"),
            compiler_bin_dir: PathBuf::from("/usr/bin"),
        }
    }

    #[test]
    fn test_configure_step_layout() {
        let ws = Workspace::default();
        let config = BuildConfiguration::new("test").with_flag("DAI_DEBUG_GC", "OFF");
        let step = ws.configure_step(&toolchain(), &config);

        assert_eq!(
            step.command_line,
            vec![
                "/usr/bin/cmake",
                "-DCMAKE_BUILD_TYPE=Debug",
                "-DCMAKE_EXPORT_COMPILE_COMMANDS=1",
                "-DCMAKE_MAKE_PROGRAM=/usr/bin/ninja",
                "-DDAI_DEBUG_GC=OFF",
                "-G",
                "Ninja",
                "-S",
                ".",
                "-B",
                "./cmake-build-debug",
            ]
        );
    }

    #[test]
    fn test_fixed_flags_override_caller() {
        let ws = Workspace::default();
        let config = BuildConfiguration::new("dai").with_flag("CMAKE_BUILD_TYPE", "Release");
        let step = ws.configure_step(&toolchain(), &config);

        assert!(step.command_line.contains(&"-DCMAKE_BUILD_TYPE=Debug".to_string()));
        assert!(!step.command_line.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));
    }

    #[test]
    fn test_build_step_and_artifacts() {
        let ws = Workspace::new("/src/dai");
        let step = ws.build_step(&toolchain(), "santest");

        assert_eq!(
            step.command_line,
            vec![
                "/usr/bin/cmake",
                "--build",
                "/src/dai/cmake-build-debug",
                "--target",
                "santest",
                "-j",
                "9"
            ]
        );
        assert_eq!(ws.target_binary("test"), PathBuf::from("/src/dai/cmake-build-debug/test"));
        assert_eq!(
            ws.interpreter_binary(),
            PathBuf::from("/src/dai/cmake-build-debug/Debug/dai")
        );
    }

    #[test]
    fn test_copy_compile_commands() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        std::fs::create_dir_all(&ws.build_dir).unwrap();
        std::fs::write(ws.build_dir.join(COMPILE_COMMANDS_FILE), "[]").unwrap();

        let copied = ws.copy_compile_commands().unwrap();
        assert_eq!(copied, tmp.path().join(COMPILE_COMMANDS_FILE));
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "[]");
    }

    #[test]
    fn test_copy_compile_commands_missing_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        assert!(ws.copy_compile_commands().is_err());
    }
}
