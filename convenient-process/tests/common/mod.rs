//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use convenient_process::pipeline::{PipelineStep, StdoutMode, StepOutcome, StepRunner};
use convenient_process::workspace::COMPILE_COMMANDS_FILE;
use convenient_process::{ProcessResult, ToolchainPaths, Workspace};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct Rule {
    program_suffix: String,
    exit_code: i32,
    stdout: Vec<u8>,
}

/// Records every command line and answers with scripted exit codes
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    invocations: Arc<Mutex<Vec<Vec<String>>>>,
    rules: Vec<Rule>,
    interrupts: Vec<(String, CancellationToken)>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps whose program ends with `suffix` exit with `exit_code`
    pub fn exit_when(self, suffix: &str, exit_code: i32) -> Self {
        self.rule(suffix, exit_code, Vec::new())
    }

    /// Steps whose program ends with `suffix` print `stdout` and succeed
    pub fn print_when(self, suffix: &str, stdout: &str) -> Self {
        self.rule(suffix, 0, stdout.as_bytes().to_vec())
    }

    /// Cancel `token` while a step whose program ends with `suffix` runs
    pub fn cancel_when(mut self, suffix: &str, token: &CancellationToken) -> Self {
        self.interrupts.push((suffix.to_string(), token.clone()));
        self
    }

    fn rule(mut self, suffix: &str, exit_code: i32, stdout: Vec<u8>) -> Self {
        self.rules.push(Rule {
            program_suffix: suffix.to_string(),
            exit_code,
            stdout,
        });
        self
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().unwrap().clone()
    }

    /// Command lines whose program ends with `suffix`
    pub fn calls_to(&self, suffix: &str) -> Vec<Vec<String>> {
        self.invocations()
            .into_iter()
            .filter(|cmd| cmd.first().is_some_and(|p| p.ends_with(suffix)))
            .collect()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&mut self, step: &PipelineStep) -> ProcessResult<StepOutcome> {
        self.invocations.lock().unwrap().push(step.command_line.clone());

        for (suffix, token) in &self.interrupts {
            if step.program().ends_with(suffix) {
                token.cancel();
            }
        }

        let rule = self.rules.iter().find(|r| step.program().ends_with(&r.program_suffix));
        let exit_code = rule.map_or(0, |r| r.exit_code);
        let stdout = match step.stdout {
            StdoutMode::Capture => Some(rule.map(|r| r.stdout.clone()).unwrap_or_default()),
            StdoutMode::Inherit => None,
        };

        Ok(StepOutcome {
            exit_code,
            stdout,
            duration: Duration::from_millis(1),
        })
    }
}

/// Workspace in a temp dir with a compile database already in the build tree
pub fn workspace(tmp: &TempDir) -> Workspace {
    let ws = Workspace::new(tmp.path());
    std::fs::create_dir_all(&ws.build_dir).unwrap();
    std::fs::write(ws.build_dir.join(COMPILE_COMMANDS_FILE), "[]").unwrap();
    ws
}

pub fn toolchain() -> ToolchainPaths {
    ToolchainPaths {
        build_system: PathBuf::from("/usr/bin/cmake"),
        backend: PathBuf::from("/usr/bin/ninja"),
        compiler_bin_dir: PathBuf::from("/opt/llvm/bin"),
    }
}
