//! Interpreter front-ends: build a target, then run its binary once

use super::Context;
use convenient_process::variants::TEST_TARGET;
use convenient_process::{BuildConfiguration, INTERPRETER_TARGET, PipelineStep, ProcessResult, Workspace};

const REPL_TARGET: &str = "repl";

const MEMCHECK: [&str; 5] = [
    "valgrind",
    "--tool=memcheck",
    "--leak-check=full",
    "--show-leak-kinds=all",
    "--trace-children=yes",
];

/// Front-end selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// Interactive interpreter
    Repl,
    /// `dai ast`
    Ast,
    /// `dai dis`
    Dis,
    /// Interpreter under `/usr/bin/time -v`
    Benchmark,
    /// Test suite under memcheck
    Mem,
    /// Standalone repl under memcheck
    MemRepl,
}

impl Tool {
    /// Target that must be built first
    pub fn target(self) -> &'static str {
        match self {
            Tool::Mem => TEST_TARGET,
            Tool::MemRepl => REPL_TARGET,
            Tool::Repl | Tool::Ast | Tool::Dis | Tool::Benchmark => INTERPRETER_TARGET,
        }
    }

    /// Full command line for the run
    pub fn command_line(self, workspace: &Workspace, args: &[String]) -> Vec<String> {
        let interpreter = workspace.interpreter_binary().display().to_string();
        let mut command_line: Vec<String> = match self {
            Tool::Repl => vec![interpreter],
            Tool::Ast => vec![interpreter, "ast".to_string()],
            Tool::Dis => vec![interpreter, "dis".to_string()],
            Tool::Benchmark => vec!["/usr/bin/time".to_string(), "-v".to_string(), interpreter],
            Tool::Mem => MEMCHECK
                .iter()
                .map(ToString::to_string)
                .chain([
                    workspace.target_binary(TEST_TARGET).display().to_string(),
                    "--no-fork".to_string(),
                ])
                .collect(),
            Tool::MemRepl => MEMCHECK
                .iter()
                .map(ToString::to_string)
                .chain([workspace.target_binary(REPL_TARGET).display().to_string()])
                .collect(),
        };
        command_line.extend(args.iter().cloned());
        command_line
    }
}

/// Build the tool's target and run it with inherited streams
pub async fn execute(ctx: &Context, tool: Tool, args: &[String]) -> ProcessResult<i32> {
    let mut session = ctx.session();
    let _ = session.compile(&BuildConfiguration::new(tool.target())).await?;
    let _ = session
        .run_step(PipelineStep::new(tool.command_line(&ctx.workspace, args)))
        .await?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_front_ends() {
        let ws = Workspace::new("/src/dai");
        let args = vec!["fib.dai".to_string()];

        assert_eq!(
            Tool::Ast.command_line(&ws, &args),
            vec!["/src/dai/cmake-build-debug/Debug/dai", "ast", "fib.dai"]
        );
        assert_eq!(
            Tool::Benchmark.command_line(&ws, &args)[..3],
            ["/usr/bin/time", "-v", "/src/dai/cmake-build-debug/Debug/dai"]
        );
        assert_eq!(Tool::Repl.target(), "dai");
    }

    #[test]
    fn test_memcheck_runs() {
        let ws = Workspace::new("/src/dai");

        let mem = Tool::Mem.command_line(&ws, &[]);
        assert_eq!(mem[0], "valgrind");
        assert_eq!(
            mem[mem.len() - 2..],
            ["/src/dai/cmake-build-debug/test", "--no-fork"]
        );
        assert_eq!(Tool::Mem.target(), "test");

        let repl = Tool::MemRepl.command_line(&ws, &[]);
        assert_eq!(repl.last().map(String::as_str), Some("/src/dai/cmake-build-debug/repl"));
        assert_eq!(Tool::MemRepl.target(), "repl");
    }
}
