//! Taktgeber command-line interface
//!
//! One mode per invocation:
//! - `build`, `clean`: plain build-system pipelines
//! - `test`, `mem`: the test suite (all variants, or under valgrind)
//! - `coverage`: LLVM source-based coverage report
//! - `run`, `monitor`: supervised interpreter runs
//! - `repl`, `ast`, `dis`, `benchmark`, `memrepl`: interpreter front-ends

use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};
use convenient_process::{
    BuildSession, PipelineExecutor, ProcessResult, SystemRunner, ToolchainOverrides, ToolchainPaths, Workspace,
    listen_for_interrupts,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod build;
pub mod coverage;
pub mod run;
pub mod tools;

/// Taktgeber - build, test, coverage and run driver for the dai interpreter
#[derive(Parser, Debug)]
#[command(name = "taktgeber")]
#[command(about = "Build, test, coverage and run driver for the dai interpreter")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Project root
    #[arg(long, default_value = ".")]
    pub source_dir: PathBuf,

    /// Build tree (defaults to <source-dir>/cmake-build-debug)
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Parallel build jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Build-system executable
    #[arg(long, env = "CUSTOM_CMAKE_COMMAND")]
    pub cmake: Option<PathBuf>,

    /// Build backend executable
    #[arg(long, env = "CUSTOM_NINJA_COMMAND")]
    pub ninja: Option<PathBuf>,

    /// Directory holding clang, llvm-profdata and llvm-cov
    #[arg(long, env = "DAI_LLVM_BINPATH")]
    pub llvm_bin_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure and build a target (default `dai`)
    Build {
        /// Optional target followed by -DKEY=VALUE flags
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Clean the build tree
    Clean,

    /// Build and run the test suite under every variant
    Test {
        /// -DKEY=VALUE flags and test-binary arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Produce an LLVM coverage report in coverage.txt
    Coverage {
        /// File or function filters; none yields a summary
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },

    /// 🔁 Build and run the interpreter, optionally in a restart loop
    Run {
        /// Restart after every exit; any value but 0 enables the loop
        #[arg(long, env = "DAI_RUN_FOREVER", num_args = 0..=1, require_equals = true, default_missing_value = "1")]
        forever: Option<String>,

        /// Restart after a crash without waiting for Enter
        #[arg(long, env = "DAI_RUN_NO_CONFIRM", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
        no_confirm: bool,

        /// Interpreter arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// 📈 Build and run the interpreter once while sampling its memory
    Monitor {
        /// Seconds between samples
        #[arg(long, default_value = "1", value_parser = parse_seconds)]
        interval: Duration,

        /// Seconds between liveness checks
        #[arg(long, default_value = "1", value_parser = parse_seconds)]
        tick: Duration,

        /// Seconds between SIGTERM and SIGKILL on interrupt
        #[arg(long, default_value = "5", value_parser = parse_seconds)]
        grace: Duration,

        /// Time series destination
        #[arg(short, long, default_value = convenient_process::monitor::DEFAULT_OUTPUT_FILE)]
        output: PathBuf,

        /// Interpreter arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Build and start the interactive interpreter
    Repl,

    /// Print the syntax tree of a script
    Ast {
        /// Interpreter arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Disassemble a script
    Dis {
        /// Interpreter arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// ⏱️  Run the interpreter under /usr/bin/time -v
    Benchmark {
        /// Interpreter arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run the test suite under valgrind memcheck
    Mem,

    /// Run the standalone repl under valgrind memcheck
    Memrepl,
}

/// Parse a non-negative number of seconds
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{value}: {e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("{value}: {e}"))
}

/// Everything a command needs, resolved once in `main`
pub struct Context {
    /// Resolved tools
    pub toolchain: ToolchainPaths,
    /// Directory layout
    pub workspace: Workspace,
    /// Sticky operator interrupt
    pub cancel: CancellationToken,
}

impl Context {
    /// Resolve the toolchain and layout from the command line
    pub fn from_cli(cli: &Cli) -> ProcessResult<Self> {
        let toolchain = ToolchainPaths::locate(ToolchainOverrides {
            build_system: cli.cmake.clone(),
            backend: cli.ninja.clone(),
            compiler_bin_dir: cli.llvm_bin_dir.clone(),
        })?;

        let mut workspace = Workspace::new(&cli.source_dir);
        if let Some(build_dir) = &cli.build_dir {
            workspace.build_dir.clone_from(build_dir);
        }
        if let Some(jobs) = cli.jobs {
            workspace.jobs = jobs;
        }
        debug!(?workspace, "Workspace");

        Ok(Self {
            toolchain,
            workspace,
            cancel: CancellationToken::new(),
        })
    }

    /// Fresh build session spawning real processes
    pub fn session(&self) -> BuildSession<'_, SystemRunner> {
        let executor = PipelineExecutor::system().with_cancellation(self.cancel.clone());
        BuildSession::new(&self.workspace, &self.toolchain, executor)
    }
}

/// Run the selected mode and return the process exit code
pub async fn dispatch(cli: Cli) -> ProcessResult<i32> {
    let ctx = Context::from_cli(&cli)?;
    let _listener = listen_for_interrupts(ctx.cancel.clone())?;

    match cli.command {
        Commands::Build { args } => build::execute(&ctx, &args).await,
        Commands::Clean => build::clean(&ctx).await,
        Commands::Test { args } => test::execute(&ctx, &args).await,
        Commands::Coverage { filters } => coverage::execute(&ctx, &filters).await,
        Commands::Run {
            forever,
            no_confirm,
            args,
        } => run::execute(&ctx, forever.as_deref(), no_confirm, &args).await,
        Commands::Monitor {
            interval,
            tick,
            grace,
            output,
            args,
        } => {
            let config = convenient_process::MonitorConfig {
                interval,
                tick,
                grace_period: grace,
            };
            run::monitor(&ctx, config, &output, &args).await
        }
        Commands::Repl => tools::execute(&ctx, tools::Tool::Repl, &[]).await,
        Commands::Ast { args } => tools::execute(&ctx, tools::Tool::Ast, &args).await,
        Commands::Dis { args } => tools::execute(&ctx, tools::Tool::Dis, &args).await,
        Commands::Benchmark { args } => tools::execute(&ctx, tools::Tool::Benchmark, &args).await,
        Commands::Mem => tools::execute(&ctx, tools::Tool::Mem, &[]).await,
        Commands::Memrepl => tools::execute(&ctx, tools::Tool::MemRepl, &[]).await,
    }
}
