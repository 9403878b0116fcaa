//! Taktgeber - build, test, coverage and run driver for the dai interpreter
//!
//! Orchestrates:
//! 1. Toolchain discovery (cmake, ninja, LLVM tools)
//! 2. Configure + build pipelines with `-D` flag merging
//! 3. Test runs across the normal, GC-debug and sanitizer variants
//! 4. LLVM source-based coverage reports
//! 5. Supervised interpreter runs with restart loop and memory sampling

mod commands;

use clap::Parser;
use commands::Cli;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "taktgeber=debug,convenient_process=debug"
    } else {
        "taktgeber=info,convenient_process=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match commands::dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "taktgeber failed");
            eprintln!("❌ {err}");
            err.exit_code()
        }
    };

    std::process::exit(code);
}
