//! Plain build and clean commands

use super::Context;
use convenient_process::{BuildConfiguration, INTERPRETER_TARGET, ProcessResult, split_arguments};
use tracing::warn;

/// Split `build` arguments into a target and its configuration
pub fn configuration(args: &[String]) -> BuildConfiguration {
    let (flags, positional) = split_arguments(args);
    let target = positional.first().map_or(INTERPRETER_TARGET, String::as_str);
    if positional.len() > 1 {
        warn!(ignored = ?&positional[1..], "Only one target is built per invocation");
    }

    let mut config = BuildConfiguration::new(target);
    config.merge(flags);
    config
}

/// Configure and build one target
pub async fn execute(ctx: &Context, args: &[String]) -> ProcessResult<i32> {
    let config = configuration(args);
    println!("🔨 Building {}", config.target);

    let report = ctx.session().compile(&config).await?;

    println!(
        "✅ {} built in {:.1}s",
        config.target,
        report.duration().as_secs_f64()
    );
    Ok(0)
}

/// Clean the build tree
pub async fn clean(ctx: &Context) -> ProcessResult<i32> {
    println!("🧹 Cleaning {}", ctx.workspace.build_dir.display());
    let _ = ctx.session().clean().await?;
    println!("✅ Build tree cleaned");
    Ok(0)
}
