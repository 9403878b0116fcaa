//! Supervised interpreter runs

use super::Context;
use convenient_process::{
    AutoAcknowledge, BuildConfiguration, INTERPRETER_TARGET, MonitorConfig, Operator, ProcessResult, ResourceMonitor,
    RestartPolicy, RunResult, Supervisor, TerminalOperator, TimeSeries,
};
use std::path::Path;
use tracing::info;

fn interpreter_command(ctx: &Context, args: &[String]) -> Vec<String> {
    let mut command_line = vec![ctx.workspace.interpreter_binary().display().to_string()];
    command_line.extend(args.iter().cloned());
    command_line
}

async fn build_interpreter(ctx: &Context) -> ProcessResult<()> {
    let _ = ctx
        .session()
        .compile(&BuildConfiguration::new(INTERPRETER_TARGET))
        .await?;
    Ok(())
}

/// Build the interpreter and run it once or in a restart loop
pub async fn execute(ctx: &Context, forever: Option<&str>, no_confirm: bool, args: &[String]) -> ProcessResult<i32> {
    build_interpreter(ctx).await?;

    let policy = RestartPolicy::from_toggle(forever);
    let operator: Box<dyn Operator> = if no_confirm {
        Box::new(AutoAcknowledge::default())
    } else {
        Box::new(TerminalOperator)
    };
    info!(restart_loop = policy.restart_loop, no_confirm, "Supervising interpreter");

    let mut supervisor = Supervisor::new(interpreter_command(ctx, args), policy, operator, ctx.cancel.clone());
    let result = supervisor.run().await?;

    if !result.success() {
        println!("Exit code: {}", result.exit_code);
    }
    Ok(result.exit_code)
}

/// Build the interpreter, run it once and record its memory usage
pub async fn monitor(ctx: &Context, config: MonitorConfig, output: &Path, args: &[String]) -> ProcessResult<i32> {
    build_interpreter(ctx).await?;

    let command_line = interpreter_command(ctx, args);
    let monitor = ResourceMonitor::system(config, ctx.cancel.clone());
    let report = monitor.supervise(command_line.clone()).await?;

    let series = TimeSeries::from_report(&command_line, &config, &report);
    series.write_json(output)?;
    let (duration, cancelled) = (report.duration, report.cancelled);
    let result = RunResult::from(report);

    println!();
    println!("📈 Memory profile:");
    println!("  Samples:   {}", result.samples.as_ref().map_or(0, Vec::len));
    println!("  Peak RSS:  {:.1} MB", series.peak_resident_mb);
    println!("  Duration:  {:.1}s", duration.as_secs_f64());
    println!("  Written:   {}", output.display());
    if cancelled {
        println!("  ⚠️  Interrupted, child terminated");
    }

    if !result.success() {
        println!("Exit code: {}", result.exit_code);
    }
    Ok(result.exit_code)
}
