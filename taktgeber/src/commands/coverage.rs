//! Coverage report command

use super::Context;
use convenient_process::{CoveragePipeline, CoveragePlan, ProcessResult, ReportKind};

/// Build, profile, merge and report
pub async fn execute(ctx: &Context, filters: &[String]) -> ProcessResult<i32> {
    let plan = CoveragePlan::new(&ctx.workspace, &ctx.toolchain, filters);
    let mut session = ctx.session();

    let report = CoveragePipeline::new(&mut session).run(&plan).await?;

    let kind = match report.kind {
        ReportKind::Summary => "summary",
        ReportKind::Expansion { .. } => "expansion",
    };
    println!("📊 Coverage {kind} written to {} ({} bytes)", report.path.display(), report.bytes);
    Ok(0)
}
