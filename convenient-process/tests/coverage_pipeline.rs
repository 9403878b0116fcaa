//! Coverage pipeline against a scripted runner

mod common;

use common::{ScriptedRunner, toolchain, workspace};
use convenient_process::{BuildSession, CoveragePipeline, CoveragePlan, PipelineExecutor, ProcessError, ReportKind};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_summary_then_expansion_overwrites_report() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let tc = toolchain();

    let runner = ScriptedRunner::new().print_when("llvm-cov", "TOTAL 87.5%\n");
    let mut session = BuildSession::new(&ws, &tc, PipelineExecutor::new(runner.clone()));
    let summary = CoveragePlan::new::<&str>(&ws, &tc, &[]);
    let first = CoveragePipeline::new(&mut session).run(&summary).await.unwrap();

    assert_eq!(first.kind, ReportKind::Summary);
    assert_eq!(std::fs::read_to_string(&first.path).unwrap(), "TOTAL 87.5%\n");
    let report_calls = runner.calls_to("llvm-cov");
    assert_eq!(report_calls.len(), 1);
    assert_eq!(report_calls[0][1], "report");

    let runner = ScriptedRunner::new().print_when("llvm-cov", "src/dai_vm.c:\n  12|  3| x\n");
    let mut session = BuildSession::new(&ws, &tc, PipelineExecutor::new(runner.clone()));
    let expansion = CoveragePlan::new(&ws, &tc, &["src/dai_vm.c"]);
    let second = CoveragePipeline::new(&mut session).run(&expansion).await.unwrap();

    assert_eq!(second.path, first.path);
    assert!(matches!(second.kind, ReportKind::Expansion { .. }));
    assert_eq!(
        std::fs::read_to_string(&second.path).unwrap(),
        "src/dai_vm.c:\n  12|  3| x\n"
    );
    assert_eq!(runner.calls_to("llvm-cov")[0][1], "show");
}

#[tokio::test]
async fn test_stage_order_and_profile_environment() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let tc = toolchain();
    let runner = ScriptedRunner::new();
    let mut session = BuildSession::new(&ws, &tc, PipelineExecutor::new(runner.clone()));

    let plan = CoveragePlan::new::<&str>(&ws, &tc, &[]);
    let _ = CoveragePipeline::new(&mut session).run(&plan).await.unwrap();

    let programs: Vec<String> = runner
        .invocations()
        .into_iter()
        .filter_map(|cmd| cmd.first().cloned())
        .collect();
    assert_eq!(programs.len(), 5);
    assert!(programs[0].ends_with("cmake"));
    assert!(programs[1].ends_with("cmake"));
    assert!(programs[2].ends_with("cmake-build-debug/coverage"));
    assert!(programs[3].ends_with("llvm-profdata"));
    assert!(programs[4].ends_with("llvm-cov"));

    assert!(
        plan.profile_run
            .env
            .iter()
            .any(|(k, v)| k == "LLVM_PROFILE_FILE" && v.ends_with("coverage.profraw"))
    );
}

#[tokio::test]
async fn test_failed_merge_leaves_no_report() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let tc = toolchain();
    let runner = ScriptedRunner::new().exit_when("llvm-profdata", 1);
    let mut session = BuildSession::new(&ws, &tc, PipelineExecutor::new(runner.clone()));

    let plan = CoveragePlan::new::<&str>(&ws, &tc, &[]);
    let err = CoveragePipeline::new(&mut session).run(&plan).await.unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(runner.calls_to("llvm-cov").is_empty());
    assert!(!plan.report_path.exists());
}

#[tokio::test]
async fn test_interrupt_during_profile_run_skips_merge_and_report() {
    let tmp = TempDir::new().unwrap();
    let ws = workspace(&tmp);
    let tc = toolchain();
    let cancel = CancellationToken::new();
    let runner = ScriptedRunner::new().cancel_when("cmake-build-debug/coverage", &cancel);
    let executor = PipelineExecutor::new(runner.clone()).with_cancellation(cancel);
    let mut session = BuildSession::new(&ws, &tc, executor);

    let plan = CoveragePlan::new::<&str>(&ws, &tc, &[]);
    let err = CoveragePipeline::new(&mut session).run(&plan).await.unwrap_err();

    assert!(matches!(err, ProcessError::Interrupted { .. }));
    assert_eq!(err.exit_code(), 130);
    assert!(runner.calls_to("llvm-profdata").is_empty());
    assert!(runner.calls_to("llvm-cov").is_empty());
    assert!(!plan.report_path.exists());
}
