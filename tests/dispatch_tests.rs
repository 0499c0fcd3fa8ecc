
use tempfile::TempDir;

use task_harness::*;
use training_dispatch::config::DispatchConfig;
use training_dispatch::worker::{Dispatcher, StreamTag};
use training_dispatch::{Job, TaskFailure, TaskSpec};

#[test]
fn test_invocation_contains_fixed_flags_in_order() {
    let dispatcher = Dispatcher::new(DispatchConfig::default().with_memory_limit_mb(2048));
    let job = Job::new("j1", "/tmp/j1");
    let spec = TaskSpec::new("generate").with_parameter("locale", "en-US");

    let invocation = dispatcher.invocation(&job, &spec);
    let args: Vec<String> = invocation
        .args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert_eq!(
        &args[..8],
        &[
            "--max_old_space_size=2048",
            "run-training-task",
            "--task-name",
            "generate",
            "--job-id",
            "j1",
            "--job-directory",
            "/tmp/j1",
        ]
    );
    assert_eq!(&args[8..], &["--locale", "en-US"]);
    assert_eq!(
        invocation.render(),
        "node '--max_old_space_size=2048' 'run-training-task' '--task-name' 'generate' \
         '--job-id' 'j1' '--job-directory' '/tmp/j1' '--locale' 'en-US'"
    );
}

#[tokio::test]
async fn test_child_receives_invocation_arguments() {
    let (dispatcher, sink) = sh_dispatcher("printf '%s\\n' \"$@\"");
    let job = Job::new("args", "/tmp/args-job");
    let spec = TaskSpec::new("evaluate").with_parameter("split", "dev");

    let runner = dispatcher.exec_task(&job, &spec);
    assert!(wait_and_drain(&runner).await.is_ok());

    assert_eq!(
        sink.lines_for("args", StreamTag::Stdout),
        vec![
            "--max_old_space_size=24000",
            "run-training-task",
            "--task-name",
            "evaluate",
            "--job-id",
            "args",
            "--job-directory",
            "/tmp/args-job",
            "--split",
            "dev",
        ]
    );
}

#[tokio::test]
async fn test_task_writes_into_job_directory() {
    let dir = TempDir::new().unwrap();
    let (dispatcher, _sink) = sh_dispatcher("echo \"$4\" > \"$8/task-name\"");
    let job = Job::new("workdir", dir.path());

    let runner = dispatcher.exec_task(&job, &TaskSpec::new("prepare-training-set"));
    assert!(wait(&runner).await.is_ok());

    let written = std::fs::read_to_string(dir.path().join("task-name")).unwrap();
    assert_eq!(written.trim(), "prepare-training-set");
}

#[tokio::test]
async fn test_stdin_is_closed() {
    // `cat` sees end of input immediately instead of blocking.
    let (dispatcher, sink) = sh_dispatcher("cat; echo finished");
    let runner = dispatcher.exec_task(&test_job("stdin"), &test_spec());

    assert!(wait_and_drain(&runner).await.is_ok());
    assert_eq!(sink.lines_for("stdin", StreamTag::Stdout), vec!["finished"]);
}

#[tokio::test]
async fn test_spawn_failure_surfaces_through_wait() {
    let config = DispatchConfig::new("/nonexistent/bin/trainer-12345");
    let (dispatcher, sink) = dispatcher_for(config);

    // exec_task itself never fails.
    let runner = dispatcher.exec_task(&test_job("missing"), &test_spec());

    assert_eq!(runner.job_id(), "missing");
    assert!(runner.pid().is_none());
    match wait(&runner).await {
        Err(TaskFailure::Spawn(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected Spawn, got {:?}", other),
    }

    // Nothing to kill, nothing to drain.
    runner.kill();
    runner.drain_output().await;
    assert!(matches!(wait(&runner).await, Err(TaskFailure::Spawn(_))));
    assert!(sink.all().is_empty());
}

#[tokio::test]
async fn test_spawn_failure_for_non_executable_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("not-executable");
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();

    let (dispatcher, _sink) = dispatcher_for(DispatchConfig::new(&path));
    let runner = dispatcher.exec_task(&test_job("noexec"), &test_spec());

    assert!(matches!(wait(&runner).await, Err(TaskFailure::Spawn(_))));
}
