//! Sidecar process launch and termination.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use reducto_bridge::config::SidecarConfig;
use reducto_bridge::host::server::{serve, ServeExit};
use reducto_bridge::host::spawner::{spawn_sidecar, terminate};
use reducto_bridge::AppError;

use super::test_helpers::{snapshot_host, STEP_TIMEOUT};

fn shell(script: &str, startup_timeout_seconds: u64) -> SidecarConfig {
    SidecarConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        startup_timeout_seconds,
    }
}

#[tokio::test]
async fn first_output_is_left_for_the_serve_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut process = spawn_sidecar(&shell("echo hello; sleep 5", 5), dir.path())
        .await
        .expect("spawn");

    let mut line = String::new();
    process.stdout.read_line(&mut line).await.expect("read");
    assert_eq!(line, "hello\n");

    let status = terminate(&mut process.child, Duration::from_secs(2)).await;
    assert!(status.is_some());
}

#[tokio::test]
#[serial_test::serial]
async fn workspace_is_exported_and_secrets_are_not() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("REDUCTO_TEST_SECRET", "hunter2");
    let mut process = spawn_sidecar(
        &shell("echo \"$REDUCTO_WORKSPACE|${REDUCTO_TEST_SECRET:-unset}\"", 5),
        dir.path(),
    )
    .await
    .expect("spawn");
    std::env::remove_var("REDUCTO_TEST_SECRET");

    let mut line = String::new();
    process.stdout.read_line(&mut line).await.expect("read");
    assert_eq!(line.trim_end(), format!("{}|unset", dir.path().display()));
    terminate(&mut process.child, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn silent_exit_is_reported_as_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = spawn_sidecar(&shell("exit 0", 5), dir.path())
        .await
        .expect_err("no output");
    assert!(matches!(err, AppError::Closed(_)));
}

#[tokio::test]
async fn silent_sidecar_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = spawn_sidecar(&shell("sleep 10", 1), dir.path())
        .await
        .expect_err("startup timeout");
    assert!(matches!(err, AppError::Timeout(_)));
}

#[tokio::test]
async fn missing_executable_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SidecarConfig {
        command: "definitely-not-a-real-binary-4711".into(),
        args: Vec::new(),
        startup_timeout_seconds: 1,
    };
    let err = spawn_sidecar(&config, dir.path()).await.expect_err("spawn fails");
    assert!(matches!(err, AppError::Transport(_)));
}

#[tokio::test]
async fn scripted_sidecar_is_served_until_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("replies.jsonl");
    let script = format!(
        r#"printf '%s\n' '{{"jsonrpc":"2.0","id":1,"method":"run_tests"}}' '{{"jsonrpc":"2.0","id":2,"method":"shutdown"}}'; cat > '{}'"#,
        out.display()
    );
    let host = snapshot_host(dir.path());
    let mut process = spawn_sidecar(&shell(&script, 5), dir.path())
        .await
        .expect("spawn");

    let exit = tokio::time::timeout(
        STEP_TIMEOUT,
        serve(Arc::clone(&host), process.stdout, process.stdin, CancellationToken::new()),
    )
    .await
    .expect("serve finishes")
    .expect("serve");
    assert_eq!(exit, ServeExit::ShutdownRequested);

    // serve dropped the sidecar's stdin, so `cat` drains the pipe and exits.
    tokio::time::timeout(STEP_TIMEOUT, process.child.wait())
        .await
        .expect("sidecar exits")
        .expect("wait");
    let replies: Vec<Value> = std::fs::read_to_string(&out)
        .expect("replies")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json"))
        .collect();

    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 1);
    assert_eq!(replies[0]["result"]["success"], true);
    assert_eq!(replies[1]["result"]["status"], "shutdown");
}
