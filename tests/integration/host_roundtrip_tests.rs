//! Client against a real host serving a temporary workspace.

use std::fs;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

use reducto_bridge::diff::{make_unified_diff, sha256_hex};
use reducto_bridge::host::server::{serve, ServeExit};
use reducto_bridge::host::HostServer;
use reducto_bridge::rpc::params::{ApplyDiffParams, ApplyDiffSafeParams, ListFilesParams};
use reducto_bridge::rpc::{codes, Response};
use reducto_bridge::workflow::checkpoint::SnapshotCheckpoints;
use reducto_bridge::workflow::FinalState;
use reducto_bridge::AppError;

use super::test_helpers::{host_pair, snapshot_host, MarkerRunner, STEP_TIMEOUT};

fn rpc_code<T: std::fmt::Debug>(result: Result<T, AppError>) -> i64 {
    match result {
        Err(AppError::Rpc { code, .. }) => code,
        other => panic!("expected an rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn initialize_lists_served_methods() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let result = client
        .initialize(&dir.path().display().to_string())
        .await
        .expect("initialize");

    assert_eq!(result.status, "initialized");
    assert!(result.tools.iter().any(|t| t == "apply_diff_safe"));
    assert!(!result.tools.iter().any(|t| t == "get_symbols"));
}

#[tokio::test]
async fn safe_apply_without_tests_commits_the_change() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("app.py"), "x = 1\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let outcome = client
        .apply_diff_safe(ApplyDiffSafeParams {
            path: "app.py".into(),
            diff: make_unified_diff("app.py", "x = 1\n", "x = 2\n"),
            run_tests: false,
            session_id: None,
        })
        .await
        .expect("apply_diff_safe");

    assert!(outcome.success);
    assert!(!outcome.tests_run);
    assert!(!outcome.rolled_back);
    assert!(outcome.checkpoint.is_some());
    assert_eq!(outcome.final_state(), FinalState::Committed);
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "x = 2\n");
}

#[tokio::test]
async fn failing_tests_roll_the_change_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("app.py"), "x = 1\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let outcome = client
        .apply_diff_safe(ApplyDiffSafeParams {
            path: "app.py".into(),
            diff: make_unified_diff("app.py", "x = 1\n", "x = BROKEN\n"),
            run_tests: true,
            session_id: Some("s-1".into()),
        })
        .await
        .expect("apply_diff_safe");

    assert!(!outcome.success);
    assert!(outcome.tests_run);
    assert!(!outcome.tests_passed);
    assert!(outcome.rolled_back);
    assert_eq!(outcome.final_state(), FinalState::RolledBack);
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("FAILED")));
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "x = 1\n");
}

#[tokio::test]
async fn read_file_returns_content_and_hash() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("pkg")).expect("mkdir");
    fs::write(dir.path().join("pkg/mod.py"), "def f():\n    pass\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let file = client.read_file("pkg/mod.py").await.expect("read_file");
    assert_eq!(file.content, "def f():\n    pass\n");
    assert_eq!(file.hash, sha256_hex(b"def f():\n    pass\n"));
}

#[tokio::test]
async fn host_error_codes_reach_the_client() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    assert_eq!(rpc_code(client.read_file("missing.py").await), codes::FILE_NOT_FOUND);
    assert_eq!(rpc_code(client.read_file("../escape.py").await), codes::PATH_VIOLATION);
    assert_eq!(rpc_code(client.get_symbols("a.py", None).await), codes::METHOD_NOT_FOUND);
    assert_eq!(rpc_code(client.git_rollback().await), codes::CHECKPOINT_FAILURE);
    assert_eq!(
        rpc_code(client.call("no_such_method", json!({})).await),
        codes::METHOD_NOT_FOUND
    );
    assert_eq!(
        rpc_code(client.call("read_file", json!({ "path": 7 })).await),
        codes::INVALID_PARAMS
    );
}

#[tokio::test]
async fn conflicting_plain_diff_is_a_patch_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("app.py"), "y = 5\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let result = client
        .apply_diff(ApplyDiffParams {
            path: "app.py".into(),
            diff: make_unified_diff("app.py", "x = 1\n", "x = 2\n"),
            session_id: None,
        })
        .await;

    assert_eq!(rpc_code(result), codes::PATCH_FAILURE);
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "y = 5\n");
}

#[tokio::test]
async fn list_files_filters_and_hashes() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("node_modules/lib")).expect("mkdir");
    fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    fs::write(dir.path().join("src/a.py"), "a").expect("write");
    fs::write(dir.path().join("src/b.txt"), "b").expect("write");
    fs::write(dir.path().join("node_modules/lib/c.py"), "c").expect("write");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let listing = client
        .list_files(ListFilesParams {
            include_patterns: vec!["**/*.py".into()],
            exclude_patterns: vec!["node_modules".into()],
        })
        .await
        .expect("list_files");

    assert_eq!(listing.total, 1);
    assert_eq!(listing.files[0].path, "src/a.py");
    assert_eq!(listing.files[0].hash.as_deref(), Some(sha256_hex(b"a").as_str()));
    assert_eq!(listing.files[0].size, Some(1));
}

#[tokio::test]
async fn checkpoint_then_rollback_restores_the_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("app.py"), "x = 1\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let checkpoint = client.git_checkpoint("before manual edit").await.expect("checkpoint");
    assert!(checkpoint.success);
    assert!(!checkpoint.commit_hash.is_empty());

    fs::write(dir.path().join("app.py"), "x = 42\n").expect("edit");
    fs::write(dir.path().join("extra.py"), "junk\n").expect("create");

    let rollback = client.git_rollback().await.expect("rollback");
    assert!(rollback.success);
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "x = 1\n");
    assert!(!dir.path().join("extra.py").exists());
}

#[tokio::test]
async fn empty_checkpoint_message_uses_the_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let reply = client
        .call("git_checkpoint", json!({ "message": "" }))
        .await
        .expect("checkpoint with blank message");
    assert_eq!(reply["success"], true);

    let checkpoint = client.git_checkpoint("").await.expect("typed checkpoint");
    assert!(checkpoint.success);
}

#[tokio::test]
async fn run_tests_reports_the_suite_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("ok.py"), "fine\n").expect("seed");
    let (client, _host) = host_pair(snapshot_host(dir.path()));

    let report = client.run_tests().await.expect("run_tests");
    assert!(report.success);
    assert_eq!(report.output, "1 passed");
}

#[tokio::test]
async fn shutdown_replies_then_stops_serving() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (client, host) = host_pair(snapshot_host(dir.path()));

    let reply = client.call("shutdown", json!({})).await.expect("shutdown");
    assert_eq!(reply, json!({ "status": "shutdown" }));

    let exit = tokio::time::timeout(STEP_TIMEOUT, host.serve)
        .await
        .expect("serve loop ends")
        .expect("join")
        .expect("serve");
    assert_eq!(exit, ServeExit::ShutdownRequested);
}

#[tokio::test]
async fn cancellation_stops_the_serve_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_client, host) = host_pair(snapshot_host(dir.path()));

    host.cancel.cancel();
    let exit = tokio::time::timeout(STEP_TIMEOUT, host.serve)
        .await
        .expect("serve loop ends")
        .expect("join")
        .expect("serve");
    assert_eq!(exit, ServeExit::Cancelled);
}

fn bare_host(root: &std::path::Path) -> HostServer {
    HostServer::new(
        root,
        Arc::new(SnapshotCheckpoints::new(root)),
        Arc::new(MarkerRunner::new(root)),
    )
}

fn error_of(response: Option<Response>) -> (Value, i64) {
    let response = response.expect("a response");
    let error = response.error.expect("an error frame");
    (response.id, error.code)
}

#[tokio::test]
async fn malformed_lines_get_protocol_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = bare_host(dir.path());

    let reply = host.handle_line("{not json").await;
    assert_eq!(error_of(reply.response), (Value::Null, codes::PARSE_ERROR));

    let reply = host
        .handle_line(r#"{"jsonrpc":"1.0","id":4,"method":"run_tests"}"#)
        .await;
    assert_eq!(error_of(reply.response), (json!(4), codes::INVALID_REQUEST));

    let reply = host.handle_line(r#"{"jsonrpc":"2.0","id":5,"method":12}"#).await;
    assert_eq!(error_of(reply.response), (json!(5), codes::INVALID_REQUEST));

    let reply = host
        .handle_line(r#"{"jsonrpc":"2.0","id":6,"method":"frobnicate"}"#)
        .await;
    assert_eq!(error_of(reply.response), (json!(6), codes::METHOD_NOT_FOUND));
}

#[tokio::test]
async fn blank_lines_and_notifications_get_no_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = bare_host(dir.path());

    assert!(host.handle_line("   ").await.response.is_none());

    let reply = host
        .handle_line(r#"{"jsonrpc":"2.0","method":"shutdown"}"#)
        .await;
    assert!(reply.response.is_none());
    assert!(!reply.shutdown);
}

#[tokio::test]
async fn string_ids_are_echoed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = bare_host(dir.path());

    let reply = host
        .handle_line(r#"{"jsonrpc":"2.0","id":"req-1","method":"shutdown"}"#)
        .await;
    assert!(reply.shutdown);
    let response = reply.response.expect("response");
    assert_eq!(response.id, json!("req-1"));
    assert_eq!(response.result, Some(json!({ "status": "shutdown" })));
}

#[tokio::test]
async fn invalid_utf8_line_gets_a_parse_error_and_serving_continues() {
    use tokio::io::{AsyncWriteExt, BufReader};

    let dir = tempfile::tempdir().expect("tempdir");
    let (peer_io, host_io) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_io);
    let (peer_read, mut peer_write) = tokio::io::split(peer_io);
    let serve = tokio::spawn(serve(
        snapshot_host(dir.path()),
        host_read,
        host_write,
        CancellationToken::new(),
    ));

    let mut chunk = b"\xff\xfe garbage\n".to_vec();
    chunk.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#);
    chunk.push(b'\n');
    peer_write.write_all(&chunk).await.expect("write");
    peer_write.flush().await.expect("flush");

    let mut replies = BufReader::new(peer_read).lines();

    let parse_error = next_reply(&mut replies).await;
    assert_eq!(parse_error["id"], Value::Null);
    assert_eq!(parse_error["error"]["code"], codes::PARSE_ERROR);

    let shutdown = next_reply(&mut replies).await;
    assert_eq!(shutdown["id"], 1);
    assert_eq!(shutdown["result"]["status"], "shutdown");

    let exit = tokio::time::timeout(STEP_TIMEOUT, serve)
        .await
        .expect("serve loop ends")
        .expect("join")
        .expect("serve");
    assert_eq!(exit, ServeExit::ShutdownRequested);
}

async fn next_reply<R>(replies: &mut tokio::io::Lines<R>) -> Value
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let line = tokio::time::timeout(STEP_TIMEOUT, replies.next_line())
        .await
        .expect("host replied")
        .expect("read")
        .expect("a reply line");
    serde_json::from_str(&line).expect("json")
}
