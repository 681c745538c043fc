//! Unit tests for typed method parameters and local validation.

use serde_json::json;

use reducto_bridge::rpc::params::{
    ApplyDiffParams, ListFilesParams, MethodParams, PathParams, ReferencesParams, SymbolsResult,
};
use reducto_bridge::AppError;

#[test]
fn every_method_round_trips_its_name() {
    let methods = [
        "initialize",
        "shutdown",
        "list_files",
        "read_file",
        "get_symbols",
        "get_complexity",
        "find_references",
        "apply_diff",
        "apply_diff_safe",
        "run_tests",
        "git_checkpoint",
        "git_rollback",
    ];
    let params = json!({
        "root_dir": "/repo",
        "path": "a.py",
        "diff": "@@",
        "line": 1,
        "column": 0,
        "message": "m",
    });

    for method in methods {
        let parsed = MethodParams::parse(method, params.clone()).expect(method);
        assert_eq!(parsed.method(), method);
    }
}

#[test]
fn missing_required_field_is_invalid_params() {
    let err = MethodParams::parse("read_file", json!({})).expect_err("path is required");
    assert!(matches!(err, AppError::InvalidParams(ref msg) if msg.starts_with("read_file")));
}

#[test]
fn empty_path_fails_validation() {
    let params = MethodParams::ReadFile(PathParams { path: "  ".into() });
    assert_eq!(
        params.validate(),
        Err(AppError::InvalidParams("path must not be empty".into()))
    );
}

#[test]
fn empty_diff_fails_validation() {
    let params = MethodParams::ApplyDiff(ApplyDiffParams {
        path: "a.py".into(),
        diff: String::new(),
        session_id: None,
    });
    assert_eq!(
        params.validate(),
        Err(AppError::InvalidParams("diff must not be empty".into()))
    );
}

#[test]
fn zero_line_fails_validation() {
    let params = MethodParams::FindReferences(ReferencesParams {
        path: "a.py".into(),
        line: 0,
        column: 3,
    });
    assert!(matches!(params.validate(), Err(AppError::InvalidParams(_))));
}

#[test]
fn bad_glob_fails_validation() {
    let params = MethodParams::ListFiles(ListFilesParams {
        include_patterns: vec!["[".into()],
        exclude_patterns: Vec::new(),
    });
    assert!(matches!(params.validate(), Err(AppError::InvalidParams(ref msg)) if msg.contains("glob")));
}

#[test]
fn empty_session_id_fails_validation() {
    let params = MethodParams::ApplyDiff(ApplyDiffParams {
        path: "a.py".into(),
        diff: "@@".into(),
        session_id: Some(String::new()),
    });
    assert!(params.validate().is_err());
}

#[test]
fn parameterless_methods_serialize_to_empty_object() {
    assert_eq!(MethodParams::RunTests.to_value().expect("value"), json!({}));
    assert_eq!(MethodParams::GitRollback.to_value().expect("value"), json!({}));
}

#[test]
fn symbol_kind_travels_as_type() {
    let result: SymbolsResult = serde_json::from_value(json!({
        "symbols": [{"name": "f", "type": "function", "start_line": 1, "end_line": 3}]
    }))
    .expect("deserialize");
    assert_eq!(result.symbols[0].kind, "function");
    assert_eq!(result.symbols[0].signature, None);
}
