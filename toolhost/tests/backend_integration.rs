//! End-to-end tests against a real child process (`mock_backend`, built as
//! part of this crate) rather than against `BackendSession`'s internals.
//! Covers the properties §8 calls out as testable: concurrent batch
//! execution completing in ~T not N*T, per-call timeout, and crash/restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use toolhost::registry::ToolRegistry;
use toolhost::session::{BackendDescriptor, BackendSession};
use toolhost::{invoke_batch, ToolHostError, ToolInvocation};

fn mock_backend_descriptor(name: &str) -> BackendDescriptor {
    BackendDescriptor {
        name: name.to_string(),
        command: env!("CARGO_BIN_EXE_mock_backend").to_string(),
        args: Vec::new(),
        env: HashMap::new(),
        workdir: None,
    }
}

#[tokio::test]
async fn list_tools_returns_the_fixtures_catalog() {
    let session = BackendSession::spawn(&mock_backend_descriptor("debug"))
        .await
        .unwrap();
    let tools = session.list_tools().await.unwrap();
    let names: Vec<String> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"echo".to_string()));
    assert!(names.contains(&"slow".to_string()));
    assert!(names.contains(&"crash".to_string()));
    session.shutdown().await;
}

#[tokio::test]
async fn call_tool_echoes_argument() {
    let session = BackendSession::spawn(&mock_backend_descriptor("debug"))
        .await
        .unwrap();
    let content = session
        .call_tool("echo", serde_json::json!({"message": "x"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(content, "ECHO: x");
    session.shutdown().await;
}

#[tokio::test]
async fn call_tool_times_out_independent_of_backend_reply() {
    let session = BackendSession::spawn(&mock_backend_descriptor("debug"))
        .await
        .unwrap();
    let err = session
        .call_tool("slow", serde_json::json!({"secs": 2.0}), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolHostError::ToolTimeout { .. }));
    session.shutdown().await;
}

#[tokio::test]
async fn batch_of_slow_calls_completes_concurrently_not_serially() {
    let registry = ToolRegistry::start(vec![mock_backend_descriptor("debug")]).await;
    let batch: Vec<ToolInvocation> = (0..4)
        .map(|i| ToolInvocation {
            tool_call_id: format!("c{i}"),
            tool_name: "slow".to_string(),
            arguments_json: r#"{"secs": 0.5}"#.to_string(),
        })
        .collect();

    let started = Instant::now();
    let results = invoke_batch(&registry, batch, Duration::from_secs(5)).await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 4);
    for result in &results {
        assert_eq!(result.content, "done sleeping");
    }
    // Four 0.5s calls run concurrently finish in ~0.5s, not ~2s serially.
    assert!(elapsed < Duration::from_millis(1500), "elapsed = {elapsed:?}");
    registry.shutdown().await;
}

#[tokio::test]
async fn crash_mid_call_is_reported_and_backend_restarts() {
    let registry = ToolRegistry::start(vec![mock_backend_descriptor("debug")]).await;

    let crash_batch = vec![ToolInvocation {
        tool_call_id: "c1".to_string(),
        tool_name: "crash".to_string(),
        arguments_json: "{}".to_string(),
    }];
    let results = invoke_batch(&registry, crash_batch, Duration::from_secs(5)).await;
    assert!(results[0].content.starts_with("Error:"));

    // The registry restarts the backend on next use; a fresh call succeeds.
    let echo_batch = vec![ToolInvocation {
        tool_call_id: "c2".to_string(),
        tool_name: "echo".to_string(),
        arguments_json: r#"{"message": "after restart"}"#.to_string(),
    }];
    let results = invoke_batch(&registry, echo_batch, Duration::from_secs(5)).await;
    assert_eq!(results[0].content, "ECHO: after restart");
    registry.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_is_reported_without_contacting_backend_again() {
    let registry = ToolRegistry::start(vec![mock_backend_descriptor("debug")]).await;
    let batch = vec![ToolInvocation {
        tool_call_id: "c1".to_string(),
        tool_name: "does_not_exist".to_string(),
        arguments_json: "{}".to_string(),
    }];
    let results = invoke_batch(&registry, batch, Duration::from_secs(5)).await;
    assert!(results[0].content.contains("unknown tool 'does_not_exist'"));
    registry.shutdown().await;
}

#[tokio::test]
async fn collision_across_two_backends_exposes_qualified_names() {
    let registry = ToolRegistry::start(vec![
        mock_backend_descriptor("alpha"),
        mock_backend_descriptor("beta"),
    ])
    .await;

    let exposed = registry.list_exposed_tools();
    let names: Vec<&str> = exposed.iter().map(|e| e.qualified_name.as_str()).collect();
    assert!(names.contains(&"alpha.echo"));
    assert!(names.contains(&"beta.echo"));
    assert!(!names.contains(&"echo"));

    let content = registry
        .invoke("alpha.echo", serde_json::json!({"message": "x"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(content, "ECHO: x");
    registry.shutdown().await;
}
