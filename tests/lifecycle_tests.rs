use std::collections::HashMap;
use std::time::Duration;

use optrace::prelude::*;
use serde_json::json;
use tokio_test::assert_ok;

fn single(key: &str, value: i64) -> HashMap<String, serde_json::Value> {
    HashMap::from([(key.to_string(), json!(value))])
}

// Record two entries and end the operation cleanly.
#[test]
fn test_record_then_end() {
    let operation = OperationContext::new();
    operation.set_values(single("a", 1)).unwrap();
    operation.set_values(single("b", 2)).unwrap();
    operation.end().unwrap();

    let snapshot = operation.snapshot();
    assert_eq!(snapshot.status, Status::Ended);
    assert!(snapshot.ended_at.is_some());
    assert_eq!(snapshot.trace.len(), 2);
    assert_eq!(snapshot.trace[0].values["a"], json!(1));
    assert_eq!(snapshot.trace[1].values["b"], json!(2));
}

// The timeout poisons every later mutating call with the same error.
#[tokio::test]
async fn test_timeout_blocks_further_mutation() {
    let operation = OperationContext::new();
    operation.set_timeout(Duration::from_millis(30)).unwrap();
    operation.set_values(single("a", 1)).unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;

    let error = operation.set_values(single("a", 1)).unwrap_err();
    assert!(error.to_string().contains("timed out"));
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(!operation.is_running());
    assert_eq!(operation.snapshot().trace.len(), 1);
}

#[test]
fn test_double_cancel_is_a_protocol_violation() {
    let operation = OperationContext::new();
    operation.cancel().unwrap();

    let error = operation.cancel().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Protocol);
    assert_eq!(operation.status(), Status::Cancelled);
}

#[test]
fn test_chained_calls() {
    let operation = OperationContext::new();
    operation
        .set_value("request", "GET /health")
        .unwrap()
        .set_value("response", 200)
        .unwrap()
        .end()
        .unwrap();

    assert_eq!(operation.snapshot().trace.len(), 2);
}

// Ending the operation clears the pending timeout before it can fire.
#[tokio::test]
async fn test_end_clears_pending_timeout() {
    let operation = OperationContext::new();
    operation.set_timeout(Duration::from_millis(30)).unwrap();
    operation.end().unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(operation.status(), Status::Ended);
    assert!(operation.errors().is_empty());
}

#[tokio::test]
async fn test_wait_resolves_after_end() {
    let operation = OperationContext::new();

    let waiter = operation.clone();
    let handle = tokio::spawn(async move { waiter.wait().await });

    tokio::task::yield_now().await;
    operation.end().unwrap();

    assert_ok!(handle.await.unwrap());
}

// Cancellation records no error, so waiters resolve cleanly.
#[tokio::test]
async fn test_wait_resolves_after_cancel() {
    let operation = OperationContext::new();

    let waiter = operation.clone();
    let handle = tokio::spawn(async move { waiter.wait().await });

    tokio::task::yield_now().await;
    operation.cancel().unwrap();

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wait_rejects_with_recorded_error() {
    let operation = OperationContext::new();

    let waiter = operation.clone();
    let handle = tokio::spawn(async move { waiter.wait().await });

    tokio::task::yield_now().await;
    let error = operation.create_error("downstream failure");

    let rejected = handle.await.unwrap().unwrap_err();
    assert_eq!(rejected, error);
}

// Snapshots are usable at any point in the lifecycle, not just after
// termination.
#[test]
fn test_snapshot_while_running() {
    let operation = OperationContext::new();
    operation.set_value("phase", "warmup").unwrap();

    let snapshot = operation.snapshot();
    assert_eq!(snapshot.status, Status::Running);
    assert!(snapshot.ended_at.is_none());
    assert_eq!(snapshot.trace.len(), 1);

    // Taking a snapshot is not a mutation.
    assert!(operation.is_running());
    operation.end().unwrap();
}

// Under the test-capture flag, recorded stacks keep only harness frames.
#[test]
fn test_frame_capture_in_test_mode() {
    set_test_frame_capture(true);
    let operation = OperationContext::new();
    operation.set_value("probe", 1).unwrap();
    set_test_frame_capture(false);

    let entry = &operation.snapshot().trace[0];
    assert!(entry.stacktrace.iter().all(|frame| frame.contains("test")));
}
