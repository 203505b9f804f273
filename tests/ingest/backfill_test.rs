//! Tests for `src/ingest/backfill.rs`: one-pass history scan.

use std::time::Duration;

use herald::audience::RecipientId;
use herald::ingest::{run_backfill, BackfillReport};
use herald::platform::PlatformError;

use crate::support::{keyword_text, message, persisted_ids, textless, FakeClient, Harness, ROOM};

#[tokio::test(start_paused = true)]
async fn collects_exactly_the_matching_senders() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    let client = FakeClient::new().with_history(vec![
        message(1, "good morning", 7),
        message(2, &keyword_text(""), 101),
        message(3, "nothing to see", 8),
        message(4, &keyword_text("b"), 202),
        message(5, "bye", 9),
    ]);
    let h = Harness::new(client, &file).await;

    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(
        report,
        BackfillReport {
            scanned: 5,
            empty: 0,
            matched: 2,
            added: 2,
            already_present: 0,
            failed: 0,
        }
    );
    let members: Vec<RecipientId> = h.audience.snapshot().await.into_iter().collect();
    assert_eq!(members, vec![RecipientId(101), RecipientId(202)]);
    assert_eq!(persisted_ids(&file), vec![101, 202]);
    assert_eq!(h.pipeline.sequence(), 5);
    // Only matching messages trigger sender resolution.
    assert_eq!(h.client.resolve_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_sender_is_recorded_once() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    let client = FakeClient::new().with_history(vec![
        message(1, &keyword_text(""), 42),
        message(2, &keyword_text("x"), 42),
    ]);
    let h = Harness::new(client, &file).await;

    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(report.added, 1);
    assert_eq!(report.already_present, 1);
    assert_eq!(persisted_ids(&file), vec![42]);
}

#[tokio::test(start_paused = true)]
async fn transient_resolution_failure_is_retried_with_fixed_delay() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let client = FakeClient::new().with_history(vec![message(1, &keyword_text(""), 5)]);
    client.fail_resolution(1, 2);
    let h = Harness::new(client, &tmp.path().join("users.txt")).await;

    let started = tokio::time::Instant::now();
    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(report.added, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.client.resolve_calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn exhausted_message_is_skipped_and_scan_continues() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let file = tmp.path().join("users.txt");
    let client = FakeClient::new().with_history(vec![
        message(1, &keyword_text(""), 5),
        message(2, &keyword_text(""), 6),
    ]);
    client.fail_resolution(1, u32::MAX);
    let h = Harness::new(client, &file).await;

    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(report.failed, 1);
    assert_eq!(report.added, 1);
    assert_eq!(h.client.resolve_calls(), 4);
    assert_eq!(persisted_ids(&file), vec![6]);
}

#[tokio::test(start_paused = true)]
async fn textless_messages_are_skipped_without_failures() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let client = FakeClient::new().with_history(vec![
        textless(1, 3),
        message(2, "", 4),
        message(3, &keyword_text(""), 5),
    ]);
    let h = Harness::new(client, &tmp.path().join("users.txt")).await;

    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(report.empty, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.added, 1);
    assert_eq!(h.pipeline.sequence(), 3);
}

#[tokio::test(start_paused = true)]
async fn unreadable_history_items_are_counted_and_skipped() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let client = FakeClient::new().with_history_items(vec![
        Err(PlatformError::HistoryUnavailable("page lost".to_owned())),
        Ok(message(2, &keyword_text(""), 5)),
    ]);
    let h = Harness::new(client, &tmp.path().join("users.txt")).await;

    let report = run_backfill(&h.pipeline, ROOM).await.expect("history is available");

    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.added, 1);
}

#[tokio::test]
async fn missing_history_is_an_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let h = Harness::new(FakeClient::new(), &tmp.path().join("users.txt")).await;

    let result = run_backfill(&h.pipeline, ROOM).await;

    assert!(matches!(result, Err(PlatformError::HistoryUnavailable(_))));
    assert!(h.audience.is_empty().await);
}
