use std::time::Duration;

use crate::support::helpers::{
    base_config, blocked, case, init_tracing, no_data, server_error, success, CancelAfter,
    MemoryCheckpointStore, MemoryRecordStore, RecordingObserver, ScriptedFetcher,
    ScriptedSession,
};
use anyhow::Result;
use docketsync::{
    exit_status, FetchOutcome, IngestError, Orchestrator, ProgressCheckpoint, RawOutcome,
    PendingFilter, ResultClassifier, RunOutcome, SessionError, StageSample, WorkItem,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn second_run_fetches_nothing_and_changes_nothing() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3"]);
    let checkpoints = MemoryCheckpointStore::new(true);

    let first = ScriptedFetcher::default().script(case("2"), vec![no_data()]);
    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        ScriptedSession::default(),
        first.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let report = orchestrator.run().await?;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(first.calls().len(), 3);

    let after_first = store.document();
    let completed_first = checkpoints.completed();
    assert_eq!(completed_first, vec![case("1"), case("2"), case("3")]);

    let entry = store.entry(&case("1"));
    assert_eq!(
        entry.extra.get("courtName"),
        Some(&json!("Seoul Central District Court"))
    );
    assert_eq!(
        entry.delivery_records,
        Some(vec![json!({"recipient": "1", "result": "delivered"})])
    );

    for resume in [true, false] {
        let second = ScriptedFetcher::default();
        let mut orchestrator = Orchestrator::new(
            base_config().resume(resume).build()?,
            ScriptedSession::default(),
            second.clone(),
            store.clone(),
            checkpoints.resuming(resume),
        );
        let report = orchestrator.run().await?;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.pending_items, 0);
        assert!(second.calls().is_empty(), "no item may be fetched twice");
        assert_eq!(store.document(), after_first);
        if resume {
            assert_eq!(checkpoints.completed(), completed_first);
        }
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resumed_run_fetches_only_remaining_items_in_order() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["A", "B", "C", "D"]);
    let mut checkpoint = ProgressCheckpoint::new(4);
    checkpoint.mark_completed(case("A"));
    checkpoint.mark_completed(case("B"));
    let checkpoints = MemoryCheckpointStore::seeded(checkpoint);

    let fetcher = ScriptedFetcher::default();
    let mut orchestrator = Orchestrator::new(
        base_config().resume(true).build()?,
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let report = orchestrator.run().await?;

    assert_eq!(fetcher.calls(), vec![case("C"), case("D")]);
    assert_eq!(report.pending_items, 2);
    assert_eq!(report.completed_items, 4);
    assert_eq!(
        checkpoints.completed(),
        vec![case("A"), case("B"), case("C"), case("D")]
    );
    assert!(store.entry(&case("A")).delivery_records.is_none());
    assert!(store.entry(&case("D")).is_done());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn blocked_item_is_retried_after_cooldown_and_refresh() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["W", "X", "Y"]);
    let session = ScriptedSession::default();
    let fetcher = ScriptedFetcher::default()
        .script(case("X"), vec![blocked(), blocked(), success("x")])
        .script(case("Y"), vec![blocked(), success("y")]);
    let observer = RecordingObserver::default();

    let mut orchestrator = Orchestrator::new(
        base_config().max_consecutive_blocks(3).build()?,
        session.clone(),
        fetcher.clone(),
        store.clone(),
        MemoryCheckpointStore::new(false),
    )
    .with_observer(observer.clone());
    let report = orchestrator.run().await?;

    // Without the reset after X succeeded, Y's block would be the third in a row.
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        fetcher.calls(),
        vec![case("W"), case("X"), case("X"), case("X"), case("Y"), case("Y")]
    );
    assert_eq!(fetcher.generations(), vec![0, 0, 1, 2, 2, 3]);
    assert_eq!(session.refreshes(), 3);

    assert_eq!(report.statistics.succeeded, 3);
    assert_eq!(report.statistics.errors, 0);
    assert_eq!(report.statistics.blocks, 3);
    assert_eq!(report.metrics.total_blocks, 3);

    let x = store.entry(&case("X"));
    assert_eq!(
        x.delivery_records,
        Some(vec![json!({"recipient": "x", "result": "delivered"})])
    );
    assert_eq!(x.document_records, Some(vec![json!({"title": "x notice"})]));

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("started 3/3"));
    assert!(events.contains(&"cooldown B000210:X 1 180s".to_string()));
    assert!(events.contains(&"cooldown B000210:X 2 180s".to_string()));
    assert!(events.contains(&"cooldown B000210:Y 1 180s".to_string()));
    assert!(events.contains(&"settled 1 B000210:X success".to_string()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn run_aborts_at_block_threshold_after_flushing_prior_items() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3", "4"]);
    let checkpoints = MemoryCheckpointStore::new(false);
    let session = ScriptedSession::default();
    let fetcher = ScriptedFetcher::default()
        .script(case("1"), vec![success("1")])
        .script(case("2"), vec![no_data()])
        .always(blocked());

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        session.clone(),
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let result = orchestrator.run().await;
    assert_eq!(exit_status(&result), 1);

    let report = result?;
    match &report.outcome {
        RunOutcome::Aborted {
            consecutive_blocks,
            last_message,
        } => {
            assert_eq!(*consecutive_blocks, 5);
            assert!(last_message.contains("Abnormal access"));
        }
        other => panic!("expected abort, got {other:?}"),
    }

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2 + 5);
    assert!(calls[2..].iter().all(|key| *key == case("3")));
    assert_eq!(session.refreshes(), 4);

    assert_eq!(checkpoints.completed(), vec![case("1"), case("2")]);
    assert!(store.entry(&case("1")).is_done());
    assert!(store.entry(&case("2")).is_done());
    assert!(!store.entry(&case("3")).is_done());
    assert!(!store.entry(&case("4")).is_done());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn no_data_is_distinguishable_from_never_fetched() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2"]);
    let checkpoints = MemoryCheckpointStore::new(false);
    let token = CancellationToken::new();

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        ScriptedSession::default(),
        ScriptedFetcher::default().script(case("1"), vec![no_data()]),
        store.clone(),
        checkpoints.clone(),
    )
    .with_cancellation_token(token.clone())
    .with_observer(CancelAfter::new(token, 1));
    let report = orchestrator.run().await?;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.statistics.no_data, 1);
    assert_eq!(report.statistics.errors, 0);

    let checked = store.entry(&case("1"));
    assert_eq!(checked.delivery_records, Some(Vec::new()));
    assert_eq!(checked.document_records, Some(Vec::new()));
    assert!(checked.is_done());

    let untouched = store.entry(&case("2"));
    assert_eq!(untouched.delivery_records, None);
    assert_eq!(untouched.document_records, None);
    assert!(!untouched.is_done());

    assert_eq!(checkpoints.completed(), vec![case("1")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn errors_settle_the_item_and_are_counted_separately() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3"]);
    let checkpoints = MemoryCheckpointStore::new(false);
    let fetcher = ScriptedFetcher::default()
        .script(case("2"), vec![server_error()])
        .script(
            case("3"),
            vec![RawOutcome::from_text(200, "<html>maintenance</html>")],
        );

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let report = orchestrator.run().await?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(fetcher.calls().len(), 3);
    assert_eq!(report.statistics.succeeded, 1);
    assert_eq!(report.statistics.errors, 2);
    assert_eq!(report.statistics.failed, vec![case("2"), case("3")]);
    assert_eq!(report.metrics.total_errors, 2);

    let failed = store.entry(&case("2"));
    assert_eq!(failed.delivery_records, Some(Vec::new()));
    assert_eq!(checkpoints.completed().len(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_flushes_settled_items() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3", "4", "5"]);
    let checkpoints = MemoryCheckpointStore::new(false);
    let fetcher = ScriptedFetcher::default();
    let token = CancellationToken::new();

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    )
    .with_cancellation_token(token.clone())
    .with_observer(CancelAfter::new(token, 2));
    let result = orchestrator.run().await;
    assert_eq!(exit_status(&result), docketsync::EXIT_INTERRUPTED);

    let report = result?;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(fetcher.calls(), vec![case("1"), case("2")]);
    assert_eq!(store.saves(), 1, "only the final flush ran");
    assert_eq!(checkpoints.completed(), vec![case("1"), case("2")]);
    assert!(store.entry(&case("2")).is_done());
    assert!(!store.entry(&case("3")).is_done());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn session_failure_stops_the_run_after_final_flush() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1"]);
    let checkpoints = MemoryCheckpointStore::new(false);
    let fetcher = ScriptedFetcher::default();
    let session = ScriptedSession::failing(SessionError::Rejected {
        url: "http://auction.test/main".into(),
        status: 503,
    });

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        session,
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Session(SessionError::Rejected { status: 503, .. }))
    ));
    assert!(fetcher.calls().is_empty());
    assert_eq!(store.saves(), 1);
    assert!(checkpoints.saved().is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_stops_the_run_before_the_checkpoint_is_written() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3"]);
    store.fail_saves(true);
    let checkpoints = MemoryCheckpointStore::new(false);
    let fetcher = ScriptedFetcher::default();

    let mut orchestrator = Orchestrator::new(
        base_config().flush_every(1).build()?,
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        checkpoints.clone(),
    );
    let result = orchestrator.run().await;
    assert_eq!(exit_status(&result), 1);

    let err = result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IngestError>(),
        Some(IngestError::Persistence {
            target: "record store",
            ..
        })
    ));
    assert_eq!(fetcher.calls(), vec![case("1")]);
    assert!(
        checkpoints.saved().is_none(),
        "checkpoint must not claim items whose records were not written"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sample_mode_narrows_pending_and_flushes_every_item() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::from_json(json!([
        {"courtCode": "B000210", "caseNumber": "1", "label": "신건"},
        {"courtCode": "B000210", "caseNumber": "2", "label": "유찰 2회"},
        {"courtCode": "B000210", "caseNumber": "3", "label": "신건"},
        {"courtCode": "B000210", "caseNumber": "4", "label": "유찰 1회"},
        {"courtCode": "B000210", "caseNumber": "5"}
    ]));
    let config = base_config()
        .sample_mode(true)
        .sample_advanced(1)
        .sample_early(1)
        .advanced_label("유찰")
        .build()?;
    let fetcher = ScriptedFetcher::default();

    let mut orchestrator = Orchestrator::new(
        config.clone(),
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        MemoryCheckpointStore::new(false),
    )
    .with_filter(StageSample::from_config(&config));
    let report = orchestrator.run().await?;

    assert_eq!(fetcher.calls(), vec![case("1"), case("2")]);
    assert_eq!(report.pending_items, 2);
    assert_eq!(store.saves(), 3, "one flush per item plus the final flush");
    assert_eq!(report.statistics.per_label.get("신건"), Some(&1));
    assert_eq!(report.statistics.per_label.get("유찰 2회"), Some(&1));
    Ok(())
}

struct RepeatFirst;

impl PendingFilter for RepeatFirst {
    fn narrow(&self, mut pending: Vec<WorkItem>) -> Vec<WorkItem> {
        if let Some(first) = pending.first().cloned() {
            pending.push(first);
        }
        pending
    }
}

#[tokio::test(start_paused = true)]
async fn filter_may_return_more_items_than_it_received() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2"]);
    let fetcher = ScriptedFetcher::default();

    let mut orchestrator = Orchestrator::new(
        base_config().build()?,
        ScriptedSession::default(),
        fetcher.clone(),
        store.clone(),
        MemoryCheckpointStore::new(false),
    )
    .with_filter(RepeatFirst);
    let report = orchestrator.run().await?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.pending_items, 3);
    assert_eq!(fetcher.calls(), vec![case("1"), case("2"), case("1")]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pacing_rests_at_batch_boundaries() -> Result<()> {
    init_tracing();
    let store = MemoryRecordStore::with_cases(&["1", "2", "3", "4", "5"]);
    let config = base_config()
        .inter_request_delay(Duration::from_secs(1))
        .batch_interval(2)
        .batch_rest(Duration::from_secs(10))
        .build()?;

    let mut orchestrator = Orchestrator::new(
        config,
        ScriptedSession::default(),
        ScriptedFetcher::default(),
        store,
        MemoryCheckpointStore::new(false),
    );
    let started = Instant::now();
    let report = orchestrator.run().await?;
    let elapsed = started.elapsed();

    // Four inter-item delays plus rests before the third and fifth items.
    assert_eq!(report.statistics.succeeded, 5);
    assert!(elapsed >= Duration::from_secs(24), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(25), "elapsed {elapsed:?}");
    Ok(())
}

#[test]
fn block_message_wins_over_failure_status() {
    let classifier = ResultClassifier::default();
    let outcome = classifier.classify(&RawOutcome::json(
        500,
        json!({"status": 500, "message": "Too many requests from this address"}),
    ));
    assert!(matches!(outcome, FetchOutcome::Blocked { .. }));
}
