//! Integration tests for batch execution.
//!
//! Covers polling limits, per-item isolation, cache writes, progress counts,
//! events and cascades. All tests run on a paused clock.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

mod support;

use grid_core::{ImageId, PollingConfig, UpdatesConfig};
use grid_updates::{
    BatchProgress, Cascade, FailureReason, ItemState, MutationHandler, UpdateChannel, UpdateError,
    UpdateEvent, select_batch_errors, select_batch_progress, select_latest_batch,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedHandler, StubSource, harness, harness_with, images};
use tokio::time::Instant;

const TITLE: &str = "metadata.title";

fn state_of(
    harness: &support::Harness,
    batch_id: &grid_updates::BatchId,
    image_id: &ImageId,
) -> ItemState {
    harness
        .coordinator
        .store()
        .batch(batch_id)
        .expect("batch retained")
        .per_item
        .get(image_id)
        .cloned()
        .expect("image in batch")
}

#[tokio::test(start_paused = true)]
async fn test_never_confirming_times_out_after_ten_polls() {
    let handler = Arc::new(ScriptedHandler::never_confirming());
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);
    let ids = images(&["img1"]);

    let started = Instant::now();
    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    let progress = harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(handler.polls_for(&ids[0]), 10);
    assert_eq!(started.elapsed(), Duration::from_millis(5_000));
    assert_eq!(state_of(&harness, &batch_id, &ids[0]), ItemState::TimedOut);
    assert_eq!(
        progress,
        BatchProgress {
            total: 1,
            confirmed: 0,
            failed: 1,
            timed_out: 1,
            pending: 0,
        }
    );
    assert_eq!(harness.cache.total(), 0);
    assert!(!harness.coordinator.guard().is_claimed(&ids[0], Some("title")));

    let errors = select_batch_errors(harness.coordinator.store(), &batch_id);
    assert!(errors[&ids[0]].starts_with("Still processing"));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_on_third_poll_writes_cache_once() {
    let handler = Arc::new(ScriptedHandler::confirming_on(3));
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);
    let ids = images(&["img1"]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(handler.polls_for(&ids[0]), 3);
    assert_eq!(handler.mutation_count(), 1);
    assert_eq!(harness.cache.writes_for(&ids[0]), 1);
    assert_eq!(state_of(&harness, &batch_id, &ids[0]), ItemState::Confirmed);

    let batch = harness.coordinator.store().batch(&batch_id).expect("batch");
    assert!(batch.completed_at.is_some());
    assert!(batch.completed_at >= Some(batch.started_at));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_does_not_affect_siblings() {
    let ids = images(&["img1", "img2", "img3"]);
    let handler = Arc::new(ScriptedHandler {
        reject: [ids[1].clone()].into_iter().collect(),
        default_confirm_on: Some(1),
        ..ScriptedHandler::default()
    });
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    let progress = harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(progress.confirmed, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.timed_out, 0);
    assert_eq!(state_of(&harness, &batch_id, &ids[0]), ItemState::Confirmed);
    assert_eq!(state_of(&harness, &batch_id, &ids[2]), ItemState::Confirmed);
    assert!(matches!(
        state_of(&harness, &batch_id, &ids[1]),
        ItemState::Failed {
            reason: FailureReason::Mutate(_)
        }
    ));
    assert_eq!(handler.polls_for(&ids[1]), 0);
    assert_eq!(harness.cache.writes_for(&ids[1]), 0);

    let errors = select_batch_errors(harness.coordinator.store(), &batch_id);
    assert_eq!(errors.len(), 1);
    assert!(errors[&ids[1]].contains("rejected img2"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_fails_only_its_item() {
    let ids = images(&["img1", "img2"]);
    let handler = Arc::new(ScriptedHandler {
        panic_on: [ids[0].clone()].into_iter().collect(),
        default_confirm_on: Some(1),
        ..ScriptedHandler::default()
    });
    let harness = harness(vec![(TITLE, handler as Arc<dyn MutationHandler>)]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    let progress = harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(progress.confirmed, 1);
    assert_eq!(progress.failed, 1);
    assert!(matches!(
        state_of(&harness, &batch_id, &ids[0]),
        ItemState::Failed {
            reason: FailureReason::Mutate(_)
        }
    ));
    assert!(!harness.coordinator.guard().is_claimed(&ids[0], Some("title")));
}

#[tokio::test(start_paused = true)]
async fn test_progress_counts_always_sum_to_total() {
    let ids = images(&["img1", "img2", "img3", "img4"]);
    let handler = Arc::new(ScriptedHandler {
        confirm_on: [(ids[0].clone(), 1), (ids[1].clone(), 4)].into_iter().collect(),
        reject: [ids[2].clone()].into_iter().collect(),
        ..ScriptedHandler::default()
    });
    let harness = harness(vec![(TITLE, handler as Arc<dyn MutationHandler>)]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    let store = Arc::clone(harness.coordinator.store());

    let initial = select_batch_progress(&store, &batch_id).expect("progress");
    assert_eq!(initial.pending, 4);
    assert_eq!(initial.total, 4);

    loop {
        let progress = select_batch_progress(&store, &batch_id).expect("progress");
        assert_eq!(
            progress.confirmed + progress.failed + progress.pending,
            progress.total
        );
        assert!(progress.timed_out <= progress.failed);
        if progress.is_settled() {
            assert_eq!(progress.confirmed, 2);
            assert_eq!(progress.failed, 2);
            assert_eq!(progress.timed_out, 1);
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_requests_create_no_batch() {
    let harness = harness(vec![(
        TITLE,
        Arc::new(ScriptedHandler::confirming_on(1)) as Arc<dyn MutationHandler>,
    )]);

    let empty = harness.coordinator.start(TITLE, Some("title"), &[], json!("A"));
    assert!(matches!(empty, Err(UpdateError::EmptyBatch)));

    let unknown = harness
        .coordinator
        .start("metadata.nope", Some("nope"), &images(&["img1"]), json!("A"));
    assert!(matches!(unknown, Err(UpdateError::UnknownOperation(op)) if op == "metadata.nope"));

    assert!(harness.coordinator.store().is_empty());
    assert_eq!(harness.coordinator.guard().claimed_images(), 0);
}

#[test]
fn test_start_outside_runtime_is_rejected() {
    let harness = harness(vec![(
        TITLE,
        Arc::new(ScriptedHandler::confirming_on(1)) as Arc<dyn MutationHandler>,
    )]);

    let result = harness
        .coordinator
        .start(TITLE, Some("title"), &images(&["img1"]), json!("A"));
    assert!(matches!(result, Err(UpdateError::NoRuntime)));
    assert!(harness.coordinator.store().is_empty());
    assert_eq!(harness.coordinator.guard().claimed_images(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handler_polling_override() {
    let handler = Arc::new(ScriptedHandler {
        polling: Some(PollingConfig {
            interval_ms: 100,
            max_attempts: 3,
            ..PollingConfig::default()
        }),
        ..ScriptedHandler::never_confirming()
    });
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);
    let ids = images(&["img1"]);

    let started = Instant::now();
    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(handler.polls_for(&ids[0]), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_huge_backoff_multiplier_still_times_out() {
    let handler = Arc::new(ScriptedHandler {
        polling: Some(PollingConfig {
            backoff_multiplier: 1e30,
            ..PollingConfig::exponential(500, 3, 10_000)
        }),
        ..ScriptedHandler::never_confirming()
    });
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);
    let ids = images(&["img1"]);

    let started = Instant::now();
    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(handler.polls_for(&ids[0]), 3);
    assert_eq!(state_of(&harness, &batch_id, &ids[0]), ItemState::TimedOut);
    assert_eq!(started.elapsed(), Duration::from_millis(20_500));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_handler_polling_rejects_batch() {
    let handler = Arc::new(ScriptedHandler {
        polling: Some(PollingConfig {
            max_attempts: 0,
            ..PollingConfig::default()
        }),
        ..ScriptedHandler::confirming_on(1)
    });
    let harness = harness(vec![(TITLE, Arc::clone(&handler) as Arc<dyn MutationHandler>)]);

    let result = harness
        .coordinator
        .start(TITLE, Some("title"), &images(&["img1"]), json!("A"));

    assert!(matches!(result, Err(UpdateError::Core(_))));
    assert!(harness.coordinator.store().is_empty());
    assert_eq!(harness.coordinator.guard().claimed_images(), 0);
    assert_eq!(handler.mutation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_still_confirms() {
    let harness = harness_with(
        vec![(
            TITLE,
            Arc::new(ScriptedHandler::confirming_on(1)) as Arc<dyn MutationHandler>,
        )],
        StubSource {
            fail: true,
            ..StubSource::default()
        },
        &UpdatesConfig::default(),
    );
    let ids = images(&["img1"]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");
    let progress = harness
        .coordinator
        .wait_for_settled(batch_id)
        .await
        .expect("settled");

    assert_eq!(progress.confirmed, 1);
    assert_eq!(harness.cache.total(), 0);
    assert_eq!(
        harness
            .source
            .fetches
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_item_lifecycle() {
    let (channel, mut receiver) = UpdateChannel::new();
    let mut harness = harness(vec![(
        TITLE,
        Arc::new(ScriptedHandler::confirming_on(2)) as Arc<dyn MutationHandler>,
    )]);
    harness.coordinator = harness.coordinator.with_events(channel);
    let ids = images(&["img1"]);

    let batch_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        let settled = matches!(event, UpdateEvent::BatchSettled { .. });
        events.push(event);
        if settled {
            break;
        }
    }

    assert_eq!(
        events,
        vec![
            UpdateEvent::BatchStarted {
                batch_id,
                operation_type: TITLE.to_owned(),
                field: Some("title".to_owned()),
                total: 1,
            },
            UpdateEvent::ItemStateChanged {
                batch_id,
                image_id: ids[0].clone(),
                state: ItemState::Polling,
            },
            UpdateEvent::ItemStateChanged {
                batch_id,
                image_id: ids[0].clone(),
                state: ItemState::Confirmed,
            },
            UpdateEvent::BatchSettled {
                batch_id,
                progress: BatchProgress {
                    total: 1,
                    confirmed: 1,
                    failed: 0,
                    timed_out: 0,
                    pending: 0,
                },
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cascade_runs_on_confirmed_images_only() {
    let ids = images(&["img1", "img2"]);
    let parent = Arc::new(ScriptedHandler {
        reject: [ids[1].clone()].into_iter().collect(),
        default_confirm_on: Some(1),
        cascades: vec![
            Cascade::new("metadata.credit", Some("credit".to_owned()))
                .with_value(|value| json!(format!("credit for {}", value.as_str().unwrap_or("")))),
        ],
        ..ScriptedHandler::default()
    });
    let child = Arc::new(ScriptedHandler::confirming_on(1));
    let (channel, mut receiver) = UpdateChannel::new();
    let mut harness = harness(vec![
        (TITLE, parent as Arc<dyn MutationHandler>),
        ("metadata.credit", Arc::clone(&child) as Arc<dyn MutationHandler>),
    ]);
    harness.coordinator = harness.coordinator.with_events(channel);

    let parent_id = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("Sunset"))
        .expect("start");

    let mut settled = Vec::new();
    while settled.len() < 2 {
        if let Some(UpdateEvent::BatchSettled { batch_id, .. }) = receiver.recv().await {
            settled.push(batch_id);
        }
    }

    assert_eq!(settled[0], parent_id);
    let cascade_id = settled[1];
    assert_eq!(select_latest_batch(harness.coordinator.store()), Some(cascade_id));

    let cascade = harness.coordinator.store().batch(&cascade_id).expect("cascade batch");
    assert_eq!(cascade.operation_type, "metadata.credit");
    assert_eq!(cascade.field.as_deref(), Some("credit"));
    assert_eq!(cascade.image_ids, vec![ids[0].clone()]);
    assert_eq!(cascade.value, json!("credit for Sunset"));
    assert_eq!(child.mutation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retention_evicts_oldest_settled_batches() {
    let mut config = UpdatesConfig::default();
    config.retention.max_settled_batches = 2;
    let harness = harness_with(
        vec![(
            TITLE,
            Arc::new(ScriptedHandler::confirming_on(1)) as Arc<dyn MutationHandler>,
        )],
        StubSource::default(),
        &config,
    );

    let mut batch_ids = Vec::new();
    for index in 0..3 {
        let ids = images(&[&format!("img{index}")]);
        let batch_id = harness
            .coordinator
            .start(TITLE, Some("title"), &ids, json!("A"))
            .expect("start");
        harness
            .coordinator
            .wait_for_settled(batch_id)
            .await
            .expect("settled");
        batch_ids.push(batch_id);
    }

    // Eviction happens when the next batch is inserted.
    let ids = images(&["img9"]);
    let last = harness
        .coordinator
        .start(TITLE, Some("title"), &ids, json!("A"))
        .expect("start");

    let store = harness.coordinator.store();
    assert!(store.batch(&batch_ids[0]).is_none());
    assert!(store.batch(&batch_ids[1]).is_some());
    assert!(store.batch(&batch_ids[2]).is_some());
    assert_eq!(store.len(), 3);
    assert!(store.batch(&last).is_some());
    assert!(matches!(
        harness.coordinator.wait_for_settled(batch_ids[0]).await,
        Err(UpdateError::UnknownBatch(_))
    ));
}
