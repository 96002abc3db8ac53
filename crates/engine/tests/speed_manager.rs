mod support;

use lapse_common::error::LapseError;
use lapse_engine::{Request, TickOutcome};
use support::{config, raw_frame, Faults, Harness};

#[tokio::test]
async fn transitions_exactly_at_checkpoint() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();
    assert_eq!(manager.checkpoint(), 900);

    let first_current = manager.current().unwrap().artifact().clone();
    let first_standby = manager.standby().unwrap().artifact().clone();

    for frame_no in 0..900 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        manager.tick(Request::Record).await.unwrap();
    }
    assert_eq!(manager.current_speed().unwrap().get(), 1);
    assert_eq!(manager.current().unwrap().max_written(), Some(899));

    adapter.submit(raw_frame(900), 900).unwrap();
    manager.tick(Request::Record).await.unwrap();

    assert_eq!(manager.current_speed().unwrap().get(), 2);
    assert_eq!(manager.standby().unwrap().speed().get(), 4);
    assert_eq!(manager.checkpoint(), 1800);
    assert_eq!(manager.current().unwrap().artifact(), &first_standby);
    assert_eq!(manager.current().unwrap().max_written(), Some(900));
    assert_eq!(manager.standby().unwrap().max_written(), None);

    // Only even frames stay cached, all the way back to 0 for the new standby.
    assert_eq!(manager.store().len(), 451);
    assert!(manager.store().frame_numbers().all(|n| n % 2 == 0));

    let retired = harness.recorder.log(&first_current);
    assert!(retired.aborted && retired.removed);
    assert_eq!(retired.frames.len(), 901);
}

#[tokio::test]
async fn new_standby_catches_up_from_frame_zero() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(2, 1, 1)).await.unwrap();

    for frame_no in 0..=2 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        manager.tick(Request::Record).await.unwrap();
    }
    assert_eq!(manager.current_speed().unwrap().get(), 2);
    let standby = manager.standby().unwrap().artifact().clone();

    for _ in 0..3 {
        manager.tick(Request::Record).await.unwrap();
    }
    assert_eq!(harness.recorder.log(&standby).frames, vec![0]);
    assert_eq!(harness.recorder.log(&standby).speed, Some(4));
}

#[tokio::test]
async fn end_without_frames_finishes_empty_output() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();
    let standby = manager.standby().unwrap().artifact().clone();

    adapter.close().await.unwrap();
    let TickOutcome::Finished {
        artifact,
        encoder_error: None,
    } = manager.tick(Request::End).await.unwrap()
    else {
        panic!("end should produce an artifact");
    };

    let output = harness.recorder.log(&artifact);
    assert!(output.finished);
    assert!(!output.removed);
    assert!(output.frames.is_empty());

    let standby = harness.recorder.log(&standby);
    assert!(standby.aborted && standby.removed);
    assert!(manager.is_terminated());
}

#[tokio::test]
async fn end_writes_every_remaining_frame() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();

    // Submitted faster than one-per-tick.
    for frame_no in 0..20 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        if frame_no % 4 == 0 {
            manager.tick(Request::Record).await.unwrap();
        }
    }
    adapter.close().await.unwrap();
    let TickOutcome::Finished {
        artifact,
        encoder_error: None,
    } = manager.tick(Request::End).await.unwrap()
    else {
        panic!("end should produce an artifact");
    };

    let output = harness.recorder.log(&artifact);
    assert_eq!(output.frames, (0..20).collect::<Vec<_>>());
    assert_eq!(output.key_frames, (0..20).step_by(2).collect::<Vec<_>>());
    assert!(manager.store().is_empty());
}

#[tokio::test]
async fn cancel_removes_both_artifacts() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();

    for frame_no in 0..10 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        manager.tick(Request::Record).await.unwrap();
    }
    adapter.abort();
    assert!(matches!(
        manager.tick(Request::Cancel).await.unwrap(),
        TickOutcome::Canceled
    ));

    let logs = harness.recorder.snapshot();
    assert_eq!(logs.len(), 2);
    assert!(logs.values().all(|log| log.aborted && log.removed));
    assert!(manager.store().is_empty());
}

#[tokio::test]
async fn terminated_manager_rejects_ticks() {
    let harness = Harness::new();
    let (_adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();

    manager.tick(Request::Cancel).await.unwrap();
    let err = manager.tick(Request::Record).await.unwrap_err();
    assert!(matches!(err, LapseError::InvalidArgument { .. }));
}

#[tokio::test]
async fn failed_transition_keeps_current_speed() {
    let harness = Harness::with_faults(Faults {
        processor_fails_for_speed: Some(4),
        ..Faults::default()
    });
    let (mut adapter, mut manager) = harness.manager(config(2, 1, 1)).await.unwrap();
    assert_eq!(manager.checkpoint(), 2);

    for frame_no in 0..2 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        manager.tick(Request::Record).await.unwrap();
    }
    adapter.submit(raw_frame(2), 2).unwrap();
    let err = manager.tick(Request::Record).await.unwrap_err();
    assert!(matches!(err, LapseError::Allocation { .. }));
    assert_eq!(manager.current_speed().unwrap().get(), 1);
    assert_eq!(manager.checkpoint(), 2);

    harness.set_faults(|faults| faults.processor_fails_for_speed = None);
    adapter.submit(raw_frame(3), 3).unwrap();
    manager.tick(Request::Record).await.unwrap();
    assert_eq!(manager.current_speed().unwrap().get(), 2);
    assert_eq!(manager.checkpoint(), 4);

    // The artifact allocated for the failed standby was cleaned up.
    let orphaned = harness
        .recorder
        .snapshot()
        .into_values()
        .filter(|log| log.speed.is_none())
        .count();
    assert_eq!(orphaned, 1);
    assert_eq!(harness.recorder.live_artifacts().len(), 2);
}

#[tokio::test]
async fn encoder_error_surfaces_once_and_savers_skip_the_gap() {
    let harness = Harness::with_faults(Faults {
        encoder_error_at: Some(3),
        ..Faults::default()
    });
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();
    let current = manager.current().unwrap().artifact().clone();

    for frame_no in 0..6 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
    }
    let err = manager.tick(Request::Record).await.unwrap_err();
    assert!(matches!(err, LapseError::Encoder { .. }));
    assert_eq!(manager.highest_encoded(), Some(5));
    assert!(!manager.store().contains(3));
    assert!(manager.store().is_failed(3));

    for _ in 0..10 {
        manager.tick(Request::Record).await.unwrap();
    }
    assert_eq!(manager.current().unwrap().max_written(), Some(5));
    assert_eq!(manager.current().unwrap().frames_written(), 5);
    assert_eq!(manager.standby().unwrap().max_written(), Some(4));
    assert_eq!(harness.recorder.log(&current).frames, vec![0, 1, 2, 4, 5]);
}

#[tokio::test]
async fn transition_happens_after_failed_checkpoint_frame() {
    let harness = Harness::with_faults(Faults {
        encoder_error_at: Some(2),
        ..Faults::default()
    });
    let (mut adapter, mut manager) = harness.manager(config(2, 1, 1)).await.unwrap();
    assert_eq!(manager.checkpoint(), 2);
    let second = manager.standby().unwrap().artifact().clone();

    for frame_no in 0..=4 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        let ticked = manager.tick(Request::Record).await;
        if frame_no == 2 {
            assert!(matches!(ticked, Err(LapseError::Encoder { .. })));
            assert_eq!(manager.current_speed().unwrap().get(), 2);
            assert_eq!(manager.checkpoint(), 4);
        } else {
            ticked.unwrap();
        }
    }

    assert_eq!(manager.current_speed().unwrap().get(), 4);
    assert_eq!(manager.checkpoint(), 8);
    assert_eq!(harness.recorder.log(&second).frames, vec![0, 4]);
    // The gap is pruned with the frames no live saver needs.
    assert!(!manager.store().is_failed(2));
    assert_eq!(manager.store().frame_numbers().collect::<Vec<_>>(), vec![0, 4]);
}

#[tokio::test]
async fn end_reports_encoder_error_alongside_output() {
    let harness = Harness::with_faults(Faults {
        encoder_error_at: Some(2),
        ..Faults::default()
    });
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();

    for frame_no in 0..5 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
    }
    adapter.close().await.unwrap();
    let TickOutcome::Finished {
        artifact,
        encoder_error: Some(err),
    } = manager.tick(Request::End).await.unwrap()
    else {
        panic!("end should report the encoder error");
    };
    assert!(matches!(err, LapseError::Encoder { .. }));

    let output = harness.recorder.log(&artifact);
    assert!(output.finished);
    assert_eq!(output.frames, vec![0, 1, 3, 4]);

    manager.discard(&artifact).await.unwrap();
    assert!(harness.recorder.live_artifacts().is_empty());
}

#[tokio::test]
async fn encoder_error_takes_precedence_over_write_error() {
    let harness = Harness::with_faults(Faults {
        encoder_error_at: Some(1),
        writes_fail_for_speed: Some(1),
        ..Faults::default()
    });
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 1)).await.unwrap();

    for frame_no in 0..3 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
    }
    let first = manager.tick(Request::Record).await.unwrap_err();
    assert!(matches!(first, LapseError::Encoder { .. }));

    // The write failure was not lost; the saver retries it.
    let second = manager.tick(Request::Record).await.unwrap_err();
    assert!(matches!(second, LapseError::Processor { .. }));
    assert_eq!(manager.current().unwrap().max_written(), None);
}

#[tokio::test]
async fn initial_allocation_failure_leaves_nothing_behind() {
    let harness = Harness::with_faults(Faults {
        processor_fails_for_speed: Some(2),
        ..Faults::default()
    });
    let err = harness.manager(config(30, 30, 1)).await.unwrap_err();

    assert!(matches!(err, LapseError::Allocation { .. }));
    assert!(harness.recorder.live_artifacts().is_empty());
    let logs = harness.recorder.snapshot();
    assert_eq!(logs.len(), 2);
    assert!(logs.values().any(|log| log.speed == Some(1) && log.aborted));
}

#[tokio::test]
async fn stats_track_progress() {
    let harness = Harness::new();
    let (mut adapter, mut manager) = harness.manager(config(30, 30, 5)).await.unwrap();

    for frame_no in 0..=10 {
        adapter.submit(raw_frame(frame_no), frame_no).unwrap();
        manager.tick(Request::Record).await.unwrap();
    }
    let stats = manager.stats();
    assert_eq!(stats.current_speed, 5);
    assert_eq!(stats.checkpoint, 4500);
    assert_eq!(stats.frames_submitted, 11);
    assert_eq!(stats.highest_encoded, Some(10));
    assert_eq!(stats.frames_written, 3);
    // Multiples of 5 or 10 only, 8 bytes each.
    assert_eq!(stats.cached_frames, 3);
    assert_eq!(stats.cached_bytes, 24);
}
