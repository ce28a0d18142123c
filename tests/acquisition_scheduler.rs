//! Integration tests for the acquisition scheduler
//!
//! Timer-driven tests run on a paused clock, so every refresh interval elapses
//! deterministically.

use finesse_daq::acquisition::{AcquisitionScheduler, AcquisitionState, ScopeSettings};
use finesse_daq::hardware::mock::{MockOscilloscope, ScopeCall};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn scope() -> Arc<MockOscilloscope> {
    Arc::new(MockOscilloscope::with_settings(1e-3, 200))
}

#[tokio::test(start_paused = true)]
async fn test_loop_refreshes_until_stopped() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);

    scheduler.start_acquisition(1, 200).await.unwrap();
    assert_eq!(scheduler.state(), AcquisitionState::Running);
    assert!(scope.is_running().await);
    assert_eq!(scope.read_count(), 1);

    sleep(Duration::from_millis(1100)).await;
    assert_eq!(scope.read_count(), 6);

    scheduler.stop_acquisition();
    assert_eq!(scheduler.state(), AcquisitionState::Idle);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(scope.read_count(), 6, "stopped loop must not re-arm");
}

#[tokio::test(start_paused = true)]
async fn test_restart_never_runs_two_loops() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);

    scheduler.start_acquisition(1, 200).await.unwrap();
    scheduler.stop_acquisition();
    scheduler.start_acquisition(1, 200).await.unwrap();

    sleep(Duration::from_millis(500)).await;
    // two single shots plus refreshes at 200 and 400 ms
    assert_eq!(scope.read_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_empty_read_becomes_placeholder() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 50);
    let mut traces = scheduler.subscribe().await;

    scope.inject_empty_reads(1);
    scheduler.start_acquisition(1, 100).await.unwrap();

    let first = traces.recv().await.unwrap();
    assert_eq!(first.len(), 200);
    assert!(!first.is_flat_zero());

    let placeholder = traces.recv().await.unwrap();
    assert_eq!(placeholder.len(), 50);
    assert!(placeholder.is_flat_zero());
    assert_eq!(placeholder.time_axis()[0], 0.0);
    assert_eq!(placeholder.time_axis()[49], 1.0);

    let next = traces.recv().await.unwrap();
    assert_eq!(next.len(), 200);
    scheduler.stop_acquisition();
}

#[tokio::test(start_paused = true)]
async fn test_retrieval_error_rearms() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);

    scheduler.start_acquisition(1, 200).await.unwrap();
    scope.inject_read_failures(1);

    sleep(Duration::from_millis(500)).await;
    // the read at 200 ms failed, the one at 400 ms succeeded
    assert_eq!(scope.read_count(), 2);
    assert_eq!(scheduler.state(), AcquisitionState::Running);
    scheduler.stop_acquisition();
}

#[tokio::test]
async fn test_failed_start_stays_idle() {
    let scope = scope();
    scope.inject_read_failures(1);
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);

    assert!(scheduler.start_acquisition(1, 200).await.is_err());
    assert_eq!(scheduler.state(), AcquisitionState::Idle);
    assert!(!scope.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn test_settings_update_restarts_running_acquisition() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);
    scheduler.start_acquisition(2, 300).await.unwrap();

    let settings = ScopeSettings {
        timebase_s: 2e-3,
        record_length: 500,
        vertical_scale_v: 0.05,
    };
    scheduler.update_scope_settings(settings).await.unwrap();

    assert_eq!(
        scope.calls().await,
        vec![
            ScopeCall::RunContinuous(2),
            ScopeCall::SetTimebase(2e-3),
            ScopeCall::SetRecordLength(500),
            ScopeCall::SetVerticalScale(2, 0.05),
            ScopeCall::RunContinuous(2),
        ]
    );
    assert_eq!(scheduler.state(), AcquisitionState::Running);
    assert_eq!(scheduler.channel_and_interval().await, (2, 300));

    let latest = scheduler.latest_trace().await.unwrap();
    assert_eq!(latest.len(), 500);

    sleep(Duration::from_millis(650)).await;
    // two single shots, then refreshes at 300 and 600 ms from the restarted loop only
    assert_eq!(scope.read_count(), 4);
    scheduler.stop_acquisition();
}

#[tokio::test]
async fn test_settings_update_when_idle_pushes_directly() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);

    let settings = ScopeSettings {
        timebase_s: 5e-3,
        record_length: 1000,
        vertical_scale_v: 0.02,
    };
    scheduler.update_scope_settings(settings).await.unwrap();

    assert_eq!(
        scope.calls().await,
        vec![
            ScopeCall::SetTimebase(5e-3),
            ScopeCall::SetRecordLength(1000),
            ScopeCall::SetVerticalScale(1, 0.02),
        ]
    );
    assert_eq!(scheduler.state(), AcquisitionState::Idle);
    assert_eq!(scope.read_count(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_the_instrument() {
    let scope = scope();
    let scheduler = AcquisitionScheduler::new(scope.clone(), 200);
    scheduler.start_acquisition(1, 200).await.unwrap();

    scheduler.shutdown().await.unwrap();
    assert_eq!(scheduler.state(), AcquisitionState::Idle);
    assert!(!scope.is_running().await);
    assert_eq!(scope.calls().await.last(), Some(&ScopeCall::Stop));
}
