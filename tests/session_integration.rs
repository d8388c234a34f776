//! Integration tests for on-board automation
//!
//! These tests validate recorded command bodies:
//! - Macros store their body without running it
//! - Timers allocate from a bounded table and program one event per command
//! - Sensor helpers produce the documented byte layouts

mod common;

use common::mock_helpers::{connect_board, connect_default};
use sensorgraph_rs::backend::mock_board::default_modules;
use sensorgraph_rs::backend::{MockBoardConfig, ModuleInfo};
use sensorgraph_rs::protocol::constants::*;
use sensorgraph_rs::protocol::sensors::accelerometer::{StepDetectorConfig, StepMode};
use sensorgraph_rs::protocol::sensors::led;
use sensorgraph_rs::{Command, TimerSpec};

#[tokio::test]
async fn test_macro_body_is_stored_not_executed() {
    let (board, device) = connect_default().await;
    let long = Command::new(0x02, 0x03, vec![0xAA; 18]);

    let id = device
        .record_macro(true, |sink| {
            sink.submit(led::play());
            sink.submit(long.clone());
        })
        .await
        .unwrap();

    assert_eq!(id, 0);
    let mut tail = vec![0x0F, 0x03];
    tail.extend(vec![0xAA; 18]);
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0F, 0x02, 0x01],
            vec![0x0F, 0x03, 0x02, 0x01, 0x01],
            vec![0x0F, 0x09, 0x02, 0x03],
            tail,
            vec![0x0F, 0x04],
        ]
    );

    device.execute_macro(id).await.unwrap();
    device.remove_macro(id).await.unwrap();
    device.erase_macros().await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![vec![0x0F, 0x05, 0x00], vec![0x0F, 0x0A, 0x00], vec![0x0F, 0x08]]
    );
    assert!(board.live_macros().is_empty());
}

#[tokio::test]
async fn test_timer_lifecycle() {
    let (board, device) = connect_default().await;
    let task = device
        .schedule(TimerSpec::every(1000), |sink| {
            sink.submit(led::play());
        })
        .await
        .unwrap();

    assert_eq!(task.id(), 0);
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0C, 0x02, 0xE8, 0x03, 0x00, 0x00, 0xFF, 0xFF, 0x00],
            vec![0x0A, 0x02, 0x0C, 0x06, 0x00, 0x02, 0x01, 0x01],
            vec![0x0A, 0x03, 0x01],
        ]
    );

    device.start_timer(&task).await.unwrap();
    device.stop_timer(&task).await.unwrap();
    device.remove_timer(&task).await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0C, 0x03, 0x00],
            vec![0x0C, 0x04, 0x00],
            vec![0x0A, 0x04, 0x00],
            vec![0x0C, 0x05, 0x00],
        ]
    );
    assert!(board.live_timers().is_empty());
    assert!(board.live_events().is_empty());

    assert!(device.start_timer(&task).await.unwrap_err().is_not_found());
    assert!(device.remove_timer(&task).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_full_timer_table_is_exhausted() {
    let (board, device) = connect_board(MockBoardConfig {
        timer_capacity: 1,
        ..Default::default()
    })
    .await;

    device
        .schedule(TimerSpec::every(100), |_| {})
        .await
        .unwrap();
    board.clear_writes();

    let err = device
        .schedule(TimerSpec::every(100).times(3), |sink| {
            sink.submit(led::play());
        })
        .await
        .unwrap_err();
    assert!(err.is_resource_exhausted(), "unexpected error: {}", err);
    // only the unanswered create went out
    assert_eq!(board.take_writes().len(), 1);
    assert_eq!(board.live_timers(), vec![0]);
}

#[tokio::test]
async fn test_timer_removed_when_events_run_out() {
    let (board, device) = connect_board(MockBoardConfig {
        event_capacity: 0,
        ..Default::default()
    })
    .await;

    let err = device
        .schedule(TimerSpec::every(250), |sink| {
            sink.submit(led::play());
        })
        .await
        .unwrap_err();
    assert!(err.is_resource_exhausted());

    let writes = board.take_writes();
    assert_eq!(writes.last(), Some(&vec![0x0C, 0x05, 0x00]));
    assert!(board.live_timers().is_empty());
}

#[tokio::test]
async fn test_step_detector_layout() {
    let (board, device) = connect_default().await;
    device
        .configure_step_detector(StepDetectorConfig::new(StepMode::Normal, false))
        .await
        .unwrap();
    device
        .configure_step_detector(StepDetectorConfig::new(StepMode::Normal, true))
        .await
        .unwrap();
    assert_eq!(
        board.take_writes(),
        vec![vec![0x03, 0x18, 0x15, 0x03], vec![0x03, 0x18, 0x15, 0x0B]]
    );

    board.set_step_count(42);
    assert_eq!(device.read_step_count().await.unwrap(), 42);
}

#[tokio::test]
async fn test_step_detector_needs_bmi160() {
    let modules = default_modules()
        .into_iter()
        .map(|m| {
            if m.id == MODULE_ACCELEROMETER {
                ModuleInfo::present(MODULE_ACCELEROMETER, 0, 0)
            } else {
                m
            }
        })
        .collect();
    let (board, device) = connect_board(MockBoardConfig {
        modules,
        ..Default::default()
    })
    .await;

    let err = device
        .configure_step_detector(StepDetectorConfig::default())
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
    assert!(device.read_step_count().await.unwrap_err().is_unsupported());
    assert!(board.writes().is_empty());
}

#[tokio::test]
async fn test_logging_controls() {
    let (board, device) = connect_default().await;
    device.start_logging(true).await.unwrap();
    assert!(board.is_logging());
    device.stop_logging().await.unwrap();
    assert!(!board.is_logging());
    device.clear_log().await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0B, 0x0B, 0x01],
            vec![0x0B, 0x01, 0x01],
            vec![0x0B, 0x01, 0x00],
            vec![0x0B, 0x09, 0xFF, 0xFF, 0xFF, 0xFF],
        ]
    );
}
