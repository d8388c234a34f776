//! Integration tests for route lifecycle
//!
//! These tests validate the complete route workflow against the mock board:
//! - Byte-exact creation and teardown sequences
//! - Shared root streams
//! - Unwinding a partially built route
//! - Editing named processors and stale handles after removal
//! - Live notification dispatch

mod common;

use common::builders::{notification, processor_notification};
use common::mock_helpers::{connect_board, connect_default};
use common::assert_sample_near;
use sensorgraph_rs::backend::MockBoardConfig;
use sensorgraph_rs::pipeline::{channel_handler, RouteState};
use sensorgraph_rs::protocol::sensors::{accelerometer, barometer, led};
use sensorgraph_rs::protocol::{ComparatorOp, ProcessorKind};
use sensorgraph_rs::SensorError;

#[tokio::test]
async fn test_build_and_remove_wire_order() {
    let (board, device) = connect_default().await;

    let route = device
        .route(barometer::pressure())
        .average(8)
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();

    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x09, 0x02, 0x12, 0x01, 0xFF, 0x60, 0x03, 0x0F, 0x08],
            vec![0x09, 0x07, 0x00, 0x01],
        ]
    );
    assert_eq!(route.processor_ids(), &[0]);
    assert_eq!(device.route_state(&route).await, Some(RouteState::Live));

    device.remove_route(&route).await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![vec![0x09, 0x07, 0x00, 0x00], vec![0x09, 0x06, 0x00]]
    );
    assert!(board.live_processors().is_empty());
    assert_eq!(device.route_state(&route).await, Some(RouteState::Removed));

    let err = device.remove_route(&route).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(board.writes().is_empty());
}

#[tokio::test]
async fn test_chained_route_tears_down_in_reverse() {
    let (board, device) = connect_default().await;

    let route = device
        .route(barometer::pressure())
        .average(8)
        .average(4)
        .comparator(ComparatorOp::Gt, 1000.0)
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();

    assert_eq!(route.processor_ids(), &[0, 1, 2]);
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x09, 0x02, 0x12, 0x01, 0xFF, 0x60, 0x03, 0x0F, 0x08],
            vec![0x09, 0x02, 0x09, 0x03, 0x00, 0x60, 0x03, 0x0F, 0x04],
            vec![
                0x09, 0x02, 0x09, 0x03, 0x01, 0x60, 0x06, 0x00, 0x04, 0x00, 0x00, 0xE8, 0x03, 0x00,
            ],
            vec![0x09, 0x07, 0x02, 0x01],
        ]
    );

    device.remove_route(&route).await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x09, 0x07, 0x02, 0x00],
            vec![0x09, 0x06, 0x02],
            vec![0x09, 0x06, 0x01],
            vec![0x09, 0x06, 0x00],
        ]
    );
    assert!(board.live_processors().is_empty());
}

#[tokio::test]
async fn test_multicast_route_tears_down_in_reverse() {
    let (board, device) = connect_default().await;

    let route = device
        .route(barometer::pressure())
        .average(8)
        .multicast()
        .to()
        .comparator(ComparatorOp::Gt, 1000.0)
        .stream(|_, _| {})
        .to()
        .average(4)
        .log(|_, _| {})
        .end()
        .commit()
        .await
        .unwrap();

    // parents first, siblings in declaration order, terminals after their processors
    let created = board.take_writes();
    assert_eq!(
        created,
        vec![
            vec![0x09, 0x02, 0x12, 0x01, 0xFF, 0x60, 0x03, 0x0F, 0x08],
            vec![
                0x09, 0x02, 0x09, 0x03, 0x00, 0x60, 0x06, 0x00, 0x04, 0x00, 0x00, 0xE8, 0x03, 0x00,
            ],
            vec![0x09, 0x02, 0x09, 0x03, 0x00, 0x60, 0x03, 0x0F, 0x04],
            vec![0x09, 0x07, 0x01, 0x01],
            vec![0x0B, 0x02, 0x09, 0x03, 0x02, 0x60],
        ]
    );
    assert_eq!(route.processor_ids(), &[0, 1, 2]);
    assert_eq!(route.subscription_count(), 2);
    assert_eq!(board.live_loggers(), vec![0]);

    device.remove_route(&route).await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0B, 0x03, 0x00],
            vec![0x09, 0x07, 0x01, 0x00],
            vec![0x09, 0x06, 0x02],
            vec![0x09, 0x06, 0x01],
            vec![0x09, 0x06, 0x00],
        ]
    );
    assert!(board.live_processors().is_empty());
    assert!(board.live_loggers().is_empty());
}

#[tokio::test]
async fn test_root_stream_shared_between_routes() {
    let (board, device) = connect_default().await;

    let first = device
        .route(barometer::pressure())
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();
    let second = device
        .route(barometer::pressure())
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();
    assert_eq!(board.take_writes(), vec![vec![0x12, 0x01, 0x01]]);

    device.remove_route(&first).await.unwrap();
    assert!(board.take_writes().is_empty());

    device.remove_route(&second).await.unwrap();
    assert_eq!(board.take_writes(), vec![vec![0x12, 0x01, 0x00]]);
}

#[tokio::test]
async fn test_partial_build_is_unwound() {
    let (board, device) = connect_board(MockBoardConfig {
        processor_capacity: 1,
        ..Default::default()
    })
    .await;

    let err = device
        .route(barometer::pressure())
        .average(4)
        .comparator(ComparatorOp::Gt, 1000.0)
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap_err();

    assert!(err.is_resource_exhausted(), "unexpected error: {}", err);
    let writes = board.take_writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(&writes[0][..2], &[0x09, 0x02]);
    assert_eq!(&writes[1][..2], &[0x09, 0x02]);
    assert_eq!(writes[2], vec![0x09, 0x06, 0x00]);
    assert!(board.live_processors().is_empty());

    // the failed route leaves nothing behind to snapshot
    let bytes = device.serialize().await.unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("\"routes\": []"));
}

#[tokio::test]
async fn test_edit_named_processor() {
    let (board, device) = connect_default().await;
    let route = device
        .route(barometer::pressure())
        .average(8)
        .name("smooth")
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();
    board.clear_writes();

    let mut editor = device.edit("smooth", ProcessorKind::Average).await.unwrap();
    editor.set_average_size(16).unwrap();
    editor.commit().await.unwrap();
    assert_eq!(
        board.take_writes(),
        vec![vec![0x09, 0x05, 0x00, 0x03, 0x0F, 0x10]]
    );

    editor.reset_state().await.unwrap();
    assert_eq!(&board.take_writes()[0][..3], &[0x09, 0x04, 0x00]);

    let wrong = device.edit("smooth", ProcessorKind::Comparator).await.unwrap_err();
    assert!(matches!(wrong, SensorError::InvalidConfig(_)));

    device.remove_route(&route).await.unwrap();
    board.clear_writes();

    assert!(device
        .edit("smooth", ProcessorKind::Average)
        .await
        .unwrap_err()
        .is_not_found());
    assert!(editor.commit().await.unwrap_err().is_not_found());
    assert!(board.writes().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_rejected_before_any_write() {
    let (board, device) = connect_default().await;
    device
        .route(barometer::pressure())
        .average(8)
        .name("smooth")
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap();
    board.clear_writes();

    let err = device
        .route(barometer::pressure())
        .average(4)
        .name("smooth")
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap_err();
    assert!(matches!(err, SensorError::InvalidConfig(_)));
    assert!(board.writes().is_empty());
}

#[tokio::test]
async fn test_stream_delivers_processor_output() {
    let (board, device) = connect_default().await;
    let (handler, samples) = channel_handler();
    device
        .route(barometer::pressure())
        .average(4)
        .stream(handler)
        .commit()
        .await
        .unwrap();

    let raw = 101_325u32 * 256;
    board.inject(&processor_notification(0, &raw.to_le_bytes()));

    let sample = samples.try_recv().unwrap();
    assert_sample_near(&sample, 101_325.0, 1e-3);
    assert!(sample.tick.is_none());
    assert!(samples.try_recv().is_err());
}

#[tokio::test]
async fn test_split_streams_each_axis() {
    let (board, device) = connect_default().await;
    let (x_handler, xs) = channel_handler();
    let (z_handler, zs) = channel_handler();
    let route = device
        .route(accelerometer::acceleration(accelerometer::Range::G2))
        .split()
        .index(0)
        .stream(x_handler)
        .index(2)
        .stream(z_handler)
        .end()
        .commit()
        .await
        .unwrap();
    assert_eq!(route.subscription_count(), 2);
    assert_eq!(board.take_writes(), vec![vec![0x03, 0x04, 0x01]]);

    let mut data = Vec::new();
    for axis in [16384i16, 0, -8192] {
        data.extend_from_slice(&axis.to_le_bytes());
    }
    board.inject(&notification(0x03, 0x04, &data));

    assert_sample_near(&xs.try_recv().unwrap(), 1.0, 1e-6);
    assert_sample_near(&zs.try_recv().unwrap(), -0.5, 1e-6);
}

#[tokio::test]
async fn test_react_programs_events_without_running_body() {
    let (board, device) = connect_default().await;
    device
        .route(accelerometer::step_detected())
        .react(|sink| {
            sink.submit(led::play());
        })
        .commit()
        .await
        .unwrap();

    assert_eq!(
        board.take_writes(),
        vec![
            vec![0x0A, 0x02, 0x03, 0x19, 0xFF, 0x02, 0x01, 0x01],
            vec![0x0A, 0x03, 0x01],
        ]
    );
    assert_eq!(board.live_events(), vec![0]);
}

#[tokio::test]
async fn test_packer_requires_revision() {
    use sensorgraph_rs::backend::mock_board::default_modules;
    use sensorgraph_rs::backend::ModuleInfo;
    use sensorgraph_rs::protocol::constants::MODULE_DATA_PROCESSOR;

    let modules = default_modules()
        .into_iter()
        .map(|m| {
            if m.id == MODULE_DATA_PROCESSOR {
                ModuleInfo::present(MODULE_DATA_PROCESSOR, 0, 0)
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
        .route(barometer::pressure())
        .pack(4)
        .stream(|_, _| {})
        .commit()
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
    assert!(board.writes().is_empty());
}
