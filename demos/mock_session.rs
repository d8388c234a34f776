//! Mock board session
//!
//! Builds a few routes against the in-process mock board, logs some data,
//! downloads it back and saves a snapshot of the graph.
//!
//! Run with: cargo run --example mock_session

use std::sync::Arc;

use anyhow::Context;
use sensorgraph_rs::{
    backend::MockBoard,
    config::{default_config_path, DeviceConfig},
    pipeline::channel_handler,
    protocol::sensors::{accelerometer, barometer, led},
    protocol::{ComparatorOp, ProcessorKind},
    Device, TimerSpec,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sensorgraph_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match default_config_path() {
        Some(path) => {
            tracing::info!("Loading config from {:?}", path);
            DeviceConfig::load_or_default(path)
        }
        None => DeviceConfig::default(),
    };

    let board = Arc::new(MockBoard::new());
    let device = Device::connect(board.clone(), config)
        .await
        .context("connecting to mock board")?;

    // Smoothed pressure, streamed and compared against sea level
    let (handler, pressures) = channel_handler();
    let pressure_route = device
        .route(barometer::pressure())
        .average(8)
        .name("smooth")
        .multicast()
        .to()
        .stream(handler)
        .to()
        .comparator(ComparatorOp::Gt, 101_325.0)
        .log(|sample, _| tracing::info!("Above sea level at tick {:?}", sample.tick))
        .end()
        .commit()
        .await?;
    tracing::info!(
        "Pressure route {} uses processors {:?}",
        pressure_route.id(),
        pressure_route.processor_ids()
    );

    // Blink on every step without involving the host
    device
        .route(accelerometer::step_detected())
        .react(|sink| {
            sink.submit(led::play());
        })
        .commit()
        .await?;

    let task = device
        .schedule(TimerSpec::every(1000), |sink| {
            sink.submit(led::stop(false));
        })
        .await?;
    device.start_timer(&task).await?;

    let mut editor = device.edit("smooth", ProcessorKind::Average).await?;
    editor.set_average_size(16)?;
    editor.commit().await?;

    // Simulated notification from the averaging processor
    let raw = 101_500u32 * 256;
    let mut packet = vec![0x09, 0x03, pressure_route.processor_ids()[0]];
    packet.extend_from_slice(&raw.to_le_bytes());
    board.inject(&packet);
    for sample in pressures.try_iter() {
        tracing::info!("Pressure {}", sample.value);
    }

    let report = device
        .download_logs(Some(Box::new(|remaining, total| {
            tracing::info!("Log readout {}/{}", total.saturating_sub(remaining), total);
        })))
        .await?;
    tracing::info!("Downloaded {} value(s)", report.values());

    let snapshot = device.serialize().await?;
    let path = std::env::temp_dir().join("sensorgraph-snapshot.json");
    std::fs::write(&path, &snapshot).with_context(|| format!("writing {:?}", path))?;
    tracing::info!("Saved {} byte snapshot to {:?}", snapshot.len(), path);

    let stats = device.stats();
    tracing::info!(
        "{} command(s) sent, {} response(s), avg latency {:.1}us",
        stats.commands_sent,
        stats.responses,
        stats.avg_latency_us()
    );
    Ok(())
}
