//! Mock construction helpers

use std::sync::Arc;

use sensorgraph_rs::backend::mock_board::{default_modules, MockBoard, MockBoardConfig};
use sensorgraph_rs::backend::ModuleInfo;
use sensorgraph_rs::config::DeviceConfig;
use sensorgraph_rs::Device;

use super::{test_idle_timeout, test_timeout};

/// Route tracing output through the test harness once per binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("sensorgraph_rs=debug"))
        .with_test_writer()
        .try_init();
}

/// Device config with a short response deadline
pub fn test_config() -> DeviceConfig {
    DeviceConfig {
        response_timeout_ms: test_timeout().as_millis() as u64,
        download_idle_timeout_ms: test_idle_timeout().as_millis() as u64,
        ..Default::default()
    }
}

/// Board config with everything default except the given modules missing
pub fn board_without(modules: &[u8]) -> MockBoardConfig {
    MockBoardConfig {
        modules: default_modules()
            .into_iter()
            .filter(|m: &ModuleInfo| !modules.contains(&m.id))
            .collect(),
        ..Default::default()
    }
}

/// Connect to a fresh board and clear the discovery writes
pub async fn connect_board(config: MockBoardConfig) -> (Arc<MockBoard>, Device) {
    init_tracing();
    let board = Arc::new(MockBoard::with_config(config));
    let device = Device::connect(board.clone(), test_config())
        .await
        .expect("connect to mock board");
    board.clear_writes();
    (board, device)
}

pub async fn connect_default() -> (Arc<MockBoard>, Device) {
    connect_board(MockBoardConfig::default()).await
}
