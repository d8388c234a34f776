//! Test data builders for board-side packets and log contents

use sensorgraph_rs::backend::mock_board::MockLogRecord;
use sensorgraph_rs::protocol::constants::*;

/// Builder for the records one logged value occupies on the board
pub struct LogValueBuilder {
    log_ids: Vec<u8>,
    tick: u16,
    bytes: Vec<u8>,
}

impl LogValueBuilder {
    pub fn new(log_ids: &[u8]) -> Self {
        Self {
            log_ids: log_ids.to_vec(),
            tick: 0,
            bytes: Vec::new(),
        }
    }

    pub fn tick(mut self, tick: u16) -> Self {
        self.tick = tick;
        self
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.bytes = bytes.to_vec();
        self
    }

    pub fn u32(self, value: u32) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn quaternion(self, w: f32, x: f32, y: f32, z: f32) -> Self {
        let mut bytes = Vec::with_capacity(16);
        for v in [w, x, y, z] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.bytes(&bytes)
    }

    /// One record per log id, each holding the next 4-byte slice
    pub fn build(self) -> Vec<MockLogRecord> {
        self.log_ids
            .iter()
            .enumerate()
            .map(|(slot, &log_id)| {
                let mut payload = [0u8; LOG_RECORD_PAYLOAD];
                for (i, byte) in payload.iter_mut().enumerate() {
                    *byte = self
                        .bytes
                        .get(slot * LOG_RECORD_PAYLOAD + i)
                        .copied()
                        .unwrap_or(0);
                }
                MockLogRecord {
                    log_id,
                    tick: self.tick,
                    payload,
                }
            })
            .collect()
    }
}

/// `[0x09, 0x03, id, data...]` as sent by a processor with notifications on
pub fn processor_notification(id: u8, data: &[u8]) -> Vec<u8> {
    let mut packet = vec![MODULE_DATA_PROCESSOR, DP_NOTIFY, id];
    packet.extend_from_slice(data);
    packet
}

/// Root signal notification `[module, register, data...]`
pub fn notification(module: u8, register: u8, data: &[u8]) -> Vec<u8> {
    let mut packet = vec![module, register];
    packet.extend_from_slice(data);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quaternion_spans_four_records() {
        let records = LogValueBuilder::new(&[0, 1, 2, 3])
            .tick(7)
            .quaternion(1.0, 0.0, 0.0, 0.0)
            .build();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].payload, 1.0f32.to_le_bytes());
        assert!(records.iter().all(|r| r.tick == 7));
    }
}
