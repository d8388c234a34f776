//! Benchmarks for the codec and log reassembly
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorgraph_rs::config::LogConfig;
use sensorgraph_rs::logging::LogReassembler;
use sensorgraph_rs::protocol::sensors::{accelerometer, barometer, sensor_fusion};
use sensorgraph_rs::protocol::{Command, Packet, ProcessorConfig};

fn bench_command_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_framing");

    let config = ProcessorConfig::Average {
        output: 4,
        input: 4,
        size: 8,
    };
    let mut payload = vec![0x12, 0x01, 0xFF, 0x60];
    payload.extend(config.encode());
    let command = Command::new(0x09, 0x02, payload);
    let encoded = command.encode();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(command.encode()));
    });

    group.bench_function("decode", |b| {
        b.iter(|| black_box(Command::decode(black_box(&encoded))));
    });

    group.bench_function("processor_config_roundtrip", |b| {
        let bytes = config.encode();
        b.iter(|| black_box(ProcessorConfig::decode(black_box(&bytes))));
    });

    group.finish();
}

fn bench_signal_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_decode");

    let pressure = barometer::pressure();
    let pressure_bytes = (101_325u32 * 256).to_le_bytes();
    group.bench_function("pressure", |b| {
        b.iter(|| black_box(pressure.decode(black_box(&pressure_bytes))));
    });

    let accel = accelerometer::acceleration(accelerometer::Range::G4);
    let accel_bytes = [0x00, 0x20, 0x00, 0xE0, 0x10, 0x00];
    group.bench_function("acceleration", |b| {
        b.iter(|| black_box(accel.decode(black_box(&accel_bytes))));
    });

    let quaternion = sensor_fusion::quaternion();
    let mut quat_bytes = Vec::with_capacity(16);
    for v in [1.0f32, 0.0, 0.5, -0.5] {
        quat_bytes.extend_from_slice(&v.to_le_bytes());
    }
    group.bench_function("quaternion", |b| {
        b.iter(|| black_box(quaternion.decode(black_box(&quat_bytes))));
    });

    let notification = [0x09, 0x03, 0x00, 0x00, 0x40, 0x8C, 0x01];
    group.bench_function("packet_parse", |b| {
        b.iter(|| black_box(Packet::parse(black_box(&notification))));
    });

    group.finish();
}

/// Readout packets carrying `records` records: pressure on log id 0 and a
/// quaternion on ids 1-4, ticks rolling over partway through
fn readout_packets(records: usize) -> Vec<Vec<u8>> {
    let mut flat = Vec::with_capacity(records * 7);
    let mut tick = 0xF000u16;
    let mut written = 0;
    while written < records {
        for log_id in 0..5u8 {
            flat.push(log_id);
            flat.extend_from_slice(&tick.to_le_bytes());
            flat.extend_from_slice(&u32::from(tick).to_le_bytes());
            written += 1;
        }
        tick = tick.wrapping_add(3);
    }
    flat.chunks(14).map(<[u8]>::to_vec).collect()
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_reassembly");

    for size in [1_000usize, 10_000, 50_000].iter() {
        let packets = readout_packets(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("readout", size), &packets, |b, packets| {
            b.iter(|| {
                let mut reassembler = LogReassembler::new(
                    LogConfig::default(),
                    vec![vec![0], vec![1, 2, 3, 4]],
                );
                let mut values = 0usize;
                for packet in packets {
                    values += reassembler.push_packet(packet).len();
                }
                values += reassembler.flush().len();
                black_box(values)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_framing,
    bench_signal_decode,
    bench_reassembly,
);

criterion_main!(benches);
