//! Benchmark: framing only vs framing + field decode over a synthetic TDM stream
//! (1000 messages, three packages each: fixed fields, a repeated group, an unbounded tail).

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tmnshark::{
    decode_message, parse, read_raw_message, Message, MessageReader, Package, SchemaTables, Timestamp,
};

const SCHEMA: &str = r#"
message Bench 0x10 { destination: 239.88.1.16:50003; packages: Fixed, Group, Tail; }
package Fixed 0x101 { field 16 -> egt; field 4; field 12 -> oil; field 32 -> rpm; }
package Group 0x102 { field 12 [8] -> vib; field 8; }
package Tail 0x103 { field 16 [*] -> pcm; }
"#;

fn build_stream(messages: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for seq in 0..messages {
        let msg = Message::new(
            0x10,
            seq,
            Timestamp::new(1_700_000_000 + seq / 100, (seq % 100) * 10_000_000),
            Vec::new(),
            vec![
                Package::new(0x101, 0, 0, vec![0x12, 0x34, 0x56, 0x78, 0, 0, 0x0b, 0xb8]),
                Package::new(0x102, 0, 1_000, (0..13).map(|i| i as u8).collect()),
                Package::new(0x103, 0, 2_000, (0..256).map(|i| (i * 7) as u8).collect()),
            ],
        );
        out.extend(msg.to_bytes());
    }
    out
}

fn bench_decode_stream(c: &mut Criterion) {
    let tables = SchemaTables::build(&parse(SCHEMA).expect("schema")).expect("tables");
    let stream = build_stream(1000);

    let mut group = c.benchmark_group("decode_stream");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("raw_framing", |b| {
        b.iter(|| {
            let mut src = &stream[..];
            let mut n = 0u64;
            while let Ok(Some(m)) = read_raw_message(&mut src) {
                n += m.length_bytes as u64;
            }
            black_box(n)
        })
    });

    group.bench_function("full_framing", |b| {
        b.iter(|| black_box(MessageReader::new(&stream[..]).filter_map(Result::ok).count()))
    });

    group.bench_function("framing_and_decode", |b| {
        b.iter(|| {
            let mut samples = 0usize;
            for msg in MessageReader::new(&stream[..]).filter_map(Result::ok) {
                let result = decode_message(&tables.decoders, &msg);
                samples += result
                    .packages
                    .iter()
                    .flat_map(|p| p.measurements.values())
                    .map(Vec::len)
                    .sum::<usize>();
            }
            black_box(samples)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode_stream);
criterion_main!(benches);
