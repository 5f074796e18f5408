// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Publish/receive throughput at a few payload sizes, using an
// in-process (anonymous) channel so the benchmark never touches the
// filesystem or contends with another process.
//
// Run with:
//   cargo bench --bench channel

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use achannel::{Channel, CreateAttrs, ReceiveOptions};

const SIZES: &[(&str, usize)] = &[("small_48", 48), ("medium_256", 256), ("large_4096", 4096)];

fn bench_publish_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_receive");
    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let payload = vec![b'x'; size];
        let mut buf = vec![0u8; size];

        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, _| {
            let mut channel = Channel::create(
                &format!("bench-{label}"),
                8,
                size,
                &CreateAttrs::new().with_map_anon(true),
            )
            .expect("create anonymous channel");

            b.iter(|| {
                channel.publish(black_box(&payload)).unwrap();
                let outcome = channel
                    .receive(&mut buf, None, ReceiveOptions::new().with_copy(true))
                    .unwrap();
                black_box(outcome.len)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_publish_receive);
criterion_main!(benches);
