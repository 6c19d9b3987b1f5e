//! Benchmarks for the ready queue and the partition allocator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use psp_kernel::{AllocDirection, Partition, ReadyQueue};

fn bench_ready_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_queue");

    for threads in [8u32, 32, 128].iter() {
        group.bench_with_input(BenchmarkId::new("insert_pop", threads), threads, |b, &threads| {
            b.iter(|| {
                let mut queue = ReadyQueue::new();
                for id in 1..=threads {
                    queue.insert(id, 0x10 + id % 0x20).unwrap();
                }
                while let Some(entry) = queue.pop_head() {
                    black_box(entry);
                }
            });
        });
    }

    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");

    for blocks in [16usize, 64, 256].iter() {
        group.bench_with_input(BenchmarkId::new("alloc_free", blocks), blocks, |b, &blocks| {
            b.iter(|| {
                let mut partition = Partition::new(2, "user", 0x0880_0000, 0x180_0000);
                let allocated: Vec<_> = (0..blocks)
                    .map(|i| {
                        let direction = if i % 2 == 0 {
                            AllocDirection::Low
                        } else {
                            AllocDirection::High
                        };
                        partition.allocate("bench", direction, 0x100, 0x1000).unwrap()
                    })
                    .collect();
                for block in allocated.iter().rev() {
                    partition.free(block).unwrap();
                }
                black_box(partition.free_bytes());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ready_queue, bench_partition);
criterion_main!(benches);
