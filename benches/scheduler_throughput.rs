//! Scheduler throughput benchmarks.
//!
//! Measures batch submission latency across worker counts and batch
//! sizes, plus the raw cost of one admission-pool push.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bidmatch_core::protocol::{MessageType, RequestHeader};
use bidmatch_core::scheduler::{
    AdmissionTicket, ControllerConfig, ObjectKind, Runnable, SessionPool, TaskController,
};
use bidmatch_core::strategy::{BidTable, MatchStrategy};

fn batch_of(rows: usize) -> String {
    (0..rows)
        .map(|i| format!("keyword-{} filler text {}", i % 64, i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn sample_bids() -> BidTable {
    let mut table = BidTable::new();
    for i in 0..64 {
        table.insert(&format!("keyword-{i}"), &format!("ad-{i}"), 1000 + i as u64);
    }
    table
}

fn bench_batch_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_submit");

    for workers in [1, 2, 4] {
        for rows in [64, 1024] {
            let controller = TaskController::new(
                ControllerConfig::with_threads(workers),
                MatchStrategy::AdMatch(sample_bids()),
            );
            let raw = batch_of(rows);
            let header = RequestHeader::for_batch(MessageType::BidRequest, raw.len());

            group.throughput(Throughput::Elements(rows as u64));
            group.bench_function(
                BenchmarkId::new(format!("workers_{workers}"), rows),
                |b| {
                    b.iter(|| {
                        let response = controller
                            .submit_task(black_box(&header), black_box(raw.as_bytes()))
                            .unwrap();
                        black_box(response);
                    })
                },
            );
            controller.stop();
        }
    }

    group.finish();
}

struct NopSession;

impl Runnable for NopSession {
    fn kind(&self) -> ObjectKind {
        ObjectKind::TcpSession
    }

    fn start(&mut self, _ticket: &AdmissionTicket) -> bool {
        true
    }

    fn run(&mut self) {}
}

fn bench_pool_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_push");

    let pool = SessionPool::new(1024, 4);
    group.throughput(Throughput::Elements(1));
    group.bench_function("session_push", |b| {
        b.iter(|| {
            let ticket = pool.push(Box::new(NopSession));
            black_box(ticket.status());
        })
    });
    pool.stop();

    group.finish();
}

criterion_group!(benches, bench_batch_submit, bench_pool_push);
criterion_main!(benches);
