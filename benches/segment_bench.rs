// Benchmark for segment building and the pending queue
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use krusty_aux::motion::{MotionQueueCoordinator, Move, PrimaryScheduler};
use krusty_aux::simulator::{SimClock, SimScheduler};

fn bench_move_profile(c: &mut Criterion) {
    c.bench_function("build 10k trapezoid moves", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for i in 0..10_000 {
                let mv = Move::new(0.0, (i % 100) as f64 + 0.5, 50.0, 500.0);
                total += mv.total_t;
            }
            assert!(total > 0.0);
        });
    });
}

fn bench_batched_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    c.bench_function("queue and commit 1000 buffered moves", |b| {
        b.iter(|| {
            // SimClock reads the tokio clock, which needs a runtime context.
            let _guard = rt.enter();
            let mut sched = SimScheduler::new(SimClock::new());
            let mut coordinator = MotionQueueCoordinator::new("bench");
            for i in 0..1_000 {
                if i % 10 == 0 {
                    sched.queue_move(0.1);
                }
                coordinator.submit(Move::new(i as f64, i as f64 + 1.0, 100.0, 0.0), &mut sched);
            }
            sched.flush_lookahead();
            for fired in sched.take_fired() {
                coordinator.on_lookahead(fired.print_time, &mut sched).unwrap();
            }
            assert!(coordinator.queue().is_empty());
        });
    });
}

criterion_group!(benches, bench_move_profile, bench_batched_commit);
criterion_main!(benches);
