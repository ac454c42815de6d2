/*!
 * Rendezvous Lock and Tick Dispatch Benchmarks
 *
 * Uncontended reentrant locking, main-thread round trips and per-tick
 * fan-out across subscriber counts.
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use frame_sync::{
    Deadline, DeviceId, MainQueue, ManualTimerFactory, RendezvousLock, SignalConfig,
    SignalRegistry, Timestamp,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn bench_reentrant_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendezvous_lock");
    let queue = MainQueue::new();
    let lock = RendezvousLock::new(queue.handle());

    for depth in [1u32, 4, 16] {
        group.bench_with_input(BenchmarkId::new("lock_unlock", depth), &depth, |b, &depth| {
            b.iter(|| {
                for _ in 0..depth {
                    lock.lock();
                }
                black_box(lock.depth());
                for _ in 0..depth {
                    lock.unlock();
                }
            });
        });
    }

    group.finish();
}

fn bench_sync_on_main(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_on_main");
    let queue = MainQueue::new();
    let stop = Arc::new(AtomicBool::new(false));

    // A dedicated thread plays the main thread and pumps its queue
    let (lock_tx, lock_rx) = flume::bounded(1);
    let main = {
        let queue = queue.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let lock = RendezvousLock::new(queue.handle());
            lock_tx.send(lock).unwrap();
            while !stop.load(Ordering::SeqCst) {
                queue.run_until(Duration::from_millis(50), || stop.load(Ordering::SeqCst));
            }
        })
    };
    let lock: RendezvousLock = lock_rx.recv().unwrap();

    group.bench_function("round_trip", |b| {
        b.iter(|| black_box(lock.sync_on_main(|| 42u64)));
    });

    group.finish();
    stop.store(true, Ordering::SeqCst);
    main.join().unwrap();
}

fn bench_tick_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_fan_out");
    let device = DeviceId(0);

    for subscribers in [1usize, 8, 64] {
        let factory = ManualTimerFactory::new();
        let registry = SignalRegistry::new(Arc::new(factory.clone()), SignalConfig::sticky());
        let delivered = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..subscribers)
            .map(|_| {
                let delivered = delivered.clone();
                registry
                    .subscribe(device, move |handle, _| {
                        delivered.fetch_add(1, Ordering::Relaxed);
                        handle.set_next_deadline(Deadline::asap());
                    })
                    .unwrap()
            })
            .collect();
        for handle in &handles {
            handle.set_next_deadline(Deadline::asap());
        }

        let mut ts = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &subscribers, |b, _| {
            b.iter(|| {
                ts += 1;
                factory.fire(device, Timestamp(ts));
                registry.flush(device, Duration::from_secs(1));
            });
        });

        black_box(delivered.load(Ordering::Relaxed));
        registry.shutdown();
    }

    group.finish();
}

criterion_group!(benches, bench_reentrant_lock, bench_sync_on_main, bench_tick_fan_out);
criterion_main!(benches);
