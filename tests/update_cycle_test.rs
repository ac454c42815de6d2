/*!
 * Update Cycle Integration Tests
 */

mod common;

use common::TIMEOUT;
use frame_sync::{MainQueue, RendezvousLock, UpdateConfig, UpdateCycle};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

fn cycle(config: UpdateConfig) -> (MainQueue, UpdateCycle) {
    let queue = MainQueue::new();
    let lock = RendezvousLock::new(queue.handle());
    (queue, UpdateCycle::new(lock, config))
}

#[test]
#[serial]
fn test_assert_locks_from_env() {
    std::env::set_var("FRAME_SYNC_ASSERT_LOCKS", "1");
    assert!(UpdateConfig::from_env().assert_locks);

    std::env::set_var("FRAME_SYNC_ASSERT_LOCKS", "TRUE");
    assert!(UpdateConfig::from_env().assert_locks);

    std::env::set_var("FRAME_SYNC_ASSERT_LOCKS", "0");
    assert!(!UpdateConfig::from_env().assert_locks);

    std::env::remove_var("FRAME_SYNC_ASSERT_LOCKS");
    assert_eq!(UpdateConfig::from_env(), UpdateConfig::default());
}

#[test]
fn test_nested_updates_flush_once() {
    let (_queue, cycle) = cycle(UpdateConfig::strict());
    let log = Arc::new(Mutex::new(Vec::new()));

    cycle.perform(|| {
        let inner_log = log.clone();
        cycle.perform(|| {
            assert_eq!(cycle.depth(), 2);
            cycle.enqueue_action(move || inner_log.lock().push("deferred"));
        });
        assert_eq!(cycle.pending_actions(), 1);
        log.lock().push("outer");
    });

    assert_eq!(*log.lock(), vec!["outer", "deferred"]);
    assert!(!cycle.is_active());
}

#[test]
fn test_background_updates_apply_on_main() {
    let (queue, cycle) = cycle(UpdateConfig::strict());
    let main_id = thread::current().id();
    let applied = Arc::new(AtomicU32::new(0));
    let off_main = Arc::new(AtomicU32::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let cycle = cycle.clone();
            let applied = applied.clone();
            let off_main = off_main.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let applied = applied.clone();
                    let off_main = off_main.clone();
                    cycle.enqueue_action(move || {
                        if thread::current().id() != main_id {
                            off_main.fetch_add(1, Ordering::SeqCst);
                        }
                        applied.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert!(queue.run_until(TIMEOUT, || applied.load(Ordering::SeqCst) == 40));
    assert_eq!(off_main.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_main_from_worker() {
    let (queue, cycle) = cycle(UpdateConfig::default());
    let main_id = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));

    let worker = {
        let cycle = cycle.clone();
        let ran_on = ran_on.clone();
        thread::spawn(move || {
            cycle.sync_main(move || *ran_on.lock() = Some(thread::current().id()));
        })
    };

    assert!(queue.run_until(TIMEOUT, || worker.is_finished()));
    worker.join().unwrap();
    assert_eq!(*ran_on.lock(), Some(main_id));
}

#[test]
fn test_sync_main_on_main_runs_inline() {
    let (_queue, cycle) = cycle(UpdateConfig::default());
    let main_id = thread::current().id();
    let ran_on = Arc::new(Mutex::new(None));

    let r = ran_on.clone();
    cycle.sync_main(move || *r.lock() = Some(thread::current().id()));

    // No queue pump needed on the main thread
    assert_eq!(*ran_on.lock(), Some(main_id));
}

#[test]
fn test_can_dispatch_only_at_outermost_depth() {
    let (_queue, cycle) = cycle(UpdateConfig::strict());
    let ran = Arc::new(AtomicU32::new(0));

    cycle.begin();
    cycle.begin();
    let r = ran.clone();
    cycle.enqueue_action(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!cycle.can_dispatch());

    cycle.end();
    assert!(cycle.can_dispatch());
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    cycle.end();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!cycle.is_owner());
}

#[test]
fn test_dispatch_immediately_is_not_updating() {
    let (_queue, cycle) = cycle(UpdateConfig::strict());
    let seen = cycle.ensure(|| {
        let outer = cycle.thread_is_updating();
        let inner = cycle.dispatch_immediately(|| cycle.thread_is_updating());
        (outer, inner)
    });
    assert_eq!(seen, (true, false));
}
