/*!
 * Frame Sync - Demo Entry Point
 *
 * Drives two listeners off a software refresh signal:
 * - Each listener re-arms itself for a fixed number of frames
 * - Frame results are handed to the main thread as update actions
 * - A worker thread performs a blocking call onto the main thread
 */

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use frame_sync::{
    init_tracing, Deadline, DeviceId, IntervalTimerConfig, IntervalTimerFactory, MainQueue,
    RendezvousLock, SignalConfig, SignalRegistry, UpdateConfig, UpdateCycle,
};

const FRAMES_PER_LISTENER: u32 = 30;
const RUN_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    info!("Frame sync demo starting...");
    info!("================================================");

    let main_queue = MainQueue::new();
    let lock = RendezvousLock::new(main_queue.handle());
    let cycle = UpdateCycle::new(lock.clone(), UpdateConfig::from_env());

    let factory = IntervalTimerFactory::new(IntervalTimerConfig::default());
    let registry = SignalRegistry::new(Arc::new(factory), SignalConfig::default());
    let device = DeviceId(0);

    let applied = Arc::new(AtomicU32::new(0));
    let mut listeners = Vec::new();
    let mut remaining = Vec::new();

    for name in ["renderer", "animator"] {
        let left = Arc::new(AtomicU32::new(FRAMES_PER_LISTENER));
        let callback_left = left.clone();
        let callback_cycle = cycle.clone();
        let callback_applied = applied.clone();

        let handle = registry
            .try_subscribe(device, move |handle, timestamp| {
                let frame = FRAMES_PER_LISTENER - callback_left.load(Ordering::SeqCst) + 1;
                let applied = callback_applied.clone();
                callback_cycle.enqueue_action(move || {
                    applied.fetch_add(1, Ordering::SeqCst);
                    tracing::trace!(listener = name, frame, %timestamp, "Frame applied");
                });

                if callback_left.fetch_sub(1, Ordering::SeqCst) > 1 {
                    handle.set_next_deadline(Deadline::asap());
                } else {
                    info!(listener = name, "Listener finished");
                }
            })?;

        handle.set_next_deadline(Deadline::asap());
        info!(listener = name, subscription = %handle.id(), "Listener subscribed");
        listeners.push(handle);
        remaining.push(left);
    }

    let rendezvous_done = Arc::new(AtomicBool::new(false));
    let worker = {
        let lock = lock.clone();
        let done = rendezvous_done.clone();
        thread::Builder::new()
            .name("frame-sync.worker".into())
            .spawn(move || {
                let ran_on = lock.sync_on_main(|| {
                    thread::current().name().unwrap_or("unnamed").to_string()
                });
                info!(ran_on = %ran_on, "Cross-thread call completed on main thread");
                done.store(true, Ordering::SeqCst);
            })?
    };

    let expected = FRAMES_PER_LISTENER * listeners.len() as u32;
    let finished = main_queue.run_until(RUN_TIMEOUT, || {
        rendezvous_done.load(Ordering::SeqCst) && applied.load(Ordering::SeqCst) >= expected
    });
    if worker.join().is_err() {
        warn!("Worker thread panicked");
    }

    if let Some(stats) = registry.stats(device) {
        info!(
            ticks = stats.ticks_dispatched,
            coalesced = stats.ticks_coalesced,
            callbacks = stats.callbacks_invoked,
            source_paused = stats.source_paused,
            "Display statistics"
        );
    }

    for handle in &listeners {
        handle.unsubscribe();
    }
    registry.shutdown();

    info!("================================================");
    info!(
        completed = finished,
        frames_applied = applied.load(Ordering::SeqCst),
        frames_expected = expected,
        "Frame sync demo finished"
    );

    if !finished {
        let left: Vec<u32> = remaining.iter().map(|l| l.load(Ordering::SeqCst)).collect();
        warn!(?left, "Demo timed out before all frames were applied");
    }
    Ok(())
}
