/*!
 * Interval Source
 *
 * Software stand-in for a display's hardware refresh signal: one named
 * thread per source ticking at a fixed interval. Paused sources park on a
 * condvar instead of spinning.
 */

use crate::core::errors::{SignalError, SignalResult};
use crate::core::limits::{DEFAULT_REFRESH_INTERVAL, INTERVAL_TIMER_PREFIX};
use crate::core::time::Timestamp;
use crate::display::traits::{TickHandler, TickHandlerRef, TimerSource, TimerSourceFactory};
use crate::display::types::DeviceId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTimerConfig {
    pub refresh_interval: Duration,
}

impl Default for IntervalTimerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl IntervalTimerConfig {
    pub fn with_refresh_rate(hz: u32) -> Self {
        Self {
            refresh_interval: Duration::from_nanos(1_000_000_000 / u64::from(hz.max(1))),
        }
    }
}

/// Fixed-interval sources, one thread each
#[derive(Debug, Clone, Default)]
pub struct IntervalTimerFactory {
    config: IntervalTimerConfig,
}

impl IntervalTimerFactory {
    pub fn new(config: IntervalTimerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> IntervalTimerConfig {
        self.config
    }
}

impl TimerSourceFactory for IntervalTimerFactory {
    fn create(&self, device: DeviceId, handler: TickHandlerRef) -> SignalResult<Box<dyn TimerSource>> {
        let interval = self.config.refresh_interval.max(Duration::from_micros(100));
        let source = IntervalSource::spawn(device, interval, handler)?;
        debug!(device = %device, interval_us = interval.as_micros() as u64, "Interval source created");
        Ok(Box::new(source))
    }
}

#[derive(Default)]
struct ControlState {
    started: bool,
    paused: bool,
    released: bool,
}

#[derive(Default)]
struct Control {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl Control {
    fn run(&self, interval: Duration, handler: TickHandlerRef) {
        let mut next = Instant::now() + interval;
        let mut state = self.state.lock();

        loop {
            if state.released {
                return;
            }
            if !state.started || state.paused {
                self.changed.wait(&mut state);
                next = Instant::now() + interval;
                continue;
            }

            if self.changed.wait_until(&mut state, next).timed_out() {
                if state.released || state.paused {
                    continue;
                }
                drop(state);
                handler.on_tick(Timestamp::now());
                next += interval;
                // Skip missed ticks rather than bursting to catch up
                let now = Instant::now();
                if next <= now {
                    next = now + interval;
                }
                state = self.state.lock();
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut ControlState)) {
        f(&mut *self.state.lock());
        self.changed.notify_all();
    }
}

struct IntervalSource {
    device: DeviceId,
    control: Arc<Control>,
    thread: Option<JoinHandle<()>>,
}

impl IntervalSource {
    fn spawn(device: DeviceId, interval: Duration, handler: TickHandlerRef) -> SignalResult<Self> {
        let control = Arc::new(Control::default());
        let worker = control.clone();

        let thread = thread::Builder::new()
            .name(format!("{}.{}", INTERVAL_TIMER_PREFIX, device.0))
            .spawn(move || worker.run(interval, handler))
            .map_err(|e| SignalError::SourceCreation {
                device: device.0,
                reason: e.to_string(),
            })?;

        Ok(Self {
            device,
            control,
            thread: Some(thread),
        })
    }

    /// Fail control calls once the tick thread can no longer act on them
    fn ensure_live(&self) -> SignalResult<()> {
        let reason = if self.control.state.lock().released {
            "source released"
        } else if self.thread.as_ref().map_or(true, JoinHandle::is_finished) {
            "tick thread exited"
        } else {
            return Ok(());
        };
        Err(SignalError::SourceControl {
            device: self.device.0,
            reason: reason.to_string(),
        })
    }

    fn stop(&mut self) {
        self.control.update(|state| state.released = true);
        if let Some(thread) = self.thread.take() {
            // The last manager reference may be dropped on the tick thread itself
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!(device = %self.device, "Interval source thread panicked");
            }
        }
    }
}

impl TimerSource for IntervalSource {
    fn start(&mut self) -> SignalResult<()> {
        self.ensure_live()?;
        self.control.update(|state| state.started = true);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> SignalResult<()> {
        self.ensure_live()?;
        self.control.update(|state| state.paused = paused);
        Ok(())
    }

    fn release(mut self: Box<Self>) {
        self.stop();
        debug!(device = %self.device, "Interval source released");
    }
}

impl Drop for IntervalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler() -> (TickHandlerRef, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: TickHandlerRef = Arc::new(move |_: Timestamp| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[test]
    fn test_ticks_only_after_start() {
        let factory = IntervalTimerFactory::new(IntervalTimerConfig {
            refresh_interval: Duration::from_millis(2),
        });
        let (handler, count) = counting_handler();
        let mut source = factory.create(DeviceId(0), handler).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        source.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline, "interval source never ticked");
            thread::sleep(Duration::from_millis(1));
        }
        source.release();
    }

    #[test]
    fn test_pause_stops_ticks() {
        let factory = IntervalTimerFactory::new(IntervalTimerConfig::with_refresh_rate(500));
        let (handler, count) = counting_handler();
        let mut source = factory.create(DeviceId(1), handler).unwrap();
        source.start().unwrap();
        source.set_paused(true).unwrap();

        // A tick already past its wait may still land
        thread::sleep(Duration::from_millis(10));
        let settled = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), settled);
        source.release();
    }

    #[test]
    fn test_control_after_stop_fails() {
        let (handler, _count) = counting_handler();
        let mut source = IntervalSource::spawn(DeviceId(2), Duration::from_millis(1), handler).unwrap();
        source.start().unwrap();
        source.stop();

        match source.set_paused(true) {
            Err(SignalError::SourceControl { device, reason }) => {
                assert_eq!(device, 2);
                assert_eq!(reason, "source released");
            }
            other => panic!("expected SourceControl, got {:?}", other),
        }
        assert!(matches!(source.start(), Err(SignalError::SourceControl { .. })));
    }

    #[test]
    fn test_control_after_tick_thread_exit_fails() {
        let handler: TickHandlerRef = Arc::new(|_: Timestamp| panic!("tick handler failed"));
        let mut source = IntervalSource::spawn(DeviceId(3), Duration::from_millis(1), handler).unwrap();
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !source.thread.as_ref().is_some_and(JoinHandle::is_finished) {
            assert!(Instant::now() < deadline, "tick thread never exited");
            thread::sleep(Duration::from_millis(1));
        }

        match source.set_paused(false) {
            Err(SignalError::SourceControl { reason, .. }) => assert_eq!(reason, "tick thread exited"),
            other => panic!("expected SourceControl, got {:?}", other),
        }
    }
}
