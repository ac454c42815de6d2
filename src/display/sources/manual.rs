/*!
 * Manual Source
 * Test-driven periodic source: ticks fire only when asked
 */

use crate::core::errors::{SignalError, SignalResult};
use crate::core::time::Timestamp;
use crate::display::traits::{TickHandler, TickHandlerRef, TimerSource, TimerSourceFactory};
use crate::display::types::DeviceId;
use ahash::RandomState;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Observable state of one device's most recent source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManualDisplayState {
    /// Created and not yet released
    pub live: bool,
    pub started: bool,
    pub paused: bool,
    pub creates: u32,
    pub starts: u32,
    pub pauses: u32,
    pub resumes: u32,
    pub releases: u32,
}

struct DisplaySlot {
    state: ManualDisplayState,
    /// Bumped per create; stale sources ignore control calls
    generation: u64,
    handler: Option<TickHandlerRef>,
}

#[derive(Default)]
struct ManualState {
    displays: HashMap<DeviceId, DisplaySlot, RandomState>,
    failing: HashSet<DeviceId, RandomState>,
}

/// Factory whose sources tick only through [`fire`](Self::fire)
///
/// Clones share state, so a test can keep one clone while the registry owns
/// another.
#[derive(Clone, Default)]
pub struct ManualTimerFactory {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one tick on the calling thread
    ///
    /// Returns `false` (and delivers nothing) unless the device's source is
    /// live, started and not paused.
    pub fn fire(&self, device: DeviceId, timestamp: Timestamp) -> bool {
        let handler = {
            let state = self.state.lock();
            match state.displays.get(&device) {
                Some(slot) if slot.state.live && slot.state.started && !slot.state.paused => {
                    slot.handler.clone()
                }
                _ => None,
            }
        };

        match handler {
            Some(handler) => {
                handler.on_tick(timestamp);
                true
            }
            None => {
                trace!(device = %device, "Manual tick dropped; source inactive");
                false
            }
        }
    }

    /// Make every later `create` for `device` fail
    pub fn fail_device(&self, device: DeviceId) {
        self.state.lock().failing.insert(device);
    }

    pub fn restore_device(&self, device: DeviceId) {
        self.state.lock().failing.remove(&device);
    }

    pub fn display(&self, device: DeviceId) -> Option<ManualDisplayState> {
        self.state.lock().displays.get(&device).map(|slot| slot.state)
    }

    pub fn is_paused(&self, device: DeviceId) -> bool {
        self.display(device).is_some_and(|state| state.paused)
    }

    pub fn is_live(&self, device: DeviceId) -> bool {
        self.display(device).is_some_and(|state| state.live)
    }
}

impl TimerSourceFactory for ManualTimerFactory {
    fn create(&self, device: DeviceId, handler: TickHandlerRef) -> SignalResult<Box<dyn TimerSource>> {
        let mut state = self.state.lock();
        if state.failing.contains(&device) {
            return Err(SignalError::SourceCreation {
                device: device.0,
                reason: "display unavailable".into(),
            });
        }

        let slot = state.displays.entry(device).or_insert_with(|| DisplaySlot {
            state: ManualDisplayState::default(),
            generation: 0,
            handler: None,
        });
        slot.generation += 1;
        slot.handler = Some(handler);
        slot.state.live = true;
        slot.state.started = false;
        slot.state.paused = false;
        slot.state.creates += 1;

        Ok(Box::new(ManualSource {
            device,
            generation: slot.generation,
            shared: self.state.clone(),
        }))
    }
}

struct ManualSource {
    device: DeviceId,
    generation: u64,
    shared: Arc<Mutex<ManualState>>,
}

impl ManualSource {
    fn with_slot(&self, f: impl FnOnce(&mut DisplaySlot)) {
        let mut state = self.shared.lock();
        if let Some(slot) = state.displays.get_mut(&self.device) {
            if slot.generation == self.generation {
                f(slot);
            }
        }
    }
}

impl TimerSource for ManualSource {
    fn start(&mut self) -> SignalResult<()> {
        self.with_slot(|slot| {
            slot.state.started = true;
            slot.state.starts += 1;
        });
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> SignalResult<()> {
        self.with_slot(|slot| {
            if slot.state.paused != paused {
                slot.state.paused = paused;
                if paused {
                    slot.state.pauses += 1;
                } else {
                    slot.state.resumes += 1;
                }
            }
        });
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.with_slot(|slot| {
            slot.state.live = false;
            slot.state.releases += 1;
            slot.handler = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_fire_requires_started_and_unpaused() {
        let factory = ManualTimerFactory::new();
        let seen = Arc::new(AtomicU64::new(0));
        let s = seen.clone();
        let handler: TickHandlerRef = Arc::new(move |ts: Timestamp| {
            s.store(ts.as_nanos(), Ordering::SeqCst);
        });

        let mut source = factory.create(DeviceId(1), handler).unwrap();
        assert!(!factory.fire(DeviceId(1), Timestamp(5)));

        source.start().unwrap();
        assert!(factory.fire(DeviceId(1), Timestamp(7)));
        assert_eq!(seen.load(Ordering::SeqCst), 7);

        source.set_paused(true).unwrap();
        assert!(factory.is_paused(DeviceId(1)));
        assert!(!factory.fire(DeviceId(1), Timestamp(9)));

        source.release();
        let state = factory.display(DeviceId(1)).unwrap();
        assert!(!state.live);
        assert_eq!((state.starts, state.pauses, state.releases), (1, 1, 1));
    }

    #[test]
    fn test_failing_device() {
        let factory = ManualTimerFactory::new();
        factory.fail_device(DeviceId(3));
        let handler: TickHandlerRef = Arc::new(|_: Timestamp| {});
        assert!(matches!(
            factory.create(DeviceId(3), handler.clone()),
            Err(SignalError::SourceCreation { device: 3, .. })
        ));

        factory.restore_device(DeviceId(3));
        assert!(factory.create(DeviceId(3), handler).is_ok());
    }
}
