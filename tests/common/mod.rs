/*!
 * Shared test helpers
 */

#![allow(dead_code)]

use frame_sync::{DeviceId, ManualTimerFactory, SignalConfig, SignalRegistry, Timestamp};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEVICE: DeviceId = DeviceId(0);
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` expires
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn manual_registry(budget: u32) -> (SignalRegistry, ManualTimerFactory) {
    frame_sync::monitoring::init_test_tracing();
    let factory = ManualTimerFactory::new();
    let registry = SignalRegistry::new(
        Arc::new(factory.clone()),
        SignalConfig::default().with_restart_budget(budget),
    );
    (registry, factory)
}

/// Fire one tick and wait for its dispatch to finish
pub fn tick(registry: &SignalRegistry, factory: &ManualTimerFactory, device: DeviceId, ts: u64) -> bool {
    let delivered = factory.fire(device, Timestamp(ts));
    assert!(registry.flush(device, TIMEOUT), "dispatch queue did not drain");
    delivered
}
