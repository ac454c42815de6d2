/*!
 * Display Signals
 *
 * Per-display periodic signal multiplexing:
 * - `SignalRegistry`: lazily creates one manager per device
 * - Managers own the device's periodic source and pause it when demand drops
 * - `SubscriptionHandle`: a listener; armed per tick with a deadline
 *
 * Ticks are coalesced per device (at most one dispatch in flight) and
 * callbacks run on the device's private serial queue, outside any lock.
 */

mod manager;
mod registry;
pub mod sources;
mod subscription;
mod traits;
mod types;

pub use registry::SignalRegistry;
pub use sources::{IntervalTimerConfig, IntervalTimerFactory, ManualDisplayState, ManualTimerFactory};
pub use subscription::{Callback, SubscriptionHandle};
pub use traits::{TickHandler, TickHandlerRef, TimerSource, TimerSourceFactory};
pub use types::{DeviceId, ManagerStats, SignalConfig, SubscriptionId};
