/*!
 * Display Signal Traits
 * Seams to the hardware periodic source
 */

use super::types::DeviceId;
use crate::core::errors::SignalResult;
use crate::core::time::Timestamp;
use std::sync::Arc;

/// Driver-thread entry point for periodic ticks
///
/// Called on a thread owned by the source; implementations must return
/// quickly and never block.
pub trait TickHandler: Send + Sync {
    fn on_tick(&self, timestamp: Timestamp);
}

/// Shared tick handler
pub type TickHandlerRef = Arc<dyn TickHandler>;

impl<F> TickHandler for F
where
    F: Fn(Timestamp) + Send + Sync,
{
    fn on_tick(&self, timestamp: Timestamp) {
        self(timestamp)
    }
}

/// One device's hardware periodic source
///
/// Owned exclusively by its manager; every call after creation is made from
/// the manager's serial queue.
pub trait TimerSource: Send {
    fn start(&mut self) -> SignalResult<()>;

    fn set_paused(&mut self, paused: bool) -> SignalResult<()>;

    /// Stop delivering ticks and free the source
    fn release(self: Box<Self>);
}

/// Creates periodic sources bound to a tick handler
pub trait TimerSourceFactory: Send + Sync {
    fn create(&self, device: DeviceId, handler: TickHandlerRef)
        -> SignalResult<Box<dyn TimerSource>>;
}
