/*!
 * Frame Sync Library
 * Main-thread rendezvous locking and per-display periodic signal fan-out
 */

pub mod core;
pub mod display;
pub mod monitoring;
pub mod sync;

// Re-exports
pub use crate::core::errors::{ExecutorError, SignalError, SignalResult};
pub use crate::core::executor::{MainExecutor, MainExecutorRef, MainQueue, SerialQueue};
pub use crate::core::thread::{MainThreadProbe, RecordedMainThread};
pub use crate::core::time::{Deadline, Timestamp};
pub use display::{
    DeviceId, IntervalTimerConfig, IntervalTimerFactory, ManagerStats, ManualTimerFactory,
    SignalConfig, SignalRegistry, SubscriptionHandle, SubscriptionId, TickHandler, TimerSource,
    TimerSourceFactory,
};
pub use monitoring::{init_tracing, span_operation, OperationSpan};
pub use sync::{RendezvousGuard, RendezvousLock, UpdateConfig, UpdateCycle};
