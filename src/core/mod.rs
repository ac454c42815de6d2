/*!
 * Core Module
 * Shared time types, execution contexts and error handling
 */

pub mod errors;
pub mod executor;
pub mod limits;
pub mod thread;
pub mod time;

// Re-export for convenience
pub use errors::*;
pub use executor::{MainExecutor, MainExecutorRef, MainQueue, SerialQueue};
pub use thread::{MainThreadProbe, RecordedMainThread};
pub use time::{Deadline, Timestamp};
