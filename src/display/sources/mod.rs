/*!
 * Periodic Sources
 *
 * - `ManualTimerFactory`: ticks delivered on demand, for tests and tooling
 * - `IntervalTimerFactory`: thread-per-device fixed-interval ticks
 */

mod interval;
mod manual;

pub use interval::{IntervalTimerConfig, IntervalTimerFactory};
pub use manual::{ManualDisplayState, ManualTimerFactory};
