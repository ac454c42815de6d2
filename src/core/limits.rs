/*!
 * Limits and Constants
 *
 * Centralized location for tuning values shared across subsystems.
 */

use std::time::Duration;

// =============================================================================
// DISPLAY SIGNAL POLICY
// =============================================================================

/// Ticks a source keeps running after demand drops to zero
/// Also the per-subscription idle allowance granted on every re-arm
pub const DEFAULT_RESTART_BUDGET: u32 = 5;

/// Restart budget for battery-sensitive hosts
pub const LOW_POWER_RESTART_BUDGET: u32 = 1;

/// Restart budget for hosts that re-arm in bursts with long gaps
pub const STICKY_RESTART_BUDGET: u32 = 30;

/// Default software refresh interval (~60 Hz)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_nanos(16_666_667);

// =============================================================================
// THREAD NAMES
// =============================================================================

/// Prefix for per-display dispatch queue threads
pub const DISPLAY_QUEUE_PREFIX: &str = "frame-sync.display";

/// Prefix for software interval timer threads
pub const INTERVAL_TIMER_PREFIX: &str = "frame-sync.vsync";

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// Tick dispatch slower than this is logged as a warning
pub const SLOW_DISPATCH_THRESHOLD: Duration = Duration::from_millis(8);

/// Environment variable enabling JSON trace output
pub const TRACE_JSON_ENV: &str = "FRAME_SYNC_TRACE_JSON";

/// Environment variable enabling update lock assertions
pub const ASSERT_LOCKS_ENV: &str = "FRAME_SYNC_ASSERT_LOCKS";
