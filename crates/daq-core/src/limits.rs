//! Shared limits and timing constants.
//!
//! Centralised so the session, registry and engine agree on them.

use std::time::Duration;

// =============================================================================
// Timing
// =============================================================================

/// Transport timeout applied when a driver file does not set `timeout`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after each input set so hardware can latch the new value.
pub const MICRO_SETTLE: Duration = Duration::from_millis(1);

/// Upper bound on a configured settle delay (one hour).
pub const MAX_SETTLE_DELAY: Duration = Duration::from_secs(3600);

// =============================================================================
// Links and plans
// =============================================================================

/// Maximum number of link redirections followed before a chain is treated as a
/// cycle.
pub const MAX_LINK_HOPS: usize = 8;

/// Maximum number of points in a single sweep.
pub const MAX_SWEEP_POINTS: usize = 10_000_000;

/// Maximum total step count of a plan (product over levels).
pub const MAX_TOTAL_STEPS: usize = 100_000_000;
