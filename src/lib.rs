//! Hierarchical timer wheel driven by an abstract tick clock.
//!
//! The wheel schedules, cancels, and fires large numbers of delayed
//! callbacks in amortized O(1) per operation, with no per-timer heap
//! allocation on the hot path and no comparison-based priority queue.
//! Time is an opaque `u64` tick counter advanced only by the caller;
//! mapping real elapsed time onto ticks is the driving event loop's job.

mod arena;
mod timer;
mod wheel;

pub use arena::TimerId;
pub use timer::{Callback, MemberTimer, Timer};
pub use wheel::{ScheduleError, TimerWheel};

/// Bits of the tick counter consumed per level.
pub const LEVEL_BITS: usize = 8;

/// Slots per level.
pub const NUM_SLOTS: usize = 1 << LEVEL_BITS;

/// Number of levels. Together the levels cover the full `u64` tick range,
/// so any delay is directly representable.
pub const NUM_LEVELS: usize = 64 / LEVEL_BITS;

pub(crate) const SLOT_MASK: u64 = (NUM_SLOTS - 1) as u64;
