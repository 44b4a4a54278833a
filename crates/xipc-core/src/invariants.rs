//! Debug assertion macros for the byte-ring invariants in `spec.md` §8.1.
//!
//! Active only in debug builds (`#[cfg(debug_assertions)]`, via
//! `debug_assert!`), so release builds pay nothing for them.

/// Assert that the in-flight byte count never exceeds capacity.
///
/// **Invariant**: `0 <= write_idx - read_idx <= capacity`.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "bounded-count invariant violated: in-flight {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that a sequence counter (`read_idx` or `write_idx`) only moves
/// forward between two observations taken by the same handle.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "monotonic-progress invariant violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a sequence counter has not wrapped the full `u64` space.
/// At realistic throughput this takes decades; tripping it means a
/// corrupted counter, not a legitimate wraparound.
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old || $old.wrapping_sub($new) > (1u64 << 32),
            "no-wrap invariant tripped: {} went from {} to {} (delta {})",
            $name,
            $old,
            $new,
            $new.wrapping_sub($old)
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap;
