//! Server time helpers
//!
//! X server timestamps are 32-bit milliseconds that wrap roughly every 49.7
//! days. Ordering is only meaningful within half the range.

/// X server timestamp (milliseconds, wrapping)
pub type Timestamp = u32;

/// The `CurrentTime` placeholder
pub const CURRENT_TIME: Timestamp = x11rb::CURRENT_TIME;

const HALF_RANGE: u32 = u32::MAX / 2;

/// Wraparound-aware `a < b`, assuming both are real server timestamps.
pub fn is_before_assuming_real(a: Timestamp, b: Timestamp) -> bool {
    (a < b && b - a < HALF_RANGE) || (a > b && a - b > HALF_RANGE)
}

/// Wraparound-aware `a < b`.
///
/// `CurrentTime` on the left is before everything; `CurrentTime` on the right
/// is never after anything.
pub fn is_before(a: Timestamp, b: Timestamp) -> bool {
    a == CURRENT_TIME || (is_before_assuming_real(a, b) && b != CURRENT_TIME)
}
