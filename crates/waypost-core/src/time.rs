//! Nanosecond timestamps for outbox entries and watermarks.
//!
//! Wall-clock nanoseconds, forced strictly increasing within the process so
//! two outbox appends never share a timestamp and a watermark taken from one
//! entry never hides a later one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST: AtomicI64 = AtomicI64::new(0);

/// Current time in nanoseconds since the Unix epoch, strictly greater than
/// any value previously returned in this process.
pub fn now_nanos() -> i64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0);

    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = wall.max(prev.saturating_add(1));
        match LAST.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}
