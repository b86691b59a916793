//! Monotonic-millisecond wall-clock helpers shared across Risk and the
//! Executor. All deadlines in this crate are wall-clock milliseconds; UTC
//! wall clock is used for openTime/exitTime/daily-P&L roll boundaries.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
