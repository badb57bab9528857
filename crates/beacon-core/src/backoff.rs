//! # Retry Backoff
//!
//! Delay arithmetic for failed queue entries.
//!
//! ## The Schedule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Exponential Backoff Schedule                        │
//! │                                                                         │
//! │  retry_count   delay before next attempt                               │
//! │  ───────────   ─────────────────────────                               │
//! │       1        2 minutes   (2^1)                                       │
//! │       2        4 minutes   (2^2)                                       │
//! │       3        8 minutes   (2^3)                                       │
//! │       4        16 minutes  (2^4)                                       │
//! │       5        terminal: status = failed (max_retries reached)         │
//! │                                                                         │
//! │  The cap is implicit: max_retries bounds how far the exponent grows.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};

/// Returns the delay to wait after the given (already incremented) retry count.
///
/// The schedule is `2^retry_count` minutes. `retry_count` is clamped to 30 so
/// the shift can never overflow, though `max_retries` keeps real queues far
/// below that.
pub fn retry_delay(retry_count: i64) -> Duration {
    let exp = retry_count.clamp(0, 30) as u32;
    Duration::minutes(2i64.pow(exp))
}

/// Computes the next eligible delivery time after a failure.
pub fn next_retry_at(now: DateTime<Utc>, retry_count: i64) -> DateTime<Utc> {
    now + retry_delay(retry_count)
}
