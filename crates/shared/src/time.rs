//! Calendar arithmetic shared by reports and the reservation model.

use chrono::{DateTime, Utc};

/// Whole days elapsed from `from` to `to`, truncated toward zero.
///
/// Negative when `to` is before `from`.
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days()
}
