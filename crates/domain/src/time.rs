//! Time and timestamp helpers.

use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// UTC timestamp used for `last_seen`, port updates and event times.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Return the current wall-clock time in the host timezone.
///
/// Scheduling follows the host clock so that configured hours match what
/// an operator reads on the machine.
#[must_use]
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
