//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in microseconds since the UNIX epoch.
///
/// Clock readings before the epoch collapse to zero rather than
/// panicking — timestamps here are diagnostic, not ordering-critical
/// (ordering is carried by sequence numbers).
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Numeric id of the calling thread, for file-id uniqueness.
///
/// `ThreadId::as_u64` is unstable, so the id is derived from the Debug
/// rendering (`ThreadId(<n>)`), falling back to 0 if the format ever
/// changes.
pub(crate) fn thread_num() -> u64 {
    let rendered = format!("{:?}", std::thread::current().id());
    rendered
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse()
        .unwrap_or(0)
}

/// Do two inclusive key ranges overlap?
pub(crate) fn ranges_overlap(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    a_min <= b_max && b_min <= a_max
}
