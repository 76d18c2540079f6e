//! Source epoch conversions.
//!
//! Every converter treats absent and non-positive inputs as "no timestamp" rather
//! than as the epoch's zero point.

/// Seconds between 1970-01-01 and 2001-01-01 (Core Data / Cocoa reference date).
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Seconds between 1601-01-01 and 1970-01-01 (WebKit / Windows FILETIME epoch).
pub const WEBKIT_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const MICROS_PER_SEC: i64 = 1_000_000;

/// Convert seconds since 2001-01-01 (fractional) to Unix seconds.
///
/// The fractional part is truncated. Non-finite input is treated as absent.
#[must_use]
pub fn apple_seconds_to_unix(value: Option<f64>) -> Option<i64> {
    let seconds = value.filter(|seconds| seconds.is_finite() && *seconds > 0.0)?;
    // Saturating float-to-int cast; anything past i64 range is garbage anyway.
    #[allow(clippy::cast_possible_truncation)]
    let whole = seconds.trunc() as i64;
    whole.checked_add(APPLE_EPOCH_OFFSET_SECS)
}

/// Convert nanoseconds since 2001-01-01 to Unix seconds.
#[must_use]
pub fn apple_nanos_to_unix(value: Option<i64>) -> Option<i64> {
    let nanos = value.filter(|nanos| *nanos > 0)?;
    (nanos / NANOS_PER_SEC).checked_add(APPLE_EPOCH_OFFSET_SECS)
}

/// Convert microseconds since 1601-01-01 to Unix seconds.
#[must_use]
pub fn webkit_micros_to_unix(value: Option<i64>) -> Option<i64> {
    let micros = value.filter(|micros| *micros > 0)?;
    Some(micros / MICROS_PER_SEC - WEBKIT_EPOCH_OFFSET_SECS)
}

#[must_use]
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
