// Utility functions for encoders.

use chrono::{DateTime, Utc};
use std::fmt::Write;
use tracing::Level;

/// Writes an RFC 3339 timestamp with millisecond precision, e.g. `2023-10-26T14:30:05.123Z`.
pub fn write_timestamp(buf: &mut String, timestamp: &DateTime<Utc>) {
  let _ = write!(
    buf,
    "{}",
    timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
  );
}

/// Writes a timestamp using a strftime-style format string.
///
/// `format` is checked by `SinkConfig::validate`, so formatting cannot fail
/// for a configured sink.
pub fn write_timestamp_with_format(buf: &mut String, timestamp: &DateTime<Utc>, format: &str) {
  let _ = write!(buf, "{}", timestamp.format(format));
}

/// Seconds since the epoch as a float, the `%(created)f` value.
pub fn epoch_seconds(timestamp: &DateTime<Utc>) -> f64 {
  timestamp.timestamp() as f64 + f64::from(timestamp.timestamp_subsec_nanos()) / 1e9
}

/// Numeric severity compatible with the classic 10/20/30/40 level scale.
pub fn level_number(level: Level) -> i64 {
  match level {
    Level::TRACE => 5,
    Level::DEBUG => 10,
    Level::INFO => 20,
    Level::WARN => 30,
    Level::ERROR => 40,
  }
}
