// Defines strategies for formatting LogRecords into byte streams.

use crate::config::EncoderConfig;
use crate::error::Result;
use crate::model::LogRecord;

pub mod json;
pub mod pattern;
pub mod util;

/// Trait for types that can format a `LogRecord` into a byte vector.
/// Line-based formatters include the trailing newline.
pub trait RecordFormatter: Send + Sync + 'static {
  fn format_record(&self, record: &LogRecord) -> Result<Vec<u8>>;
}

/// Creates a `RecordFormatter` instance based on the sink's encoder configuration.
pub(crate) fn new_record_formatter(config: &EncoderConfig) -> Box<dyn RecordFormatter> {
  match config {
    EncoderConfig::Pattern {
      format,
      date_format,
    } => Box::new(pattern::PatternFormatter::with_date_format(format, date_format)),
    EncoderConfig::JsonLines { flatten_fields } => {
      Box::new(json::JsonLinesFormatter::new(*flatten_fields))
    }
  }
}
