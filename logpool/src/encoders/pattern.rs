// src/encoders/pattern.rs
use super::{util, RecordFormatter};
use crate::config::DEFAULT_DATE_FORMAT;
use crate::error::Result;
use crate::model::LogRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

// Matches `%(key)s` style specifiers with optional flags, width and precision,
// or an escaped `%%`.
static PATTERN_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"(?P<specifier>%\((?P<key>[A-Za-z_]+)\)(?P<flags>[-#0+ ]*)(?P<width>\d+)?(?:\.(?P<precision>\d+))?(?P<conversion>[sdfr]))|(?P<escaped>%%)",
  )
  .expect("Pattern regex should be valid")
});

/// Represents a single piece of a parsed format template.
#[derive(Debug)]
enum Segment {
  Literal(String),
  Specifier(FieldSpecifier),
}

/// The record attribute a specifier refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
  AscTime,
  Created,
  Process,
  ProcessName,
  Thread,
  Name,
  LevelName,
  LevelNo,
  Message,
  Fields,
  /// A key that is looked up in the record's structured context.
  Context(String),
}

impl Field {
  fn from_key(key: &str) -> Self {
    match key {
      "asctime" => Field::AscTime,
      "created" => Field::Created,
      "process" => Field::Process,
      "processName" | "threadName" => Field::ProcessName,
      "thread" => Field::Thread,
      "name" => Field::Name,
      "levelname" => Field::LevelName,
      "levelno" => Field::LevelNo,
      "message" | "msg" => Field::Message,
      "fields" => Field::Fields,
      other => Field::Context(other.to_string()),
    }
  }
}

/// The internal representation of a conversion specifier like `%(levelname)-8s`.
#[derive(Debug)]
struct FieldSpecifier {
  field: Field,
  left_align: bool,
  width: Option<usize>,
  precision: Option<usize>,
  conversion: char,
}

/// Renders records through a `%(field)s` template.
///
/// Recognized keys: `asctime`, `created`, `process`, `processName`,
/// `threadName`, `thread`, `name`, `levelname`, `levelno`, `message`,
/// `fields` (all structured context as `{k=v, ...}`). Any other key is
/// looked up in the record's structured context and renders empty when
/// absent.
///
/// `levelname` is the `tracing` level name (`TRACE`, `DEBUG`, `INFO`, `WARN`,
/// `ERROR`), so warnings render as `WARN`, not `WARNING`. `levelno` keeps the
/// 10/20/30/40 scale.
pub struct PatternFormatter {
  segments: Vec<Segment>,
  date_format: String,
}

impl PatternFormatter {
  pub fn new(format: &str) -> Self {
    Self::with_date_format(format, DEFAULT_DATE_FORMAT)
  }

  pub fn with_date_format(format: &str, date_format: &str) -> Self {
    Self {
      segments: Self::parse(format),
      date_format: date_format.to_string(),
    }
  }

  /// Parses a template into a sequence of `Segment`s.
  fn parse(pattern: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for caps in PATTERN_REGEX.captures_iter(pattern) {
      let Some(mat) = caps.get(0) else { continue };

      if mat.start() > last_end {
        segments.push(Segment::Literal(pattern[last_end..mat.start()].to_string()));
      }

      if caps.name("specifier").is_some() {
        let key = caps.name("key").map_or("", |m| m.as_str());
        let flags = caps.name("flags").map_or("", |m| m.as_str());
        let conversion = caps
          .name("conversion")
          .and_then(|m| m.as_str().chars().next())
          .unwrap_or('s');
        segments.push(Segment::Specifier(FieldSpecifier {
          field: Field::from_key(key),
          left_align: flags.contains('-'),
          width: caps.name("width").and_then(|m| m.as_str().parse().ok()),
          precision: caps.name("precision").and_then(|m| m.as_str().parse().ok()),
          conversion,
        }));
      } else if caps.name("escaped").is_some() {
        segments.push(Segment::Literal("%".to_string()));
      }

      last_end = mat.end();
    }

    if last_end < pattern.len() {
      segments.push(Segment::Literal(pattern[last_end..].to_string()));
    }

    segments
  }

  /// Writes the raw (unpadded) value of a field.
  fn write_field(&self, buf: &mut String, spec: &FieldSpecifier, record: &LogRecord) {
    match &spec.field {
      Field::AscTime => {
        util::write_timestamp_with_format(buf, &record.timestamp, &self.date_format)
      }
      Field::Created => {
        let precision = spec.precision.unwrap_or(6);
        let _ = write!(
          buf,
          "{:.*}",
          precision,
          util::epoch_seconds(&record.timestamp)
        );
      }
      Field::Process => {
        let _ = write!(buf, "{}", record.process_id);
      }
      Field::ProcessName => buf.push_str(&record.process_name),
      Field::Thread => buf.push_str(&record.thread_id),
      Field::Name => buf.push_str(&record.logger),
      Field::LevelName => {
        let _ = write!(buf, "{}", record.level);
      }
      Field::LevelNo => {
        let _ = write!(buf, "{}", util::level_number(record.level));
      }
      Field::Message => {
        if let Some(msg) = &record.message {
          buf.push_str(msg);
        }
      }
      Field::Fields => {
        if !record.fields.is_empty() {
          buf.push('{');
          // BTreeMap iteration is already sorted by key.
          for (i, (key, value)) in record.fields.iter().enumerate() {
            if i > 0 {
              buf.push_str(", ");
            }
            let _ = write!(buf, "{}={}", key, value);
          }
          buf.push('}');
        }
      }
      Field::Context(key) => {
        if let Some(value) = record.fields.get(key) {
          let _ = write!(buf, "{}", value);
        }
      }
    }
  }

  /// Handles formatting for a single specifier, including precision and padding.
  fn format_specifier(&self, buf: &mut String, spec: &FieldSpecifier, record: &LogRecord) {
    let needs_post_processing =
      spec.width.is_some() || (spec.precision.is_some() && spec.conversion != 'f');

    if !needs_post_processing {
      self.write_field(buf, spec, record);
      return;
    }

    let mut content = String::with_capacity(64);
    self.write_field(&mut content, spec, record);

    // For string conversions the precision truncates, as in printf.
    if spec.conversion != 'f' {
      if let Some(precision) = spec.precision {
        if let Some((byte_idx, _)) = content.char_indices().nth(precision) {
          content.truncate(byte_idx);
        }
      }
    }

    match spec.width {
      Some(width) => self.apply_padding(buf, &content, width, spec.left_align),
      None => buf.push_str(&content),
    }
  }

  /// Applies left or right alignment to the given content.
  fn apply_padding(&self, buf: &mut String, content: &str, width: usize, left_align: bool) {
    if content.chars().count() >= width {
      buf.push_str(content);
      return;
    }

    if left_align {
      let _ = write!(buf, "{:<width$}", content, width = width);
    } else {
      let _ = write!(buf, "{:>width$}", content, width = width);
    }
  }
}

impl RecordFormatter for PatternFormatter {
  fn format_record(&self, record: &LogRecord) -> Result<Vec<u8>> {
    let mut output = String::with_capacity(256);

    for segment in &self.segments {
      match segment {
        Segment::Literal(text) => output.push_str(text),
        Segment::Specifier(spec) => self.format_specifier(&mut output, spec, record),
      }
    }

    if !output.ends_with('\n') {
      output.push('\n');
    }

    Ok(output.into_bytes())
  }
}
