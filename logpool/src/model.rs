use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::Level;

/// Represents a loggable value, part of a `LogRecord`'s structured context.
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
  String(String),
  Int(i64),
  Float(f64),
  Bool(bool),
  Debug(String),
}

impl fmt::Display for LogValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LogValue::String(s) | LogValue::Debug(s) => f.write_str(s),
      LogValue::Int(i) => write!(f, "{}", i),
      LogValue::Float(v) => write!(f, "{}", v),
      LogValue::Bool(b) => write!(f, "{}", b),
    }
  }
}

/// A single log emission, carried from a worker to the sink.
///
/// A record is built once by the producer and never mutated afterwards; the
/// sink only reads it. The builder-style `with_*` methods consume the record,
/// so they can only be used before it is handed to a channel.
#[derive(Debug, Clone)]
pub struct LogRecord {
  pub(crate) timestamp: DateTime<Utc>,
  pub(crate) process_id: u32,
  pub(crate) process_name: String,
  pub(crate) thread_id: String,
  pub(crate) logger: String,
  pub(crate) level: Level,
  pub(crate) message: Option<String>,
  pub(crate) fields: BTreeMap<String, LogValue>,
}

impl LogRecord {
  /// Creates a record stamped with the current time and the calling thread's identity.
  pub fn new<S>(level: Level, logger: S, message: Option<String>) -> Self
  where
    S: Into<String>,
  {
    let current_thread = std::thread::current();
    LogRecord {
      timestamp: Utc::now(),
      process_id: std::process::id(),
      process_name: current_thread.name().unwrap_or("unnamed").to_string(),
      thread_id: thread_id_string(current_thread.id()),
      logger: logger.into(),
      level,
      message,
      fields: BTreeMap::new(),
    }
  }

  /// Overrides the origin name (worker identity) of the record.
  pub fn with_process_name<S: Into<String>>(mut self, process_name: S) -> Self {
    self.process_name = process_name.into();
    self
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  /// Attaches one piece of structured context.
  pub fn with_field<S: Into<String>>(mut self, key: S, value: LogValue) -> Self {
    self.fields.insert(key.into(), value);
    self
  }

  pub fn timestamp(&self) -> &DateTime<Utc> {
    &self.timestamp
  }

  pub fn process_id(&self) -> u32 {
    self.process_id
  }

  pub fn process_name(&self) -> &str {
    &self.process_name
  }

  pub fn thread_id(&self) -> &str {
    &self.thread_id
  }

  /// The logger name (the `tracing` target or `log` target of the emission).
  pub fn logger(&self) -> &str {
    &self.logger
  }

  pub fn level(&self) -> Level {
    self.level
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref()
  }

  pub fn fields(&self) -> &BTreeMap<String, LogValue> {
    &self.fields
  }
}

/// An element of the log channel.
///
/// `Sentinel` marks the end of the stream for one sink run. It can only be
/// produced inside the crate, by `Sink::stop` or by the channel itself once
/// every producer is gone.
#[derive(Debug)]
pub(crate) enum ChannelItem {
  Record(LogRecord),
  Sentinel,
}

/// Extracts the numeric part of a `ThreadId` debug rendering, e.g. `ThreadId(7)` -> `7`.
pub(crate) fn thread_id_string(id: std::thread::ThreadId) -> String {
  let debug_id = format!("{:?}", id);
  debug_id
    .strip_prefix("ThreadId(")
    .and_then(|s| s.strip_suffix(')'))
    .unwrap_or(&debug_id)
    .to_string()
}
