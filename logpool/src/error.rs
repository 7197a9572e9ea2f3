use std::time::Duration;
use thiserror::Error;

/// The main error type for the `logpool` library.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Configuration file not found: {0}")]
  ConfigNotFound(String),

  #[error("Failed to read configuration file: {0}")]
  ConfigRead(#[source] std::io::Error),

  #[error("Failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("Invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },

  /// The destination writer could not be opened. Fatal to `LoggingPool::enter`.
  #[error("Sink setup failed for {path:?}: {reason}")]
  SinkSetup { path: String, reason: String },

  #[error("Sink was already started; a sink can only be started once")]
  SinkAlreadyStarted,

  /// The sink's consumer loop ended with an error before the sentinel arrived.
  #[error("Sink consumer terminated abnormally: {0}")]
  SinkFailed(String),

  #[error("Sink consumer thread panicked: {0}")]
  SinkPanicked(String),

  #[error("Sink did not stop within {0:?}")]
  StopTimeout(Duration),

  /// The consumer end of the log channel is gone.
  #[error("Log channel is closed")]
  ChannelClosed,

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawn(String),

  #[error("Task #{index} panicked: {message}")]
  TaskPanicked { index: usize, message: String },

  /// The worker pool has no live workers left to run tasks.
  #[error("Worker pool is closed")]
  PoolClosed,

  #[error("Failed to format log record: {0}")]
  Format(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// A specialized `Result` type for `logpool` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders a panic payload caught by `join` or `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
