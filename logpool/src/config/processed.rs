use crate::config::raw::{
  ConfigRaw, EncoderConfigRaw, PoolConfigRaw, RotationPolicyRaw, SinkConfigRaw, SizeRaw,
};
use crate::error::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_core::metadata::LevelFilter;

/// Format used when none is configured.
pub const DEFAULT_FORMAT: &str =
  "%(asctime)s %(processName)-10s %(name)s %(levelname)-8s %(message)s";

/// strftime pattern used for `%(asctime)s` when none is configured.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

static SIZE_REGEX: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^\s*(?P<num>\d+)\s*(?P<unit>b|kb|kib|mb|mib|gb|gib)?\s*$")
    .expect("Size regex should be valid")
});

// --- Processed Top Level Config ---
#[derive(Debug, Clone, PartialEq)]
pub struct LogPoolConfig {
  pub sink: SinkConfig,
  pub pool: PoolConfig,
}

// --- Sink ---

/// How the active segment is opened when the sink starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
  #[default]
  Append,
  Truncate,
}

/// Where a sink writes its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// The rotating file at `SinkConfig::path`.
  #[default]
  File,
  Stdout,
  Stderr,
}

/// Size-based rollover policy.
///
/// A `max_bytes` or `backup_count` of zero disables rollover. After each
/// rollover at most `backup_count` rolled segments are kept next to the
/// active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationPolicy {
  pub max_bytes: u64,
  pub backup_count: u32,
}

impl RotationPolicy {
  pub fn new(max_bytes: u64, backup_count: u32) -> Self {
    Self {
      max_bytes,
      backup_count,
    }
  }

  /// A policy that never rolls the file over.
  pub fn never() -> Self {
    Self::default()
  }

  pub fn is_enabled(&self) -> bool {
    self.max_bytes > 0 && self.backup_count > 0
  }
}

/// Selects the record formatter used by the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderConfig {
  Pattern {
    format: String,
    date_format: String,
  },
  JsonLines {
    flatten_fields: bool,
  },
}

impl Default for EncoderConfig {
  fn default() -> Self {
    EncoderConfig::Pattern {
      format: DEFAULT_FORMAT.to_string(),
      date_format: DEFAULT_DATE_FORMAT.to_string(),
    }
  }
}

/// Destination configuration of a sink. Supplied once and never changed
/// after the sink has been built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
  pub(crate) destination: Destination,
  pub(crate) path: PathBuf,
  pub(crate) rotation: RotationPolicy,
  pub(crate) mode: OpenMode,
  pub(crate) encoder: EncoderConfig,
  pub(crate) stop_timeout: Option<Duration>,
}

impl SinkConfig {
  /// A sink writing to a rotating file at `path`.
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      destination: Destination::File,
      path: path.as_ref().to_path_buf(),
      rotation: RotationPolicy::never(),
      mode: OpenMode::Append,
      encoder: EncoderConfig::default(),
      stop_timeout: None,
    }
  }

  /// A sink writing to standard output. Rotation and open mode do not apply.
  pub fn stdout() -> Self {
    Self::new("").destination(Destination::Stdout)
  }

  /// A sink writing to standard error. Rotation and open mode do not apply.
  pub fn stderr() -> Self {
    Self::new("").destination(Destination::Stderr)
  }

  pub fn destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn rotation(mut self, max_bytes: u64, backup_count: u32) -> Self {
    self.rotation = RotationPolicy::new(max_bytes, backup_count);
    self
  }

  pub fn mode(mut self, mode: OpenMode) -> Self {
    self.mode = mode;
    self
  }

  /// Uses a `%(field)s` template with the default date format.
  pub fn format<S: Into<String>>(mut self, format: S) -> Self {
    let date_format = match &self.encoder {
      EncoderConfig::Pattern { date_format, .. } => date_format.clone(),
      EncoderConfig::JsonLines { .. } => DEFAULT_DATE_FORMAT.to_string(),
    };
    self.encoder = EncoderConfig::Pattern {
      format: format.into(),
      date_format,
    };
    self
  }

  pub fn encoder(mut self, encoder: EncoderConfig) -> Self {
    self.encoder = encoder;
    self
  }

  /// Bounds how long `Sink::stop` waits for the consumer thread.
  pub fn stop_timeout(mut self, timeout: Duration) -> Self {
    self.stop_timeout = Some(timeout);
    self
  }

  pub fn destination_kind(&self) -> Destination {
    self.destination
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The path for file sinks, `<stdout>` or `<stderr>` otherwise.
  pub fn destination_label(&self) -> String {
    match self.destination {
      Destination::File => self.path.display().to_string(),
      Destination::Stdout => "<stdout>".to_string(),
      Destination::Stderr => "<stderr>".to_string(),
    }
  }

  pub fn rotation_policy(&self) -> RotationPolicy {
    self.rotation
  }

  pub fn open_mode(&self) -> OpenMode {
    self.mode
  }

  pub fn encoder_config(&self) -> &EncoderConfig {
    &self.encoder
  }

  pub fn stop_timeout_value(&self) -> Option<Duration> {
    self.stop_timeout
  }

  /// Checks the values that can be checked without touching the filesystem.
  pub fn validate(&self) -> Result<()> {
    if self.destination == Destination::File && self.path.as_os_str().is_empty() {
      return Err(Error::InvalidConfigValue {
        field: "sink.path".to_string(),
        message: "Sink path cannot be empty.".to_string(),
      });
    }
    if let EncoderConfig::Pattern {
      format,
      date_format,
    } = &self.encoder
    {
      if format.trim().is_empty() {
        return Err(Error::InvalidConfigValue {
          field: "sink.encoder.format".to_string(),
          message: "Pattern format cannot be empty.".to_string(),
        });
      }
      if StrftimeItems::new(date_format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::InvalidConfigValue {
          field: "sink.encoder.date_format".to_string(),
          message: format!("'{}' is not a valid strftime pattern.", date_format),
        });
      }
    }
    Ok(())
  }
}

// --- Pool ---

/// Worker-side configuration of a `LoggingPool`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
  pub(crate) processes: usize,
  pub(crate) max_tasks_per_worker: Option<usize>,
  pub(crate) level: LevelFilter,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      processes: num_cpus::get().max(1),
      max_tasks_per_worker: None,
      level: LevelFilter::DEBUG,
    }
  }
}

impl PoolConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the number of worker threads.
  pub fn processes(mut self, processes: usize) -> Self {
    self.processes = processes;
    self
  }

  /// Recycles a worker after it has run this many tasks.
  pub fn max_tasks_per_worker(mut self, max_tasks: usize) -> Self {
    self.max_tasks_per_worker = Some(max_tasks);
    self
  }

  /// Minimum severity forwarded by every worker.
  pub fn level(mut self, level: LevelFilter) -> Self {
    self.level = level;
    self
  }

  pub fn worker_count(&self) -> usize {
    self.processes
  }

  pub fn level_filter(&self) -> LevelFilter {
    self.level
  }

  pub fn validate(&self) -> Result<()> {
    if self.processes == 0 {
      return Err(Error::InvalidConfigValue {
        field: "pool.processes".to_string(),
        message: "A pool needs at least one worker.".to_string(),
      });
    }
    if self.max_tasks_per_worker == Some(0) {
      return Err(Error::InvalidConfigValue {
        field: "pool.max_tasks_per_worker".to_string(),
        message: "max_tasks_per_worker must be at least 1 when set.".to_string(),
      });
    }
    Ok(())
  }
}

// --- Conversion and Validation Logic ---

/// Processes the raw, deserialized configuration into a validated internal representation.
pub fn process_raw_config(raw_config: ConfigRaw) -> Result<LogPoolConfig> {
  if raw_config.version != 1 {
    return Err(Error::InvalidConfigValue {
      field: "version".to_string(),
      message: format!("Unsupported config version {}. Expected 1.", raw_config.version),
    });
  }
  let sink = process_sink_config(raw_config.sink)?;
  let pool = process_pool_config(raw_config.pool)?;
  Ok(LogPoolConfig { sink, pool })
}

fn process_sink_config(raw: SinkConfigRaw) -> Result<SinkConfig> {
  let destination = match raw.destination.as_deref().map(str::to_lowercase).as_deref() {
    None | Some("file") => Destination::File,
    Some("stdout") => Destination::Stdout,
    Some("stderr") => Destination::Stderr,
    Some(other) => {
      return Err(Error::InvalidConfigValue {
        field: "sink.destination".to_string(),
        message: format!("Unknown destination '{}'. Expected 'file', 'stdout' or 'stderr'.", other),
      })
    }
  };

  if destination == Destination::File && raw.path.is_empty() {
    return Err(Error::InvalidConfigValue {
      field: "sink.path".to_string(),
      message: "Sink path cannot be empty.".to_string(),
    });
  }

  let mode = match raw.mode.to_lowercase().as_str() {
    "append" | "a" => OpenMode::Append,
    "truncate" | "w" => OpenMode::Truncate,
    other => {
      return Err(Error::InvalidConfigValue {
        field: "sink.mode".to_string(),
        message: format!("Unknown mode '{}'. Expected 'append' or 'truncate'.", other),
      })
    }
  };

  let rotation = process_rotation(raw.rotation)?;

  let encoder = match raw.encoder {
    Some(EncoderConfigRaw::Pattern(p)) => EncoderConfig::Pattern {
      format: p.format.unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
      date_format: p
        .date_format
        .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
    },
    Some(EncoderConfigRaw::JsonLines(j)) => EncoderConfig::JsonLines {
      flatten_fields: j.flatten_fields,
    },
    None => EncoderConfig::default(),
  };

  let stop_timeout = match raw.stop_timeout {
    Some(text) => Some(parse_duration(&text, "sink.stop_timeout")?),
    None => None,
  };

  let config = SinkConfig {
    destination,
    path: PathBuf::from(raw.path),
    rotation,
    mode,
    encoder,
    stop_timeout,
  };
  config.validate()?;
  Ok(config)
}

fn process_rotation(raw: RotationPolicyRaw) -> Result<RotationPolicy> {
  let max_bytes = match raw.max_file_size {
    Some(size) => parse_size(&size, "sink.rotation.max_file_size")?,
    None => 0,
  };
  Ok(RotationPolicy::new(max_bytes, raw.backup_count))
}

fn process_pool_config(raw: PoolConfigRaw) -> Result<PoolConfig> {
  let mut config = PoolConfig::default();
  if let Some(processes) = raw.processes {
    config.processes = processes;
  }
  config.max_tasks_per_worker = raw.max_tasks_per_worker;
  config.level = parse_level_filter(&raw.level, "pool.level")?;
  config.validate()?;
  Ok(config)
}

/// Parses "20000", "20KB" (10^3) or "20KiB" (2^10) style sizes.
pub(crate) fn parse_size(raw: &SizeRaw, field: &str) -> Result<u64> {
  let text = match raw {
    SizeRaw::Bytes(n) => return Ok(*n),
    SizeRaw::Text(t) => t,
  };
  let invalid = || Error::InvalidConfigValue {
    field: field.to_string(),
    message: format!(
      "Invalid size '{}'. Expected a byte count optionally followed by B, KB, KiB, MB, MiB, GB or GiB.",
      text
    ),
  };
  let caps = SIZE_REGEX.captures(text).ok_or_else(invalid)?;
  let number: u64 = caps["num"].parse().map_err(|_| invalid())?;
  let multiplier: u64 = match caps
    .name("unit")
    .map(|m| m.as_str().to_lowercase())
    .as_deref()
  {
    None | Some("b") => 1,
    Some("kb") => 1_000,
    Some("kib") => 1 << 10,
    Some("mb") => 1_000_000,
    Some("mib") => 1 << 20,
    Some("gb") => 1_000_000_000,
    Some("gib") => 1 << 30,
    Some(_) => return Err(invalid()),
  };
  number.checked_mul(multiplier).ok_or_else(invalid)
}

fn parse_duration(text: &str, field: &str) -> Result<Duration> {
  humantime::parse_duration(text).map_err(|e| Error::InvalidConfigValue {
    field: field.to_string(),
    message: format!("Invalid duration '{}': {}", text, e),
  })
}

pub(crate) fn parse_level_filter(level_str: &str, field: &str) -> Result<LevelFilter> {
  // Special case for "OFF" which is not a `tracing::Level`
  if level_str.to_uppercase() == "OFF" {
    return Ok(LevelFilter::OFF);
  }

  level_str
    .to_uppercase()
    .parse::<Level>()
    .map(LevelFilter::from_level)
    .map_err(|_| Error::InvalidConfigValue {
      field: field.to_string(),
      message: format!(
        "Invalid log level string '{}'. Expected TRACE, DEBUG, INFO, WARN, ERROR, or OFF.",
        level_str
      ),
    })
}
