// Structs directly mapping to the YAML structure.

use serde::Deserialize;

// --- Top Level Config ---
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigRaw {
  #[serde(default = "default_version")]
  pub version: u32,
  pub sink: SinkConfigRaw,
  #[serde(default)]
  pub pool: PoolConfigRaw,
}

fn default_version() -> u32 {
  1
}

// --- Sink ---

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SinkConfigRaw {
  /// Required when `destination` is "file".
  #[serde(default)]
  pub path: String,
  /// "file" (the default), "stdout" or "stderr".
  #[serde(default)]
  pub destination: Option<String>,
  #[serde(default)]
  pub rotation: RotationPolicyRaw,
  /// "append" or "truncate".
  #[serde(default = "default_mode")]
  pub mode: String,
  #[serde(default)]
  pub encoder: Option<EncoderConfigRaw>,
  /// A humantime duration such as "5s". Absent means wait forever.
  #[serde(default)]
  pub stop_timeout: Option<String>,
}

fn default_mode() -> String {
  "append".to_string()
}

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RotationPolicyRaw {
  /// Max size of one segment before rolling, e.g. 20000, "20KB", "1MiB".
  #[serde(default)]
  pub max_file_size: Option<SizeRaw>,
  /// Number of rolled segments to keep next to the active one.
  #[serde(default)]
  pub backup_count: u32,
}

/// A size given either as a plain byte count or as a string with a unit.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum SizeRaw {
  Bytes(u64),
  Text(String),
}

// --- Encoder Config ---
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum EncoderConfigRaw {
  Pattern(PatternEncoderConfigRaw),
  JsonLines(JsonLinesEncoderConfigRaw),
}

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PatternEncoderConfigRaw {
  // Default format will be applied if this is None
  pub format: Option<String>,
  pub date_format: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct JsonLinesEncoderConfigRaw {
  /// If true, structured fields are added to the top-level JSON object
  /// instead of being nested under a "fields" key.
  #[serde(default)]
  pub flatten_fields: bool,
}

// --- Pool ---

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PoolConfigRaw {
  /// Worker count. Defaults to the number of CPUs.
  #[serde(default)]
  pub processes: Option<usize>,
  #[serde(default)]
  pub max_tasks_per_worker: Option<usize>,
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "debug".to_string()
}

impl Default for PoolConfigRaw {
  fn default() -> Self {
    Self {
      processes: None,
      max_tasks_per_worker: None,
      level: default_level(),
    }
  }
}
