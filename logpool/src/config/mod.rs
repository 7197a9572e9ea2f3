// This module handles configuration parsing and validation.

pub mod processed; // Structs representing validated and processed configuration
pub mod raw; // Structs directly mapping to YAML structure

pub use processed::{
  Destination, EncoderConfig, LogPoolConfig, OpenMode, PoolConfig, RotationPolicy, SinkConfig,
  DEFAULT_DATE_FORMAT, DEFAULT_FORMAT,
};

use crate::error::{Error, Result};
use raw::ConfigRaw;
use std::{
  env,
  fs::File,
  io,
  path::{Path, PathBuf},
};

const DEFAULT_CONFIG_BASE_NAME: &str = "logpool";
const DEFAULT_CONFIG_EXTENSION: &str = "yaml";

/// Finds the configuration file based on common patterns and an optional environment suffix.
///
/// Looks in the current directory for `logpool.<env>.yaml`, then `logpool.yaml`.
/// The environment comes from the argument, `LOGPOOL_ENV` or `APP_ENV`.
pub fn find_config_file(environment_suffix: Option<&str>) -> Result<PathBuf> {
  find_config_file_in(Path::new("."), environment_suffix)
}

fn find_config_file_in(dir: &Path, environment_suffix: Option<&str>) -> Result<PathBuf> {
  let env_from_var = environment_suffix
    .map(|s| s.to_string())
    .or_else(|| env::var("LOGPOOL_ENV").ok())
    .or_else(|| env::var("APP_ENV").ok());

  let mut files_to_check: Vec<String> = Vec::new();
  if let Some(env_str) = &env_from_var {
    if !env_str.is_empty() {
      files_to_check.push(format!(
        "{}.{}.{}",
        DEFAULT_CONFIG_BASE_NAME, env_str, DEFAULT_CONFIG_EXTENSION
      ));
    }
  }
  files_to_check.push(format!(
    "{}.{}",
    DEFAULT_CONFIG_BASE_NAME, DEFAULT_CONFIG_EXTENSION
  ));

  for file_name in &files_to_check {
    let path = dir.join(file_name);
    if path.is_file() {
      return Ok(path);
    }
  }

  Err(Error::ConfigNotFound(format!(
    "Searched for: {:?} in {:?}. Provide a config file or check LOGPOOL_ENV/APP_ENV.",
    files_to_check, dir
  )))
}

/// Loads and validates a YAML configuration file.
pub fn load_from_file(config_path: &Path) -> Result<LogPoolConfig> {
  let file = File::open(config_path).map_err(Error::ConfigRead)?;
  let reader = io::BufReader::new(file);
  let raw_config: ConfigRaw =
    serde_yaml::from_reader(reader).map_err(|e| Error::ConfigParse(e.to_string()))?;
  let config = processed::process_raw_config(raw_config)?;
  tracing::debug!(target: "logpool", path = ?config_path, "configuration loaded");
  Ok(config)
}

/// Parses and validates a YAML configuration document.
pub fn load_from_str(yaml: &str) -> Result<LogPoolConfig> {
  let raw_config: ConfigRaw =
    serde_yaml::from_str(yaml).map_err(|e| Error::ConfigParse(e.to_string()))?;
  processed::process_raw_config(raw_config)
}
