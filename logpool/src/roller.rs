use crate::config::{OpenMode, RotationPolicy};
use crate::error::{Error, Result};

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

// Matches the numeric suffix of a rolled segment: "<base>.<n>".
static BACKUP_SUFFIX_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^\.(\d+)$").expect("Backup suffix regex should be valid"));

/// A size-based rotating file writer.
///
/// The active segment lives at the configured path. On rollover the active
/// file becomes `<path>.1`, every existing `<path>.<n>` moves to
/// `<path>.<n+1>`, and anything beyond `backup_count` is deleted. Rollover
/// happens before a record that would push the active segment past
/// `max_bytes`, so records are never split across segments.
///
/// Rollover is disabled when either `max_bytes` or `backup_count` is zero.
pub struct RotatingFileWriter {
  policy: RotationPolicy,
  path: PathBuf,
  writer: Option<BufWriter<File>>,
  current_size: u64,
  rollovers: u64,
}

impl RotatingFileWriter {
  /// Opens (creating parent directories and the file as needed) the active segment.
  pub fn open(path: &Path, policy: RotationPolicy, mode: OpenMode) -> Result<Self> {
    if let Some(parent_dir) = path.parent() {
      if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
        fs::create_dir_all(parent_dir).map_err(|e| Error::SinkSetup {
          path: path.display().to_string(),
          reason: format!("Failed to create directory {:?}: {}", parent_dir, e),
        })?;
      }
    }
    let (writer, current_size) =
      Self::open_file(path, mode == OpenMode::Truncate).map_err(|e| Error::SinkSetup {
        path: path.display().to_string(),
        reason: format!("Failed to open log file: {}", e),
      })?;

    Ok(Self {
      policy,
      path: path.to_path_buf(),
      writer: Some(writer),
      current_size,
      rollovers: 0,
    })
  }

  fn open_file(path: &Path, truncate: bool) -> io::Result<(BufWriter<File>, u64)> {
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
      options.write(true).truncate(true);
    } else {
      options.append(true);
    }
    let file = options.open(path)?;
    let current_size = file.metadata()?.len();
    Ok((BufWriter::new(file), current_size))
  }

  /// Bytes in the active segment, including buffered ones.
  pub fn current_size(&self) -> u64 {
    self.current_size
  }

  pub fn rollovers(&self) -> u64 {
    self.rollovers
  }

  fn should_roll(&self, incoming: usize) -> bool {
    self.policy.is_enabled()
      && self.current_size > 0
      && self.current_size + incoming as u64 > self.policy.max_bytes
  }

  /// Path of the `index`-th rolled segment.
  fn backup_path(&self, index: u32) -> PathBuf {
    let mut name = self.path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
  }

  /// Closes the active segment, shifts the backups and starts a new segment.
  fn roll(&mut self) -> io::Result<()> {
    if let Some(mut old_writer) = self.writer.take() {
      old_writer.flush()?;
    }

    let backup_count = self.policy.backup_count;
    let oldest = self.backup_path(backup_count);
    if oldest.exists() {
      fs::remove_file(&oldest)?;
    }
    for index in (1..backup_count).rev() {
      let source = self.backup_path(index);
      if source.exists() {
        fs::rename(&source, self.backup_path(index + 1))?;
      }
    }
    if self.path.exists() {
      fs::rename(&self.path, self.backup_path(1))?;
    }

    let (new_writer, new_size) = Self::open_file(&self.path, true)?;
    self.writer = Some(new_writer);
    self.current_size = new_size;
    self.rollovers += 1;

    self.remove_stale_backups();
    Ok(())
  }

  /// Deletes segments numbered above `backup_count`, e.g. left behind by a
  /// previous run with a larger retention.
  fn remove_stale_backups(&self) {
    let (Some(directory), Some(base_name)) = (
      self.path.parent(),
      self.path.file_name().and_then(|n| n.to_str()),
    ) else {
      return;
    };
    let directory = if directory.as_os_str().is_empty() {
      Path::new(".")
    } else {
      directory
    };
    let Ok(entries) = fs::read_dir(directory) else {
      return;
    };

    for entry in entries.flatten() {
      let file_name = entry.file_name();
      let Some(file_name) = file_name.to_str() else {
        continue;
      };
      let Some(suffix) = file_name.strip_prefix(base_name) else {
        continue;
      };
      let Some(caps) = BACKUP_SUFFIX_REGEX.captures(suffix) else {
        continue;
      };
      let Ok(index) = caps[1].parse::<u32>() else {
        continue;
      };
      if index > self.policy.backup_count {
        if let Err(e) = fs::remove_file(entry.path()) {
          eprintln!(
            "[logpool:WARN] Failed to delete stale log segment {:?}: {}",
            entry.path(),
            e
          );
        }
      }
    }
  }

  /// Writes one formatted record, rolling over first if it would not fit.
  pub fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
    if self.should_roll(bytes.len()) {
      self.roll()?;
    }
    let writer = self
      .writer
      .as_mut()
      .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log segment is not open"))?;
    writer.write_all(bytes)?;
    self.current_size += bytes.len() as u64;
    Ok(())
  }
}

impl Write for RotatingFileWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.write_record(buf)?;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    match self.writer.as_mut() {
      Some(writer) => writer.flush(),
      None => Ok(()),
    }
  }
}
