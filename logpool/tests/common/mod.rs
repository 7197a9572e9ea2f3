#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub const LINE_FORMAT: &str = "%(processName)s %(levelname)s %(message)s";

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
  let mut names: Vec<String> = fs::read_dir(dir)
    .unwrap()
    .map(|entry| entry.unwrap().file_name().into_string().unwrap())
    .collect();
  names.sort();
  names
}

/// Every line of a rotated log, oldest segment first.
pub fn read_segments(path: &Path) -> Vec<String> {
  let mut segments = Vec::new();
  for index in (1..=32).rev() {
    let backup = format!("{}.{}", path.display(), index);
    if let Ok(content) = fs::read_to_string(&backup) {
      segments.push(content);
    }
  }
  if let Ok(content) = fs::read_to_string(path) {
    segments.push(content);
  }
  segments
    .iter()
    .flat_map(|content| content.lines().map(str::to_string).collect::<Vec<_>>())
    .collect()
}

/// Lines whose message starts with `prefix`, as written by `LINE_FORMAT`.
pub fn lines_with_message(lines: &[String], prefix: &str) -> Vec<String> {
  lines
    .iter()
    .filter(|line| {
      line
        .splitn(3, ' ')
        .nth(2)
        .is_some_and(|message| message.starts_with(prefix))
    })
    .cloned()
    .collect()
}
