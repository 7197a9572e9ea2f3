mod common;
use common::*;

use logpool::{Error, LoggingPool, SinkConfig, PoolConfig, WorkerContext};
use pretty_assertions::assert_eq;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;
use tracing_core::metadata::LevelFilter;

#[test]
fn two_workers_fill_rotated_segments_without_losing_lines() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("multiprocessing_pool.log");

  let pool = LoggingPool::new(
    PoolConfig::new().processes(2).level(LevelFilter::DEBUG),
    SinkConfig::new(&path).rotation(20_000, 3).format(LINE_FORMAT),
  )
  .unwrap();

  // Both jobs wait for each other, so each runs on its own worker and every
  // worker emits 500 debug + 500 info records.
  let both_running = Arc::new(Barrier::new(2));
  let (names, report) = pool
    .scope(|active| {
      active.map(
        move |_job: u32| {
          both_running.wait();
          for step in 0..500 {
            tracing::debug!("step {:03} begin", step);
            tracing::info!("step {:03} done", step);
          }
          std::thread::current().name().unwrap_or_default().to_string()
        },
        0..2u32,
      )
    })
    .unwrap();

  let workers: BTreeSet<String> = names.into_iter().collect();
  assert_eq!(workers.len(), 2);
  assert_eq!(report.records_written, 2000);
  assert!(report.rollovers >= 3);

  let file_list = file_names(dir.path());
  assert_eq!(
    file_list,
    vec![
      "multiprocessing_pool.log",
      "multiprocessing_pool.log.1",
      "multiprocessing_pool.log.2",
      "multiprocessing_pool.log.3"
    ]
  );
  for name in &file_list {
    assert!(fs::metadata(dir.path().join(name)).unwrap().len() <= 20_000);
  }

  // exit() has returned, so every line is already on disk.
  let line_format = Regex::new(r"^(PoolWorker-[12]) (DEBUG step (\d{3}) begin|INFO step (\d{3}) done)$").unwrap();
  let lines = read_segments(&path);
  assert_eq!(lines.len(), 2000);

  let mut seen = BTreeSet::new();
  for line in &lines {
    let caps = line_format
      .captures(line)
      .unwrap_or_else(|| panic!("unexpected line: {:?}", line));
    assert!(seen.insert(line.clone()), "duplicate line: {}", line);
    assert!(workers.contains(&caps[1]));
  }
  for worker in &workers {
    let own = lines.iter().filter(|l| l.starts_with(&format!("{} ", worker))).count();
    assert_eq!(own, 1000, "{}", worker);
  }
}

#[test]
fn records_below_the_threshold_never_reach_the_file() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("threshold.log");
  let pool = LoggingPool::builder()
    .path(&path)
    .format(LINE_FORMAT)
    .processes(2)
    .level(LevelFilter::INFO)
    .build()
    .unwrap();

  let active = pool.enter().unwrap();
  active
    .map(
      |i: u32| {
        tracing::trace!("trace {}", i);
        tracing::debug!("debug {}", i);
        tracing::info!("info {}", i);
        tracing::warn!("warn {}", i);
      },
      0..50u32,
    )
    .unwrap();
  active.exit().unwrap();

  let lines = read_segments(&path);
  assert!(lines.iter().all(|l| !l.contains(" DEBUG ") && !l.contains(" TRACE ")));
  assert_eq!(lines_with_message(&lines, "info ").len(), 50);
  assert_eq!(lines_with_message(&lines, "warn ").len(), 50);
}

#[test]
fn initializer_logging_is_captured() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("init.log");
  let pool = LoggingPool::builder()
    .path(&path)
    .format(LINE_FORMAT)
    .processes(3)
    .build()
    .unwrap()
    .with_initializer(|ctx: &WorkerContext| {
      tracing::info!("initializing {}", ctx.name());
    });

  let ((), _report) = pool.scope(|_active| Ok(())).unwrap();

  let lines = read_segments(&path);
  let mut init_lines = lines_with_message(&lines, "initializing");
  init_lines.sort();
  assert_eq!(
    init_lines,
    vec![
      "PoolWorker-1 INFO initializing PoolWorker-1",
      "PoolWorker-2 INFO initializing PoolWorker-2",
      "PoolWorker-3 INFO initializing PoolWorker-3"
    ]
  );
}

#[test]
fn recycled_workers_keep_every_record() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("recycled.log");
  let initialized = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
  let counter = std::sync::Arc::clone(&initialized);

  let pool = LoggingPool::builder()
    .path(&path)
    .format(LINE_FORMAT)
    .processes(2)
    .max_tasks_per_worker(3)
    .initializer(move |_ctx: &WorkerContext| {
      counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    })
    .build()
    .unwrap();

  let (_, report) = pool
    .scope(|active| active.map(|i: u32| tracing::info!("item {:02}", i), 0..30u32))
    .unwrap();
  assert_eq!(report.records_written, 30);

  let lines = read_segments(&path);
  let items: BTreeSet<String> = lines_with_message(&lines, "item ")
    .iter()
    .map(|l| l.rsplit(' ').next().unwrap().to_string())
    .collect();
  assert_eq!(items.len(), 30);

  let worker_ids: BTreeSet<u32> = lines_with_message(&lines, "item ")
    .iter()
    .map(|l| l["PoolWorker-".len()..].split(' ').next().unwrap().parse().unwrap())
    .collect();
  assert!(worker_ids.iter().any(|id| *id > 2), "no recycled worker logged: {:?}", worker_ids);
  // 30 tasks at 3 per worker means at least 10 workers ran the initializer.
  assert!(initialized.load(std::sync::atomic::Ordering::SeqCst) >= 10);
}

#[test]
fn log_crate_records_are_captured() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("log_crate.log");
  let pool = LoggingPool::builder()
    .path(&path)
    .format("%(name)s %(levelname)s %(message)s")
    .processes(2)
    .build()
    .unwrap();

  pool
    .scope(|active| active.map(|i: u32| log::info!(target: "legacy", "from log {}", i), 0..10u32))
    .unwrap();

  let content = fs::read_to_string(&path).unwrap();
  let count = content
    .lines()
    .filter(|l| l.starts_with("legacy INFO from log "))
    .count();
  assert_eq!(count, 10);
}

#[test]
fn outside_threads_can_produce_through_the_channel() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("outside.log");
  let pool = LoggingPool::builder()
    .path(&path)
    .format("%(processName)s %(name)s %(message)s")
    .processes(1)
    .build()
    .unwrap();

  let active = pool.enter().unwrap();
  let channel = active.channel();
  std::thread::Builder::new()
    .name("collector".to_string())
    .spawn(move || {
      let record = logpool::LogRecord::new(tracing::Level::INFO, "main", Some("hello".to_string()));
      channel.enqueue(record).unwrap();
    })
    .unwrap()
    .join()
    .unwrap();
  active.exit().unwrap();

  let content = fs::read_to_string(&path).unwrap();
  assert!(content.lines().any(|l| l == "collector main hello"));
}

#[test]
fn pool_loaded_from_yaml_writes_json_lines() {
  let dir = tempdir().unwrap();
  let log_path = dir.path().join("logs").join("pool.jsonl");
  let config_path = dir.path().join("logpool.yaml");
  fs::write(
    &config_path,
    format!(
      "version: 1\nsink:\n  path: {:?}\n  mode: truncate\n  encoder:\n    kind: json_lines\npool:\n  processes: 2\n  level: info\n",
      log_path.display().to_string()
    ),
  )
  .unwrap();

  let pool = LoggingPool::from_file(&config_path).unwrap();
  assert_eq!(pool.pool_config().worker_count(), 2);
  pool
    .scope(|active| active.map(|i: i64| tracing::info!(item = i, "json"), 0..5i64))
    .unwrap();

  let content = fs::read_to_string(&log_path).unwrap();
  let mut items = Vec::new();
  for line in content.lines() {
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    if value["message"] == "json" {
      assert_eq!(value["level"], "INFO");
      assert!(value["process_name"].as_str().unwrap().starts_with("PoolWorker-"));
      items.push(value["fields"]["item"].as_i64().unwrap());
    }
  }
  items.sort();
  assert_eq!(items, vec![0, 1, 2, 3, 4]);
}

#[test]
fn scope_returns_the_body_error_after_exiting() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("failing_body.log");
  let pool = LoggingPool::builder()
    .path(&path)
    .format(LINE_FORMAT)
    .processes(2)
    .build()
    .unwrap();

  let result = pool.scope(|active| {
    active.map(|i: u32| tracing::info!("before failure {}", i), 0..4u32)?;
    active.map(
      |i: u32| {
        if i == 1 {
          panic!("boom");
        }
      },
      0..3u32,
    )
  });
  assert!(matches!(result, Err(Error::TaskPanicked { index: 1, .. })));

  let lines = read_segments(&path);
  assert_eq!(lines_with_message(&lines, "before failure").len(), 4);
}

#[test]
fn unopenable_destination_fails_enter() {
  let dir = tempdir().unwrap();
  let blocker = dir.path().join("not_a_dir");
  fs::write(&blocker, b"file in the way").unwrap();

  let pool = LoggingPool::builder()
    .path(blocker.join("pool.log"))
    .processes(1)
    .build()
    .unwrap();
  assert!(matches!(pool.enter(), Err(Error::SinkSetup { .. })));
}

#[cfg(target_os = "linux")]
#[test]
fn dead_sink_surfaces_from_exit() {
  let pool = LoggingPool::builder()
    .path("/dev/full")
    .format(LINE_FORMAT)
    .processes(2)
    .build()
    .unwrap();
  let active = pool.enter().unwrap();
  active.map(|i: u32| tracing::info!("lost {}", i), 0..20u32).unwrap();
  assert!(matches!(active.exit(), Err(Error::SinkFailed(_))));
}
