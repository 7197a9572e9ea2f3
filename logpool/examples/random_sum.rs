// examples/random_sum.rs
//
// Two workers sum seeded random numbers while logging their progress.
// Everything they log ends up in logs/multiprocessing_pool.log (rotated at
// 20000 bytes, 3 backups); nothing is printed by the workers themselves.

use logpool::LoggingPool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const TASK_SIZE: u32 = 10_000;

fn worker_task((seed, count): (u64, u32)) -> f64 {
  let name = std::thread::current().name().unwrap_or("unnamed").to_string();
  tracing::debug!(seed, count, "Worker task started as \"{}\"", name);

  let mut rng = StdRng::seed_from_u64(seed);
  let mut result = 0.0;
  for _ in 0..count {
    result += f64::from(rng.random_range(0..=1000u32)) / f64::from(count);
  }

  tracing::info!("Worker \"{}\" finished calculations, result={:.3}", name, result);
  result
}

fn main() -> logpool::Result<()> {
  let config_path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/examples/logpool.yaml"));
  let pool = LoggingPool::from_file(config_path)?;

  let tasks = vec![
    (3_264_328, TASK_SIZE),
    (87_529, TASK_SIZE),
    (64_209, TASK_SIZE),
    (87_529, TASK_SIZE),
  ];

  let (_, report) = pool.scope(|active| {
    for result in active.imap(worker_task, tasks)? {
      println!("{:.3}", result?);
    }
    Ok(())
  })?;

  println!(
    "{} records written ({} bytes, {} rollovers)",
    report.records_written, report.bytes_written, report.rollovers
  );
  Ok(())
}
