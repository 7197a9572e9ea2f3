// A fixed-size thread pool whose workers log through the sink channel.

use crate::channel::ChannelHandle;
use crate::error::{panic_message, Error, Result};
use crate::forwarder::{ForwarderConfig, WorkerLogForwarder};

use fibre::mpmc;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing_core::metadata::LevelFilter;

/// Prefix of every worker thread's name; the suffix is a 1-based counter.
pub const WORKER_NAME_PREFIX: &str = "PoolWorker-";

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Target of worker errors that belong in the destination next to the
/// records they affect. Plain `logpool` diagnostics are never forwarded.
const WORKER_ERROR_TARGET: &str = "logpool::worker";

/// User hook run once in every worker, after its forwarder is installed.
pub type Initializer = dyn Fn(&WorkerContext) + Send + Sync + 'static;

/// What an initializer gets to see about the worker it runs in.
#[derive(Debug, Clone)]
pub struct WorkerContext {
  name: String,
  channel: ChannelHandle,
}

impl WorkerContext {
  /// The worker's name, e.g. `PoolWorker-3`.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The sink channel this worker's forwarder is bound to.
  pub fn channel(&self) -> &ChannelHandle {
    &self.channel
  }
}

/// Everything a worker needs at startup. Shared by all workers of a pool,
/// including recycled successors.
pub(crate) struct WorkerSetup {
  pub(crate) channel: ChannelHandle,
  pub(crate) level: LevelFilter,
  pub(crate) initializer: Option<Arc<Initializer>>,
  pub(crate) max_tasks: Option<usize>,
}

struct PoolShared {
  setup: WorkerSetup,
  handles: Mutex<Vec<JoinHandle<()>>>,
  next_id: AtomicUsize,
}

pub(crate) struct WorkerPool {
  job_tx: Option<mpmc::Sender<Job>>,
  shared: Arc<PoolShared>,
  size: usize,
}

impl WorkerPool {
  /// Spawns `size` workers. On a spawn failure the workers already started
  /// are shut down before the error is returned.
  pub(crate) fn start(setup: WorkerSetup, size: usize) -> Result<Self> {
    let (job_tx, job_rx) = mpmc::unbounded::<Job>();
    let shared = Arc::new(PoolShared {
      setup,
      handles: Mutex::new(Vec::with_capacity(size)),
      next_id: AtomicUsize::new(1),
    });

    let mut pool = Self {
      job_tx: Some(job_tx),
      shared,
      size,
    };

    for _ in 0..size {
      if let Err(e) = spawn_worker(&pool.shared, job_rx.clone()) {
        pool.shutdown();
        return Err(e);
      }
    }
    Ok(pool)
  }

  pub(crate) fn size(&self) -> usize {
    self.size
  }

  /// Queues a job for the next free worker.
  pub(crate) fn submit(&self, job: Job) -> Result<()> {
    match &self.job_tx {
      Some(job_tx) => job_tx.send(job).map_err(|_| Error::PoolClosed),
      None => Err(Error::PoolClosed),
    }
  }

  /// Closes the job queue and joins every worker, including successors
  /// spawned by recycling while the join is in progress.
  pub(crate) fn shutdown(&mut self) {
    // Workers drain what is queued, then see the queue disconnect.
    self.job_tx.take();

    loop {
      let batch: Vec<JoinHandle<()>> = self.shared.handles.lock().drain(..).collect();
      if batch.is_empty() {
        break;
      }
      for handle in batch {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        if let Err(payload) = handle.join() {
          tracing::error!(
            target: "logpool",
            worker = %name,
            panic = %panic_message(payload.as_ref()),
            "Worker thread panicked"
          );
        }
      }
    }
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    if self.job_tx.is_some() {
      self.shutdown();
    }
  }
}

fn spawn_worker(shared: &Arc<PoolShared>, jobs: mpmc::Receiver<Job>) -> Result<()> {
  let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
  let name = format!("{}{}", WORKER_NAME_PREFIX, id);
  let worker_shared = Arc::clone(shared);
  let thread_name = name.clone();

  let handle = thread::Builder::new()
    .name(thread_name)
    .spawn(move || run_worker(worker_shared, jobs, name))
    .map_err(|e| Error::WorkerSpawn(e.to_string()))?;

  shared.handles.lock().push(handle);
  Ok(())
}

/// The body of a worker thread.
fn run_worker(shared: Arc<PoolShared>, jobs: mpmc::Receiver<Job>, name: String) {
  let setup = &shared.setup;
  let _forwarder = WorkerLogForwarder::install(ForwarderConfig::new(
    setup.channel.clone(),
    setup.level,
    name.as_str(),
  ));
  tracing::debug!(target: "logpool", worker = %name, "Worker started");

  if let Some(initializer) = &setup.initializer {
    let context = WorkerContext {
      name: name.clone(),
      channel: setup.channel.clone(),
    };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| initializer(&context))) {
      tracing::error!(
        target: WORKER_ERROR_TARGET,
        worker = %name,
        panic = %panic_message(payload.as_ref()),
        "Worker initializer panicked"
      );
    }
  }

  let mut completed = 0usize;
  while let Ok(job) = jobs.recv() {
    job();
    completed += 1;

    if setup.max_tasks.is_some_and(|max| completed >= max) {
      match spawn_worker(&shared, jobs.clone()) {
        Ok(()) => {
          tracing::debug!(
            target: "logpool",
            worker = %name,
            tasks = completed,
            "Worker retired"
          );
          return;
        }
        Err(e) => {
          tracing::error!(
            target: WORKER_ERROR_TARGET,
            worker = %name,
            error = %e,
            "Could not spawn a successor, worker keeps running"
          );
          completed = 0;
        }
      }
    }
  }

  tracing::debug!(target: "logpool", worker = %name, tasks = completed, "Worker exiting");
}
