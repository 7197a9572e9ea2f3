//! The orchestrator: a worker pool whose logging is collapsed into one sink.
//!
//! [`LoggingPool::enter`] starts the sink, then the workers; each worker
//! installs a forwarder bound to the sink's channel before it runs anything.
//! [`ActivePool::exit`] reverses that: workers are joined first, then the
//! sink drains everything they logged and stops.

mod workers;

pub use workers::{Initializer, WorkerContext, WORKER_NAME_PREFIX};

use crate::channel::ChannelHandle;
use crate::config::{self, LogPoolConfig, PoolConfig, SinkConfig};
use crate::error::{panic_message, Error, Result};
use crate::sink::{Sink, SinkReport};
use workers::{WorkerPool, WorkerSetup};

use fibre::mpmc;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_core::metadata::LevelFilter;

/// A configured, not yet running pool.
pub struct LoggingPool {
  pool: PoolConfig,
  sink: SinkConfig,
  initializer: Option<Arc<Initializer>>,
}

impl fmt::Debug for LoggingPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoggingPool")
      .field("pool", &self.pool)
      .field("sink", &self.sink)
      .field("has_initializer", &self.initializer.is_some())
      .finish()
  }
}

impl LoggingPool {
  pub fn new(pool: PoolConfig, sink: SinkConfig) -> Result<Self> {
    pool.validate()?;
    sink.validate()?;
    Ok(Self {
      pool,
      sink,
      initializer: None,
    })
  }

  pub fn from_config(config: LogPoolConfig) -> Result<Self> {
    Self::new(config.pool, config.sink)
  }

  /// Loads a YAML configuration file.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
    Self::from_config(config::load_from_file(path.as_ref())?)
  }

  pub fn builder() -> LoggingPoolBuilder {
    LoggingPoolBuilder::default()
  }

  /// Runs `initializer` in every worker (recycled ones included) after its
  /// forwarder is installed, so whatever it logs reaches the sink.
  pub fn with_initializer<F>(mut self, initializer: F) -> Self
  where
    F: Fn(&WorkerContext) + Send + Sync + 'static,
  {
    self.initializer = Some(Arc::new(initializer));
    self
  }

  pub fn pool_config(&self) -> &PoolConfig {
    &self.pool
  }

  pub fn sink_config(&self) -> &SinkConfig {
    &self.sink
  }

  /// Starts the sink, then the workers.
  ///
  /// A sink that cannot open its destination fails here and no worker is
  /// started.
  pub fn enter(self) -> Result<ActivePool> {
    let mut sink = Sink::new(self.sink);
    sink.start()?;

    let setup = WorkerSetup {
      channel: sink.channel(),
      level: self.pool.level,
      initializer: self.initializer,
      max_tasks: self.pool.max_tasks_per_worker,
    };
    let workers = match WorkerPool::start(setup, self.pool.processes) {
      Ok(workers) => workers,
      Err(e) => {
        if let Err(stop_error) = sink.stop() {
          tracing::error!(target: "logpool", error = %stop_error, "Failed to stop sink after worker spawn failure");
        }
        return Err(e);
      }
    };

    tracing::info!(
      target: "logpool",
      workers = self.pool.processes,
      destination = %sink.config().destination_label(),
      "Logging pool started"
    );

    Ok(ActivePool {
      sink,
      workers,
      exited: false,
    })
  }

  /// Enters the pool, runs `body` and always exits.
  ///
  /// An error from `body` is returned after the sink has been stopped; an
  /// error from stopping the sink is returned when `body` succeeded.
  pub fn scope<T, F>(self, body: F) -> Result<(T, SinkReport)>
  where
    F: FnOnce(&ActivePool) -> Result<T>,
  {
    let active = self.enter()?;
    let outcome = body(&active);
    let exit_result = active.exit();

    match (outcome, exit_result) {
      (Ok(value), Ok(report)) => Ok((value, report)),
      (Err(body_error), exit_result) => {
        if let Err(exit_error) = exit_result {
          tracing::error!(target: "logpool", error = %exit_error, "Sink failed while unwinding a scope");
        }
        Err(body_error)
      }
      (Ok(_), Err(exit_error)) => Err(exit_error),
    }
  }
}

/// Fluent construction of a [`LoggingPool`].
///
/// ```no_run
/// use logpool::LoggingPool;
///
/// let pool = LoggingPool::builder()
///   .path("logs/pool.log")
///   .rotation(20_000, 3)
///   .format("%(processName)s %(levelname)s %(message)s")
///   .processes(4)
///   .build()?;
/// # Ok::<(), logpool::Error>(())
/// ```
#[derive(Default)]
pub struct LoggingPoolBuilder {
  pool: PoolConfig,
  sink: Option<SinkConfig>,
  initializer: Option<Arc<Initializer>>,
}

impl fmt::Debug for LoggingPoolBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoggingPoolBuilder")
      .field("pool", &self.pool)
      .field("sink", &self.sink)
      .field("has_initializer", &self.initializer.is_some())
      .finish_non_exhaustive()
  }
}

impl LoggingPoolBuilder {
  /// Replaces the whole sink configuration.
  pub fn sink(mut self, sink: SinkConfig) -> Self {
    self.sink = Some(sink);
    self
  }

  /// Sets the destination file, keeping any other sink settings.
  pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
    let path = path.into();
    self.sink = Some(match self.sink.take() {
      Some(mut sink) => {
        sink.path = path;
        sink
      }
      None => SinkConfig::new(path),
    });
    self
  }

  fn map_sink(mut self, f: impl FnOnce(SinkConfig) -> SinkConfig) -> Self {
    let sink = self.sink.take().unwrap_or_else(|| SinkConfig::new(""));
    self.sink = Some(f(sink));
    self
  }

  pub fn rotation(self, max_bytes: u64, backup_count: u32) -> Self {
    self.map_sink(|sink| sink.rotation(max_bytes, backup_count))
  }

  pub fn format<S: Into<String>>(self, format: S) -> Self {
    self.map_sink(|sink| sink.format(format))
  }

  pub fn mode(self, mode: config::OpenMode) -> Self {
    self.map_sink(|sink| sink.mode(mode))
  }

  /// Writes to a console stream instead of a file when given
  /// `Destination::Stdout` or `Destination::Stderr`.
  pub fn destination(self, destination: config::Destination) -> Self {
    self.map_sink(|sink| sink.destination(destination))
  }

  pub fn processes(mut self, processes: usize) -> Self {
    self.pool = self.pool.processes(processes);
    self
  }

  pub fn max_tasks_per_worker(mut self, max_tasks: usize) -> Self {
    self.pool = self.pool.max_tasks_per_worker(max_tasks);
    self
  }

  pub fn level(mut self, level: LevelFilter) -> Self {
    self.pool = self.pool.level(level);
    self
  }

  pub fn initializer<F>(mut self, initializer: F) -> Self
  where
    F: Fn(&WorkerContext) + Send + Sync + 'static,
  {
    self.initializer = Some(Arc::new(initializer));
    self
  }

  pub fn build(self) -> Result<LoggingPool> {
    let sink = self.sink.ok_or_else(|| Error::InvalidConfigValue {
      field: "sink.path".to_string(),
      message: "A sink path is required.".to_string(),
    })?;
    let mut pool = LoggingPool::new(self.pool, sink)?;
    pool.initializer = self.initializer;
    Ok(pool)
  }
}

/// A running pool. Exits on drop if [`ActivePool::exit`] was not called.
#[must_use = "Dropping the ActivePool shuts down the workers and the sink immediately"]
pub struct ActivePool {
  sink: Sink,
  workers: WorkerPool,
  exited: bool,
}

impl fmt::Debug for ActivePool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ActivePool")
      .field("workers", &self.workers.size())
      .field("sink_state", &self.sink.state())
      .finish()
  }
}

impl ActivePool {
  /// A producer handle for threads outside the pool.
  pub fn channel(&self) -> ChannelHandle {
    self.sink.channel()
  }

  pub fn worker_count(&self) -> usize {
    self.workers.size()
  }

  /// Runs `f` over `items` on the workers and returns the results in input
  /// order.
  ///
  /// Waits for every task even when some of them panic; the first panic in
  /// input order is returned as `Error::TaskPanicked`.
  pub fn map<T, R, F, I>(&self, f: F, items: I) -> Result<Vec<R>>
  where
    F: Fn(T) -> R + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = T>,
  {
    let mut results = Vec::new();
    let mut first_error = None;
    for outcome in self.imap(f, items)? {
      match outcome {
        Ok(value) => results.push(value),
        Err(e) => {
          if first_error.is_none() {
            first_error = Some(e);
          }
        }
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(results),
    }
  }

  /// Submits every item at once and returns an iterator that yields the
  /// results lazily, in input order.
  pub fn imap<T, R, F, I>(&self, f: F, items: I) -> Result<Imap<R>>
  where
    F: Fn(T) -> R + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
    I: IntoIterator<Item = T>,
  {
    let f = Arc::new(f);
    let (result_tx, result_rx) = mpmc::unbounded::<(usize, Result<R>)>();

    let mut total = 0;
    for (index, item) in items.into_iter().enumerate() {
      let f = Arc::clone(&f);
      let result_tx = result_tx.clone();
      self.workers.submit(Box::new(move || {
        let outcome = run_task(index, || f(item));
        let _ = result_tx.send((index, outcome));
      }))?;
      total += 1;
    }

    Ok(Imap {
      results: result_rx,
      buffered: BTreeMap::new(),
      next_index: 0,
      total,
    })
  }

  /// Runs a single task on a worker and waits for its result.
  pub fn apply<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let (result_tx, result_rx) = mpmc::bounded::<Result<R>>(1);
    self.workers.submit(Box::new(move || {
      let _ = result_tx.send(run_task(0, f));
    }))?;
    result_rx.recv().map_err(|_| Error::PoolClosed)?
  }

  /// Joins every worker, then stops the sink and returns what it wrote.
  pub fn exit(mut self) -> Result<SinkReport> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> Result<SinkReport> {
    self.exited = true;
    self.workers.shutdown();
    let report = self.sink.stop()?;
    tracing::info!(
      target: "logpool",
      records = report.records_written,
      rollovers = report.rollovers,
      "Logging pool stopped"
    );
    Ok(report)
  }
}

impl Drop for ActivePool {
  fn drop(&mut self) {
    if !self.exited {
      if let Err(e) = self.shutdown() {
        eprintln!("[logpool:ERROR] Failed to shut down logging pool during drop: {}", e);
      }
    }
  }
}

fn run_task<R>(index: usize, task: impl FnOnce() -> R) -> Result<R> {
  catch_unwind(AssertUnwindSafe(task)).map_err(|payload| Error::TaskPanicked {
    index,
    message: panic_message(payload.as_ref()),
  })
}

/// Ordered results of [`ActivePool::imap`].
///
/// Results that finish out of order are buffered until their turn.
pub struct Imap<R: Send> {
  results: mpmc::Receiver<(usize, Result<R>)>,
  buffered: BTreeMap<usize, Result<R>>,
  next_index: usize,
  total: usize,
}

impl<R: Send> Imap<R> {
  /// Results not yet yielded.
  pub fn remaining(&self) -> usize {
    self.total - self.next_index
  }
}

impl<R: Send> Iterator for Imap<R> {
  type Item = Result<R>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.next_index >= self.total {
      return None;
    }

    let index = self.next_index;
    loop {
      if let Some(outcome) = self.buffered.remove(&index) {
        self.next_index += 1;
        return Some(outcome);
      }
      match self.results.recv() {
        Ok((i, outcome)) => {
          self.buffered.insert(i, outcome);
        }
        Err(_) => {
          // Every pending task was dropped unexecuted.
          self.next_index = self.total;
          return Some(Err(Error::PoolClosed));
        }
      }
    }
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.remaining()))
  }
}
