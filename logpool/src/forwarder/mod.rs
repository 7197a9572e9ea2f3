//! The producer side of the pipeline.
//!
//! A `WorkerLogForwarder` is a `tracing_subscriber::Layer` that turns every
//! event it sees into a [`LogRecord`] and hands it to a sink's channel. It
//! never formats or writes anything itself. Installed as a thread's default
//! dispatcher, it captures everything that thread logs through `tracing` or,
//! via the `tracing-log` bridge, through the `log` crate.

mod visitor;

use crate::channel::ChannelHandle;
use crate::model::LogRecord;
use visitor::LogRecordVisitor;

use once_cell::sync::OnceCell;
use tracing::{Event, Subscriber};
use tracing_core::metadata::LevelFilter;
use tracing_log::NormalizeEvent;
use tracing_subscriber::{
  filter::{filter_fn, FilterExt},
  layer::{Context, Layer, SubscriberExt},
  registry::{LookupSpan, Registry},
};

static LOG_BRIDGE: OnceCell<()> = OnceCell::new();

/// Target of the crate's own diagnostics. Events with exactly this target
/// are never forwarded, so the destination only holds what workers log.
pub(crate) const LIBRARY_TARGET: &str = "logpool";

/// Per-worker logging configuration, bound once when the worker starts.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
  /// Where records go.
  pub channel: ChannelHandle,
  /// Events less severe than this are dropped before they reach the channel.
  pub level: LevelFilter,
  /// Origin name stamped on every record, e.g. `PoolWorker-1`.
  pub process_name: String,
}

impl ForwarderConfig {
  pub fn new<S: Into<String>>(channel: ChannelHandle, level: LevelFilter, process_name: S) -> Self {
    Self {
      channel,
      level,
      process_name: process_name.into(),
    }
  }
}

/// Keeps a forwarder installed as the current thread's default dispatcher.
///
/// Dropping it restores the previous default. Workers hold it for their
/// whole lifetime.
#[must_use = "The forwarder is uninstalled as soon as the guard is dropped"]
pub struct ForwarderGuard {
  process_name: String,
  _default: tracing::subscriber::DefaultGuard,
}

impl ForwarderGuard {
  pub fn process_name(&self) -> &str {
    &self.process_name
  }
}

impl std::fmt::Debug for ForwarderGuard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ForwarderGuard")
      .field("process_name", &self.process_name)
      .finish()
  }
}

/// A layer that enqueues every event as a `LogRecord`.
pub struct WorkerLogForwarder {
  channel: ChannelHandle,
  process_name: String,
}

impl WorkerLogForwarder {
  pub fn new(config: ForwarderConfig) -> Self {
    Self {
      channel: config.channel,
      process_name: config.process_name,
    }
  }

  /// Installs a forwarder as the calling thread's default dispatcher.
  ///
  /// The level threshold is applied as a per-layer filter, so events below
  /// it are discarded in the producing thread. The crate's own diagnostics
  /// (target `logpool`) are filtered out the same way. Records from the
  /// `log` crate are bridged into `tracing` the first time any forwarder is
  /// installed.
  pub fn install(config: ForwarderConfig) -> ForwarderGuard {
    bridge_log_records();

    let filter = config
      .level
      .and(filter_fn(|metadata| metadata.target() != LIBRARY_TARGET));
    let process_name = config.process_name.clone();
    let subscriber = Registry::default().with(WorkerLogForwarder::new(config).with_filter(filter));
    let default_guard = tracing::subscriber::set_default(subscriber);

    ForwarderGuard {
      process_name,
      _default: default_guard,
    }
  }

  fn build_record(&self, event: &Event<'_>) -> LogRecord {
    // Records bridged from `log` carry their real target and level here.
    let normalized = event.normalized_metadata();
    let metadata = normalized.as_ref().unwrap_or_else(|| event.metadata());

    let mut record = LogRecord::new(*metadata.level(), metadata.target(), None)
      .with_process_name(self.process_name.as_str());
    let mut visitor = LogRecordVisitor::new(&mut record);
    event.record(&mut visitor);
    record
  }
}

impl<S> Layer<S> for WorkerLogForwarder
where
  S: Subscriber + for<'span> LookupSpan<'span>,
{
  fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
    let record = self.build_record(event);
    // A closed channel means the sink is gone; the record is dropped.
    let _ = self.channel.enqueue(record);
  }
}

/// Routes `log` crate records into `tracing`, once per process.
fn bridge_log_records() {
  LOG_BRIDGE.get_or_init(|| {
    if let Err(e) = tracing_log::LogTracer::init() {
      // Another `log` logger owns the facade; `log` records bypass the pool.
      tracing::debug!(target: "logpool", error = %e, "log bridge not installed");
    }
  });
}
