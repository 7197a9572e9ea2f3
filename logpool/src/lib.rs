//! `logpool` - many workers, one log file.
//!
//! A worker pool whose threads never touch the log file themselves. Each
//! worker installs a [`WorkerLogForwarder`] as its default `tracing`
//! dispatcher; everything it logs (through `tracing` or the `log` crate)
//! becomes a [`LogRecord`] on a shared channel. A single [`Sink`] thread
//! drains that channel into a size-rotated file and is stopped only after
//! every worker has been joined, so nothing logged before shutdown is lost.
//!
//! ```no_run
//! use logpool::LoggingPool;
//!
//! let pool = LoggingPool::builder()
//!   .path("logs/pool.log")
//!   .rotation(20_000, 3)
//!   .format("%(processName)s %(levelname)s %(message)s")
//!   .processes(2)
//!   .build()?;
//!
//! let (sums, report) = pool.scope(|active| {
//!   active.map(
//!     |n: u64| {
//!       tracing::info!("summing {} numbers", n);
//!       (0..n).sum::<u64>()
//!     },
//!     vec![10, 100, 1000],
//!   )
//! })?;
//! println!("{:?}, {} records written", sums, report.records_written);
//! # Ok::<(), logpool::Error>(())
//! ```

// Declare modules following the file structure
mod channel;
pub mod config;
pub mod encoders;
pub mod error;
pub mod forwarder;
pub mod model;
pub mod pool;
mod roller;
pub mod sink;

// Re-export key public types for easier use by library consumers.
pub use channel::ChannelHandle;
pub use config::{
  find_config_file, load_from_file, load_from_str, Destination, EncoderConfig, LogPoolConfig,
  OpenMode, PoolConfig, RotationPolicy, SinkConfig,
};
pub use error::{Error, Result};
pub use forwarder::{ForwarderConfig, ForwarderGuard, WorkerLogForwarder};
pub use model::{LogRecord, LogValue};
pub use pool::{ActivePool, Imap, LoggingPool, LoggingPoolBuilder, WorkerContext};
pub use roller::RotatingFileWriter;
pub use sink::{Sink, SinkReport, SinkState};
