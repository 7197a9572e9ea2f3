// The single consumer that owns the destination file.

use crate::channel::{log_channel, ChannelConsumer, ChannelHandle};
use crate::config::{Destination, SinkConfig};
use crate::encoders::{new_record_formatter, RecordFormatter};
use crate::error::{panic_message, Error, Result};
use crate::model::ChannelItem;
use crate::roller::RotatingFileWriter;

use std::io::{self, BufWriter, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Name of the thread that drains the log channel.
pub const SINK_THREAD_NAME: &str = "logpool-sink";

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle of a `Sink`. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
  NotStarted,
  Running,
  Stopped,
}

/// What a sink run wrote, returned by `Sink::stop`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
  pub records_written: u64,
  pub bytes_written: u64,
  pub rollovers: u64,
}

/// Drains a log channel into a rotating file (or a console stream, see
/// [`Destination`]) on a dedicated thread.
///
/// The sink is the only component that ever touches the destination.
/// Producers only ever see the `ChannelHandle` returned by [`Sink::channel`].
///
/// ```no_run
/// use logpool::{Sink, SinkConfig, LogRecord};
/// use tracing::Level;
///
/// let mut sink = Sink::new(SinkConfig::new("logs/app.log").rotation(20_000, 3));
/// let channel = sink.channel();
/// sink.start()?;
/// channel.enqueue(LogRecord::new(Level::INFO, "app", Some("hello".to_string())))?;
/// let report = sink.stop()?;
/// assert_eq!(report.records_written, 1);
/// # Ok::<(), logpool::Error>(())
/// ```
pub struct Sink {
  config: SinkConfig,
  handle: ChannelHandle,
  consumer: Option<ChannelConsumer>,
  state: SinkState,
  consumer_thread: Option<JoinHandle<Result<SinkReport>>>,
}

impl Sink {
  /// Creates the sink and its channel. Nothing is opened until `start`.
  pub fn new(config: SinkConfig) -> Self {
    let (handle, consumer) = log_channel();
    Self {
      config,
      handle,
      consumer: Some(consumer),
      state: SinkState::NotStarted,
      consumer_thread: None,
    }
  }

  /// The producer handle bound to this sink.
  pub fn channel(&self) -> ChannelHandle {
    self.handle.clone()
  }

  pub fn state(&self) -> SinkState {
    self.state
  }

  pub fn config(&self) -> &SinkConfig {
    &self.config
  }

  /// Spawns the consumer thread and waits until the destination is open.
  ///
  /// An unopenable destination is reported here as `Error::SinkSetup` and
  /// leaves the sink `Stopped`.
  pub fn start(&mut self) -> Result<()> {
    if self.state != SinkState::NotStarted {
      return Err(Error::SinkAlreadyStarted);
    }
    let consumer = self.consumer.take().ok_or(Error::SinkAlreadyStarted)?;

    let (ready_tx, ready_rx) = fibre::mpmc::bounded::<Result<()>>(1);
    let config = self.config.clone();

    let spawn_result = thread::Builder::new()
      .name(SINK_THREAD_NAME.to_string())
      .spawn(move || {
        let writer = match SinkWriter::open(&config) {
          Ok(writer) => {
            let _ = ready_tx.send(Ok(()));
            writer
          }
          Err(e) => {
            let _ = ready_tx.send(Err(e));
            return Ok(SinkReport::default());
          }
        };
        drop(ready_tx);
        let formatter = new_record_formatter(&config.encoder);
        run_consumer(consumer, writer, formatter.as_ref())
      });

    let consumer_thread = match spawn_result {
      Ok(handle) => handle,
      Err(e) => {
        self.state = SinkState::Stopped;
        return Err(Error::SinkSetup {
          path: self.config.destination_label(),
          reason: format!("Failed to spawn sink thread: {}", e),
        });
      }
    };

    match ready_rx.recv() {
      Ok(Ok(())) => {
        self.state = SinkState::Running;
        self.consumer_thread = Some(consumer_thread);
        tracing::debug!(
          target: "logpool",
          destination = %self.config.destination_label(),
          "Sink started"
        );
        Ok(())
      }
      Ok(Err(setup_error)) => {
        self.state = SinkState::Stopped;
        let _ = consumer_thread.join();
        Err(setup_error)
      }
      Err(_) => {
        // The thread died before reporting.
        self.state = SinkState::Stopped;
        let reason = match consumer_thread.join() {
          Err(payload) => panic_message(payload.as_ref()),
          Ok(_) => "sink thread exited before opening its destination".to_string(),
        };
        Err(Error::SinkPanicked(reason))
      }
    }
  }

  /// Sends the end-of-stream marker and joins the consumer thread.
  ///
  /// Records enqueued before this call are written and flushed before it
  /// returns. On a sink that is not running this is a no-op returning an
  /// empty report.
  pub fn stop(&mut self) -> Result<SinkReport> {
    if self.state != SinkState::Running {
      return Ok(SinkReport::default());
    }
    self.state = SinkState::Stopped;

    // Fails only if the consumer is already gone; joining reports why.
    let _ = self.handle.send_sentinel();

    let Some(consumer_thread) = self.consumer_thread.take() else {
      return Ok(SinkReport::default());
    };

    if let Some(timeout) = self.config.stop_timeout {
      let deadline = Instant::now() + timeout;
      while !consumer_thread.is_finished() {
        if Instant::now() >= deadline {
          tracing::warn!(
            target: "logpool",
            timeout = ?timeout,
            "Sink consumer did not finish in time, detaching it"
          );
          return Err(Error::StopTimeout(timeout));
        }
        thread::sleep(STOP_POLL_INTERVAL);
      }
    }

    match consumer_thread.join() {
      Ok(Ok(report)) => {
        tracing::debug!(
          target: "logpool",
          records = report.records_written,
          bytes = report.bytes_written,
          rollovers = report.rollovers,
          "Sink stopped"
        );
        Ok(report)
      }
      Ok(Err(e)) => Err(Error::SinkFailed(e.to_string())),
      Err(payload) => Err(Error::SinkPanicked(panic_message(payload.as_ref()))),
    }
  }
}

impl Drop for Sink {
  fn drop(&mut self) {
    if self.state == SinkState::Running {
      if let Err(e) = self.stop() {
        eprintln!("[logpool:ERROR] Failed to stop sink during drop: {}", e);
      }
    }
  }
}

/// What the consumer thread writes to.
enum SinkWriter {
  File(RotatingFileWriter),
  Console(BufWriter<Box<dyn Write + Send>>),
}

impl SinkWriter {
  fn open(config: &SinkConfig) -> Result<Self> {
    match config.destination {
      Destination::File => {
        RotatingFileWriter::open(&config.path, config.rotation, config.mode).map(SinkWriter::File)
      }
      Destination::Stdout => Ok(SinkWriter::console(Box::new(io::stdout()))),
      Destination::Stderr => Ok(SinkWriter::console(Box::new(io::stderr()))),
    }
  }

  fn console(stream: Box<dyn Write + Send>) -> Self {
    SinkWriter::Console(BufWriter::new(stream))
  }

  fn write_record(&mut self, bytes: &[u8]) -> io::Result<()> {
    match self {
      SinkWriter::File(writer) => writer.write_record(bytes),
      SinkWriter::Console(writer) => writer.write_all(bytes),
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    match self {
      SinkWriter::File(writer) => writer.flush(),
      SinkWriter::Console(writer) => writer.flush(),
    }
  }

  fn rollovers(&self) -> u64 {
    match self {
      SinkWriter::File(writer) => writer.rollovers(),
      SinkWriter::Console(_) => 0,
    }
  }
}

/// The consumer loop. Returns when the sentinel arrives or on the first
/// format/write error.
fn run_consumer(
  mut consumer: ChannelConsumer,
  mut writer: SinkWriter,
  formatter: &dyn RecordFormatter,
) -> Result<SinkReport> {
  let mut report = SinkReport::default();

  loop {
    match consumer.dequeue() {
      ChannelItem::Sentinel => break,
      ChannelItem::Record(record) => {
        let bytes = formatter.format_record(&record)?;
        writer.write_record(&bytes)?;
        report.records_written += 1;
        report.bytes_written += bytes.len() as u64;

        if consumer.is_empty() {
          writer.flush()?;
        }
      }
    }
  }

  writer.flush()?;
  report.rollovers = writer.rollovers();
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::LogRecord;
  use pretty_assertions::assert_eq;
  use std::fs;
  use std::path::Path;
  use tempfile::tempdir;
  use tracing::Level;

  fn message_sink(path: &Path) -> Sink {
    Sink::new(SinkConfig::new(path).format("%(message)s"))
  }

  fn info(message: impl Into<String>) -> LogRecord {
    LogRecord::new(Level::INFO, "test", Some(message.into()))
  }

  #[test]
  fn stop_without_start_touches_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("never.log");
    let mut sink = message_sink(&path);

    assert_eq!(sink.stop().unwrap(), SinkReport::default());
    assert_eq!(sink.state(), SinkState::NotStarted);
    drop(sink);
    assert!(!path.exists());
  }

  #[test]
  fn single_producer_records_arrive_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ordered.log");
    let mut sink = message_sink(&path);
    let channel = sink.channel();
    sink.start().unwrap();
    assert_eq!(sink.state(), SinkState::Running);
    assert!(path.exists());

    for i in 0..500 {
      channel.enqueue(info(i.to_string())).unwrap();
    }
    let report = sink.stop().unwrap();
    assert_eq!(sink.state(), SinkState::Stopped);
    assert_eq!(report.records_written, 500);

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<usize> = content.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(lines, (0..500).collect::<Vec<_>>());
    assert_eq!(report.bytes_written, content.len() as u64);
  }

  #[test]
  fn concurrent_producers_are_all_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("concurrent.log");
    let mut sink = Sink::new(SinkConfig::new(&path).format("%(name)s %(message)s"));
    sink.start().unwrap();

    let producers: Vec<_> = (0..4)
      .map(|p| {
        let channel = sink.channel();
        thread::spawn(move || {
          for i in 0..250 {
            let record = LogRecord::new(Level::DEBUG, format!("p{}", p), Some(i.to_string()));
            channel.enqueue(record).unwrap();
          }
        })
      })
      .collect();
    for producer in producers {
      producer.join().unwrap();
    }
    sink.stop().unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let mut next_expected = [0usize; 4];
    for line in content.lines() {
      let (name, number) = line.split_once(' ').unwrap();
      let p: usize = name[1..].parse().unwrap();
      assert_eq!(number.parse::<usize>().unwrap(), next_expected[p]);
      next_expected[p] += 1;
    }
    assert_eq!(next_expected, [250; 4]);
  }

  #[test]
  fn start_twice_is_a_usage_error() {
    let dir = tempdir().unwrap();
    let mut sink = message_sink(&dir.path().join("twice.log"));
    sink.start().unwrap();
    assert!(matches!(sink.start(), Err(Error::SinkAlreadyStarted)));
    sink.stop().unwrap();
    assert!(matches!(sink.start(), Err(Error::SinkAlreadyStarted)));
  }

  #[test]
  fn second_stop_returns_an_empty_report() {
    let dir = tempdir().unwrap();
    let mut sink = message_sink(&dir.path().join("stop.log"));
    let channel = sink.channel();
    sink.start().unwrap();
    channel.enqueue(info("only")).unwrap();
    assert_eq!(sink.stop().unwrap().records_written, 1);
    assert_eq!(sink.stop().unwrap(), SinkReport::default());
  }

  #[test]
  fn unopenable_destination_fails_start() {
    let dir = tempdir().unwrap();
    // A directory cannot be opened as the log file.
    let mut sink = message_sink(dir.path());
    let channel = sink.channel();

    let result = sink.start();
    assert!(matches!(result, Err(Error::SinkSetup { .. })));
    assert_eq!(sink.state(), SinkState::Stopped);
    assert!(matches!(channel.enqueue(info("lost")), Err(Error::ChannelClosed)));
    assert_eq!(sink.stop().unwrap(), SinkReport::default());
  }

  #[test]
  fn enqueue_after_stop_is_not_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("late.log");
    let mut sink = message_sink(&path);
    let channel = sink.channel();
    sink.start().unwrap();
    channel.enqueue(info("before")).unwrap();
    sink.stop().unwrap();

    assert!(matches!(channel.enqueue(info("after")), Err(Error::ChannelClosed)));
    assert_eq!(fs::read_to_string(&path).unwrap(), "before\n");
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn write_failure_surfaces_from_stop() {
    // Every write to /dev/full fails with ENOSPC.
    let mut sink = message_sink(Path::new("/dev/full"));
    let channel = sink.channel();
    sink.start().unwrap();
    for i in 0..10 {
      let _ = channel.enqueue(info(format!("doomed {}", i)));
    }
    let result = sink.stop();
    assert!(matches!(result, Err(Error::SinkFailed(_))), "got {:?}", result);
    assert_eq!(sink.state(), SinkState::Stopped);
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn stalled_consumer_is_detached_after_the_stop_timeout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stalled.fifo");
    let status = std::process::Command::new("mkfifo").arg(&path).status().unwrap();
    assert!(status.success());

    // Opened read-write so the sink's open does not block; nothing ever
    // reads, so writes stall once the pipe buffer is full.
    let holder = fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();

    let timeout = Duration::from_millis(200);
    let mut sink = Sink::new(
      SinkConfig::new(&path)
        .format("%(message)s")
        .stop_timeout(timeout),
    );
    let channel = sink.channel();
    sink.start().unwrap();
    let filler = "x".repeat(200);
    for _ in 0..2_000 {
      channel.enqueue(info(filler.clone())).unwrap();
    }

    let started = Instant::now();
    let result = sink.stop();
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::StopTimeout(t)) if t == timeout), "got {:?}", result);
    assert!(elapsed >= timeout);
    assert!(elapsed < Duration::from_secs(5), "stop took {:?}", elapsed);
    assert_eq!(sink.state(), SinkState::Stopped);
    assert_eq!(sink.stop().unwrap(), SinkReport::default());

    // Closing the last reader fails the blocked write, letting the detached
    // thread exit.
    drop(holder);
  }

  #[test]
  fn console_destination_counts_records() {
    let mut sink = Sink::new(SinkConfig::stderr().format("[console sink] %(message)s"));
    let channel = sink.channel();
    sink.start().unwrap();
    for i in 0..3 {
      channel.enqueue(info(format!("to stderr {}", i))).unwrap();
    }
    let report = sink.stop().unwrap();
    assert_eq!(report.records_written, 3);
    assert_eq!(report.rollovers, 0);
    assert_eq!(sink.state(), SinkState::Stopped);
  }

  #[test]
  fn rotation_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rolled.log");
    let mut sink = Sink::new(
      SinkConfig::new(&path)
        .format("%(message)s")
        .rotation(100, 2)
        .stop_timeout(Duration::from_secs(10)),
    );
    let channel = sink.channel();
    sink.start().unwrap();
    for i in 0..50 {
      channel.enqueue(info(format!("line-{:03}", i))).unwrap();
    }
    let report = sink.stop().unwrap();
    assert_eq!(report.records_written, 50);
    assert!(report.rollovers >= 2);
    assert!(dir.path().join("rolled.log.2").exists());
    assert!(!dir.path().join("rolled.log.3").exists());
  }

  #[test]
  fn dropping_a_running_sink_flushes_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dropped.log");
    {
      let mut sink = message_sink(&path);
      let channel = sink.channel();
      sink.start().unwrap();
      channel.enqueue(info("kept")).unwrap();
    }
    assert_eq!(fs::read_to_string(&path).unwrap(), "kept\n");
  }
}
