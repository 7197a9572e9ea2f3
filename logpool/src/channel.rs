// The record conduit between producers and the sink.

use crate::error::{Error, Result};
use crate::model::{ChannelItem, LogRecord};
use fibre::mpsc::{self, UnboundedReceiver as Receiver, UnboundedSender as Sender};

/// Creates a new unbounded log channel.
pub(crate) fn log_channel() -> (ChannelHandle, ChannelConsumer) {
  let (tx, rx) = mpsc::unbounded::<ChannelItem>();
  (ChannelHandle { sender: tx }, ChannelConsumer { receiver: rx })
}

/// The producer end of a sink's log channel.
///
/// This is the only object the rest of the system needs in order to feed a
/// sink. Clones are cheap and can be moved to any thread; enqueueing never
/// blocks because the channel is unbounded.
#[derive(Clone)]
pub struct ChannelHandle {
  sender: Sender<ChannelItem>,
}

impl ChannelHandle {
  /// Pushes a record towards the sink.
  ///
  /// Fails with `Error::ChannelClosed` once the sink's consumer is gone. The
  /// record is dropped in that case.
  pub fn enqueue(&self, record: LogRecord) -> Result<()> {
    self
      .sender
      .send(ChannelItem::Record(record))
      .map_err(|_| Error::ChannelClosed)
  }

  /// Approximate number of items waiting to be consumed.
  pub fn pending(&self) -> usize {
    self.sender.len()
  }

  pub(crate) fn send_sentinel(&self) -> Result<()> {
    self
      .sender
      .send(ChannelItem::Sentinel)
      .map_err(|_| Error::ChannelClosed)
  }
}

impl std::fmt::Debug for ChannelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ChannelHandle")
      .field("pending", &self.pending())
      .finish()
  }
}

/// The consumer end, owned by the sink thread alone.
pub(crate) struct ChannelConsumer {
  receiver: Receiver<ChannelItem>,
}

impl ChannelConsumer {
  /// Blocks until an item arrives.
  ///
  /// When every producer handle has been dropped and nothing is left, the
  /// stream is over and a `Sentinel` is returned instead of blocking forever.
  pub(crate) fn dequeue(&mut self) -> ChannelItem {
    match self.receiver.recv() {
      Ok(item) => item,
      Err(_) => ChannelItem::Sentinel,
    }
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }
}
