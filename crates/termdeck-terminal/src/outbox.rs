use log::{debug, warn};
use tokio::sync::mpsc;

use termdeck_protocol::OutboundMessage;

/// Sending half of the outbound message queue.
///
/// Sends never block; the transport drains the other end and owns
/// buffering while disconnected.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, msg: OutboundMessage) {
        let tag = msg.tag();
        if self.tx.send(msg).is_err() {
            warn!("Outbound queue closed, dropping {}", tag);
        } else {
            debug!("Queued {}", tag);
        }
    }
}
