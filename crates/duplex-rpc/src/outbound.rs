use duplex_protocol::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PeerError, Result};

/// Queue feeding the writer task. Cloned into everything that writes.
#[derive(Clone)]
pub(crate) struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
}

impl Outbound {
    pub(crate) fn channel(shutdown: CancellationToken) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, shutdown }, rx)
    }

    pub(crate) fn send(&self, message: Message) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PeerError::ConnectionClosed("connection shut down".to_string()));
        }
        self.tx
            .send(message)
            .map_err(|_| PeerError::ConnectionClosed("writer stopped".to_string()))
    }
}
