//! In-process transport: two connected ends backed by unbounded channels.
//!
//! Messages written on one end are read, in order, on the other. Closing or
//! dropping one end's writer ends the other end's stream.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::codec::{MessageReader, MessageWriter};
use crate::error::{PeerError, Result};

pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Value>,
}

pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Value>>,
}

/// One end of an in-process connection.
pub struct MemoryTransport {
    pub reader: MemoryReader,
    pub writer: MemoryWriter,
}

impl MemoryTransport {
    pub fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

/// Create two connected ends.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    (
        MemoryTransport {
            reader: MemoryReader { rx: left_rx },
            writer: MemoryWriter { tx: Some(left_tx) },
        },
        MemoryTransport {
            reader: MemoryReader { rx: right_rx },
            writer: MemoryWriter { tx: Some(right_tx) },
        },
    )
}

#[async_trait]
impl MessageReader for MemoryReader {
    async fn read_message(&mut self) -> Result<Option<Value>> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl MessageWriter for MemoryWriter {
    async fn write_message(&mut self, message: &Value) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PeerError::ConnectionClosed("writer closed".to_string()))?;
        tx.send(message.clone())
            .map_err(|_| PeerError::ConnectionClosed("other end dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}
