//! Message codecs: the boundary between a byte stream and structured messages.
//!
//! A peer only needs something that yields one JSON value per message, in
//! order, and something that accepts one JSON value per message.
//! [`JsonLinesReader`]/[`JsonLinesWriter`] frame messages over any tokio byte
//! stream (sockets, pipes, stdio); [`crate::memory`] provides an in-process
//! pair.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::error::Result;

/// Longest accepted line for [`JsonLinesReader`], newline included.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[async_trait]
pub trait MessageReader: Send + 'static {
    /// Next message, or `None` once the stream has ended cleanly.
    async fn read_message(&mut self) -> Result<Option<Value>>;
}

#[async_trait]
pub trait MessageWriter: Send + 'static {
    async fn write_message(&mut self, message: &Value) -> Result<()>;

    /// Flush and release the underlying stream.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads one JSON value per line.
///
/// Blank lines are ignored. A line that is not valid JSON (including one that
/// is not valid UTF-8) is logged and skipped; the stream stays usable. Only a
/// line longer than the configured maximum is an error.
pub struct JsonLinesReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    max_message_bytes: usize,
}

impl<R> JsonLinesReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

#[async_trait]
impl<R> MessageReader for JsonLinesReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_message(&mut self) -> Result<Option<Value>> {
        loop {
            self.line.clear();
            let limit = self.max_message_bytes as u64 + 1;
            let bytes_read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.line)
                .await?;
            if bytes_read == 0 {
                return Ok(None);
            }

            if !self.line.ends_with(b"\n") && self.line.len() > self.max_message_bytes {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("message exceeds {} bytes", self.max_message_bytes),
                )
                .into());
            }

            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<Value>(&self.line) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!(error = %e, bytes = self.line.len(), "Skipping unparseable line");
                    continue;
                }
            }
        }
    }
}

/// Writes one JSON value per line and flushes after each.
pub struct JsonLinesWriter<W> {
    writer: W,
}

impl<W> JsonLinesWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> MessageWriter for JsonLinesWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_message(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Build a JSON-lines codec over the two halves of a stream.
pub fn json_lines<R, W>(reader: R, writer: W) -> (JsonLinesReader<R>, JsonLinesWriter<W>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    (JsonLinesReader::new(reader), JsonLinesWriter::new(writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerError;
    use serde_json::json;

    #[tokio::test]
    async fn test_reads_one_value_per_line() {
        let input: &[u8] = b"{\"id\":1,\"result\":5}\n\n{\"method\":\"ping\"}\n";
        let mut reader = JsonLinesReader::new(input);

        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"id": 1, "result": 5}))
        );
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "ping"}))
        );
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skips_invalid_json() {
        let input: &[u8] = b"{invalid json}\n{\"method\":\"ok\"}\n";
        let mut reader = JsonLinesReader::new(input);

        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "ok"}))
        );
    }

    #[tokio::test]
    async fn test_skips_invalid_utf8() {
        let input: &[u8] = b"\xff\xfe garbage\n{\"method\":\"ok\"}\n";
        let mut reader = JsonLinesReader::new(input);

        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "ok"}))
        );
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let input: &[u8] = b"{\"method\":\"tail\"}";
        let mut reader = JsonLinesReader::new(input);

        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "tail"}))
        );
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_line_is_an_error() {
        let input: &[u8] = b"{\"method\":\"this line is far too long\"}\n";
        let mut reader = JsonLinesReader::new(input).with_max_message_bytes(8);

        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, PeerError::Io(_)));
    }

    #[tokio::test]
    async fn test_writer_emits_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = JsonLinesWriter::new(client_write);
        writer.write_message(&json!({"method": "a"})).await.unwrap();
        writer.write_message(&json!({"method": "b"})).await.unwrap();
        writer.close().await.unwrap();

        let mut reader = JsonLinesReader::new(server_read);
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "a"}))
        );
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(json!({"method": "b"}))
        );
    }
}
