//! Line-delimited message transport.
//!
//! Inbound bytes are framed into newline-terminated lines, capped at
//! [`MAX_MESSAGE_SIZE`] bytes, and decoded into [`Message`] values.
//! Outbound messages are encoded one JSON object per line with no pretty
//! printing. The reader and writer wrap the two halves of a split stream
//! so the reader and sender tasks can own them independently; tests drive
//! them over in-memory duplex pipes instead of TCP.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::trace;

use super::error::{ClientError, ClientResult};
use super::messages::{Message, MAX_MESSAGE_SIZE};

/// Reads framed messages from the inbound half of a connection.
pub struct MessageReader<R> {
    frames: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            frames: FramedRead::new(inner, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)),
        }
    }

    /// Read and classify one message.
    ///
    /// Returns `Ok(None)` on clean connection close. Blank lines are
    /// skipped; oversize lines and undecodable input are errors.
    pub async fn read_message(&mut self) -> ClientResult<Option<Message>> {
        loop {
            let line = match self.frames.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            trace!(rx = %line, "received message");

            let msg = serde_json::from_str(line)
                .map_err(|e| ClientError::InvalidMessage(format!("{e}: {line}")))?;
            return Ok(Some(msg));
        }
    }
}

/// Writes framed messages to the outbound half of a connection.
pub struct MessageWriter<W> {
    frames: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            frames: FramedWrite::new(inner, LinesCodec::new()),
        }
    }

    /// Encode and write one message, flushing it to the socket.
    pub async fn write_message(&mut self, msg: &Message) -> ClientResult<()> {
        let json = serde_json::to_string(msg)?;
        trace!(tx = %json, "sending message");
        self.frames.send(json).await?;
        Ok(())
    }
}
