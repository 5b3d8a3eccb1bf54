//! Newline-delimited JSON framing over any byte stream.
//!
//! One [`Envelope`] per line. The codec enforces a maximum frame length so a
//! corrupt or malicious peer cannot balloon memory; deltas carrying large
//! modules fit comfortably below it.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use crate::{Envelope, ProtocolError};

/// Upper bound on one frame. Module payloads are base64-inflated, so this
/// allows modules of roughly 48 MiB.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A message-framed byte stream.
pub type FramedMessages<T> = Framed<T, LinesCodec>;

/// Wrap a byte stream in the message framing used on both ends.
pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> FramedMessages<T> {
  Framed::new(io, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
}

/// Serialize and send one message.
pub async fn send_message<T>(framed: &mut FramedMessages<T>, message: &Envelope) -> Result<(), ProtocolError>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  let json = serde_json::to_string(message)?;
  framed.send(json).await?;
  Ok(())
}

/// Read the next message, skipping blank lines.
///
/// Returns [`ProtocolError::ConnectionClosed`] on a clean EOF.
pub async fn read_message<T>(framed: &mut FramedMessages<T>) -> Result<Envelope, ProtocolError>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  loop {
    match framed.next().await {
      Some(Ok(line)) => {
        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }
        return Ok(serde_json::from_str(trimmed)?);
      }
      Some(Err(e)) => return Err(e.into()),
      None => return Err(ProtocolError::ConnectionClosed),
    }
  }
}

/// Read the next message within `timeout`, for handshake reads.
pub async fn read_message_timeout<T>(
  framed: &mut FramedMessages<T>,
  timeout: std::time::Duration,
) -> Result<Envelope, ProtocolError>
where
  T: AsyncRead + AsyncWrite + Unpin,
{
  tokio::time::timeout(timeout, read_message(framed))
    .await
    .map_err(|_| ProtocolError::Timeout)?
}
