use serde::{Deserialize, Serialize};

/// Transport-level failures. Kept `Clone` (and stringly-typed for the io
/// variants) so errors can be fanned out to multiple waiters.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ProtocolError {
  #[error("IO error: {0}")]
  Io(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("Connection closed")]
  ConnectionClosed,
  #[error("Timed out waiting for peer")]
  Timeout,
  #[error("Handshake rejected: {0}")]
  Handshake(String),
}

impl From<std::io::Error> for ProtocolError {
  fn from(err: std::io::Error) -> Self {
    ProtocolError::Io(err.to_string())
  }
}

impl From<serde_json::Error> for ProtocolError {
  fn from(err: serde_json::Error) -> Self {
    ProtocolError::Serde(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for ProtocolError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    match err {
      tokio_util::codec::LinesCodecError::Io(e) => ProtocolError::Io(e.to_string()),
      other => ProtocolError::Codec(other.to_string()),
    }
  }
}
