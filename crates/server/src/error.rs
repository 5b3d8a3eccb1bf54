use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("no candidate port could be bound")]
  NoAvailablePort,
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("protocol error: {0}")]
  Protocol(#[from] ProtocolError),
  #[error("handshake failed: {0}")]
  Handshake(String),
  #[error("no build target registered as '{0}'")]
  UnknownTarget(String),
  #[error("unexpected message from client: {0}")]
  UnexpectedMessage(&'static str),
}
