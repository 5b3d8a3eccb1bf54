use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReloaderError {
  #[error("protocol error: {0}")]
  Protocol(#[from] ProtocolError),
  #[error("connect failed: {0}")]
  Connect(String),
  #[error("server token rejected")]
  InvalidToken,
}

/// Failure reported by a [`crate::ModuleLoader`] implementation.
#[derive(Debug, Error)]
#[error("module load failed: {0}")]
pub struct LoadError(pub String);

impl LoadError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}
