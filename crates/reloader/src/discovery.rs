//! Host discovery.
//!
//! The target program has no idea which address/port the host bound, so it
//! walks the Cartesian product of candidates with a bounded per-attempt
//! timeout, validating the server token before trusting any endpoint. The
//! whole sweep is bounded; exhausting it is not an error, hot reload is
//! simply unavailable for this run.

use std::time::Instant;

use protocol::{Envelope, FramedMessages, SERVER_TOKEN, framed, read_message_timeout};
use rekindle_core::DiscoveryConfig;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ReloaderError;

/// An established, token-validated connection.
pub(crate) struct Discovered {
  pub(crate) framed: FramedMessages<TcpStream>,
  pub(crate) session_id: Uuid,
  pub(crate) protocol_version: String,
}

/// Scan candidate endpoints until one presents a valid greeting.
///
/// Returns `None` when every combination was rejected or the overall
/// timeout elapsed - the caller logs and carries on without hot reload.
pub(crate) async fn discover(config: &DiscoveryConfig, cancel: &CancellationToken) -> Option<Discovered> {
  let deadline = Instant::now() + config.discovery_timeout();

  for address in &config.addresses {
    for port in &config.ports {
      if cancel.is_cancelled() || Instant::now() >= deadline {
        debug!("discovery budget exhausted");
        return None;
      }

      match try_endpoint(address, *port, config).await {
        Ok(discovered) => {
          info!(
            address = %address,
            port,
            version = %discovered.protocol_version,
            session = %discovered.session_id,
            "hot reload host found"
          );
          return Some(discovered);
        }
        Err(e) => {
          debug!(address = %address, port, error = %e, "endpoint rejected");
        }
      }
    }
  }

  debug!("no hot reload host on any candidate endpoint");
  None
}

async fn try_endpoint(address: &str, port: u16, config: &DiscoveryConfig) -> Result<Discovered, ReloaderError> {
  let connect = TcpStream::connect((address, port));
  let stream = tokio::time::timeout(config.connect_timeout(), connect)
    .await
    .map_err(|_| ReloaderError::Connect(format!("{address}:{port} timed out")))?
    .map_err(|e| ReloaderError::Connect(e.to_string()))?;

  let mut framed = framed(stream);
  let hello = read_message_timeout(&mut framed, config.handshake_timeout()).await?;

  match hello {
    Envelope::ServerHello {
      token,
      version,
      session_id,
    } => {
      if token != SERVER_TOKEN {
        return Err(ReloaderError::InvalidToken);
      }
      Ok(Discovered {
        framed,
        session_id,
        protocol_version: version,
      })
    }
    _ => Err(ReloaderError::InvalidToken),
  }
}
