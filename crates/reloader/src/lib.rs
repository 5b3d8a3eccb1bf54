//! Client side of the hot-reload protocol, embedded in the target program.
//!
//! The embedding program constructs a [`Reloader`] with its target identity,
//! a [`ModuleLoader`] for its runtime's dynamic-loading facility and an
//! apply callback, then calls [`Reloader::start`]. Everything after that
//! happens on a background task: discovery, handshake, the reload run loop.
//! No failure in that task ever surfaces as an error to the embedding
//! program - when no host is reachable, hot reload silently stays off.

mod apply;
mod discovery;
mod error;

use std::sync::Arc;

use protocol::{Envelope, FramedMessages, ProtocolError, read_message, send_message};
use rekindle_core::{DiscoveryConfig, TargetDescriptor, UnitId};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use apply::{ApplyFn, ModuleLoader, ReloadedUnit};
pub use error::{LoadError, ReloaderError};

/// Callback producing the units the client wants compiled alongside the
/// next build (e.g. names it failed to resolve from the previous delta).
pub type AdditionalUnitsFn = Arc<dyn Fn() -> Vec<UnitId> + Send + Sync>;

enum SessionEnd {
  Cancelled,
  Disconnected,
}

/// Hot-reload client for one target program.
pub struct Reloader<L: ModuleLoader> {
  config: DiscoveryConfig,
  target: TargetDescriptor,
  loader: Arc<L>,
  apply: ApplyFn<L::Unit>,
  additional_units: Option<AdditionalUnitsFn>,
}

impl<L: ModuleLoader> Reloader<L> {
  pub fn new(config: DiscoveryConfig, target: TargetDescriptor, loader: Arc<L>, apply: ApplyFn<L::Unit>) -> Self {
    Self {
      config,
      target,
      loader,
      apply,
      additional_units: None,
    }
  }

  /// Install the additional-units callback invoked on every build request.
  pub fn with_additional_units(mut self, callback: AdditionalUnitsFn) -> Self {
    self.additional_units = Some(callback);
    self
  }

  /// Spawn the background connector task and return immediately.
  pub fn start(self) -> ReloaderHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(self.run(cancel.clone()));
    ReloaderHandle { cancel, task }
  }

  async fn run(self, cancel: CancellationToken) {
    // Give a co-started host a moment to bind before the first sweep
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = tokio::time::sleep(self.config.startup_delay()) => {}
    }

    loop {
      let Some(discovered) = discovery::discover(&self.config, &cancel).await else {
        debug!("hot reload unavailable for this run");
        return;
      };

      match self.session_loop(discovered.framed, &cancel).await {
        SessionEnd::Cancelled => return,
        SessionEnd::Disconnected => {
          // Transport failure: all session state is gone, scan again
          info!("hot reload session lost, restarting discovery");
        }
      }
    }
  }

  async fn session_loop(&self, mut framed: FramedMessages<TcpStream>, cancel: &CancellationToken) -> SessionEnd {
    let hello = Envelope::ClientHello {
      target: self.target.name.clone(),
      platform: self.target.platform.clone(),
    };
    if let Err(e) = send_message(&mut framed, &hello).await {
      warn!(error = %e, "failed to send identity");
      return SessionEnd::Disconnected;
    }

    info!(target = %self.target, "hot reload connected");

    loop {
      let message = tokio::select! {
        biased;

        _ = cancel.cancelled() => return SessionEnd::Cancelled,
        result = read_message(&mut framed) => result,
      };

      let message = match message {
        Ok(message) => message,
        Err(ProtocolError::ConnectionClosed) => {
          debug!("host closed the connection");
          return SessionEnd::Disconnected;
        }
        Err(e) => {
          warn!(error = %e, "transport error");
          return SessionEnd::Disconnected;
        }
      };

      match message {
        Envelope::BuildRequest {} => {
          let units = self.additional_units.as_ref().map(|f| f()).unwrap_or_default();
          debug!(requested = units.len(), "rebuild requested");
          if let Err(e) = send_message(&mut framed, &Envelope::AdditionalUnits { units }).await {
            warn!(error = %e, "failed to answer build request");
            return SessionEnd::Disconnected;
          }
        }
        Envelope::Delta {
          version,
          changed_units,
          all_units,
          module,
          debug_info,
        } => {
          apply::apply_delta(
            self.loader.as_ref(),
            &self.apply,
            version,
            changed_units,
            all_units,
            module,
            debug_info,
          )
          .await;
        }
        other => {
          warn!(message = other.name(), "ignoring unexpected message");
        }
      }
    }
  }
}

/// Handle to a running reloader's background task.
pub struct ReloaderHandle {
  cancel: CancellationToken,
  task: tokio::task::JoinHandle<()>,
}

impl ReloaderHandle {
  /// Ask the background task to stop; any blocked read unwinds cleanly.
  pub fn shutdown(&self) {
    self.cancel.cancel();
  }

  /// Whether the background task has exited (e.g. discovery gave up).
  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Wait for the background task to exit.
  pub async fn join(self) {
    let _ = self.task.await;
  }
}
