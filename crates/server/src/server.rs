//! The host-side coordinator.
//!
//! One `HostServer` owns everything that must outlive individual
//! connections: the registered build targets, the per-target version
//! counters, and the registry of live sessions. Nothing here is global -
//! tests construct as many isolated coordinators as they like.
//!
//! # Threading Model
//!
//! - The accept loop runs on the caller's task
//! - Each accepted connection runs its session in its own spawned task
//! - Change notifications route through the session registry from any task

use std::sync::Arc;

use dashmap::DashMap;
use rekindle_core::{DiscoveryConfig, UnitId};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::build::BuildBackend;
use crate::changes::ChangeQueue;
use crate::error::ServerError;
use crate::session::Session;
use crate::versions::VersionRegistry;

/// A live session's entry in the coordinator registry.
///
/// Held from `ClientHello` until the session task exits; change
/// notifications route through it to the session's pending set.
pub(crate) struct SessionHandle {
  pub(crate) target: String,
  pub(crate) queue: Arc<ChangeQueue>,
  pub(crate) cancel: CancellationToken,
}

/// Hot-reload coordinator for one host process.
pub struct HostServer {
  discovery: DiscoveryConfig,
  backends: DashMap<String, Arc<dyn BuildBackend>>,
  sessions: DashMap<Uuid, SessionHandle>,
  versions: VersionRegistry,
  session_count: watch::Sender<usize>,
}

impl HostServer {
  pub fn new(discovery: DiscoveryConfig) -> Self {
    let (session_count, _) = watch::channel(0);
    Self {
      discovery,
      backends: DashMap::new(),
      sessions: DashMap::new(),
      versions: VersionRegistry::new(),
      session_count,
    }
  }

  /// Register the build backend serving a target name. Clients announcing
  /// this target in their hello bind to it; replaces any previous backend.
  pub fn register_target(&self, name: impl Into<String>, backend: Arc<dyn BuildBackend>) {
    let name = name.into();
    debug!(target = %name, "build target registered");
    self.backends.insert(name, backend);
  }

  /// Remove a target and terminate any session bound to it.
  pub fn unregister_target(&self, name: &str) {
    if self.backends.remove(name).is_some() {
      debug!(target = %name, "build target unregistered");
    }
    for entry in self.sessions.iter() {
      if entry.value().target == name {
        entry.value().cancel.cancel();
      }
    }
  }

  /// Record a changed unit for every live session bound to `target`.
  /// Idempotent per session; sessions still handshaking are not affected.
  pub fn notify_changed(&self, target: &str, unit: UnitId) {
    for entry in self.sessions.iter() {
      if entry.value().target == target {
        entry.value().queue.add(unit.clone());
      }
    }
  }

  /// Arm the wake signal of every session bound to `target` (saturating).
  pub fn trigger(&self, target: &str) {
    for entry in self.sessions.iter() {
      if entry.value().target == target {
        entry.value().queue.trigger();
      }
    }
  }

  /// Number of sessions that completed the handshake and are live.
  pub fn session_count(&self) -> usize {
    self.sessions.len()
  }

  /// Watch the live-session count; the host can surface "hot reload
  /// started/stopped" from the 0 <-> 1 edges.
  pub fn subscribe_sessions(&self) -> watch::Receiver<usize> {
    self.session_count.subscribe()
  }

  /// Bind the first free candidate port, in priority order.
  ///
  /// Exhausting the list is an error the embedding host should log and
  /// absorb - hot reload is unavailable, nothing more.
  pub async fn bind(&self) -> Result<TcpListener, ServerError> {
    for port in &self.discovery.ports {
      match TcpListener::bind((self.discovery.bind_address.as_str(), *port)).await {
        Ok(listener) => {
          let port = listener.local_addr()?.port();
          info!(address = %self.discovery.bind_address, port, "hot reload server listening");
          return Ok(listener);
        }
        Err(e) => {
          debug!(port, error = %e, "candidate port unavailable");
        }
      }
    }
    warn!("no candidate port could be bound, hot reload unavailable");
    Err(ServerError::NoAvailablePort)
  }

  /// Bind and serve until cancelled.
  pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), ServerError> {
    let listener = self.bind().await?;
    self.serve(listener, cancel).await
  }

  /// Accept connections on an already-bound listener until cancelled.
  pub async fn serve(self: &Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("hot reload server shutting down (cancelled)");
          break;
        }

        result = listener.accept() => {
          match result {
            Ok((stream, peer)) => {
              debug!(%peer, "client connected");
              let session = Session::new(Arc::clone(self), stream, cancel.child_token());
              tokio::spawn(session.run());
            }
            Err(e) => {
              error!("accept error: {}", e);
            }
          }
        }
      }
    }

    // Terminate remaining sessions and release their waiters
    for entry in self.sessions.iter() {
      entry.value().cancel.cancel();
    }

    Ok(())
  }

  pub(crate) fn handshake_timeout(&self) -> std::time::Duration {
    self.discovery.handshake_timeout()
  }

  pub(crate) fn backend_for(&self, target: &str) -> Option<Arc<dyn BuildBackend>> {
    self.backends.get(target).map(|entry| Arc::clone(entry.value()))
  }

  pub(crate) fn versions(&self) -> &VersionRegistry {
    &self.versions
  }

  pub(crate) fn bind_session(&self, id: Uuid, handle: SessionHandle) {
    self.sessions.insert(id, handle);
    let _ = self.session_count.send(self.sessions.len());
  }

  pub(crate) fn unbind_session(&self, id: Uuid) {
    self.sessions.remove(&id);
    let _ = self.session_count.send(self.sessions.len());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rekindle_core::TargetDescriptor;
  use crate::build::{BuildError, BuiltDelta};

  struct NoopBackend;

  #[async_trait::async_trait]
  impl BuildBackend for NoopBackend {
    async fn build(
      &self,
      _target: &TargetDescriptor,
      changed: &[UnitId],
      _requested: &[UnitId],
    ) -> Result<BuiltDelta, BuildError> {
      Ok(BuiltDelta {
        changed_units: changed.to_vec(),
        all_units: changed.to_vec(),
        module: Vec::new(),
        debug_info: Vec::new(),
      })
    }
  }

  fn test_server(ports: Vec<u16>) -> Arc<HostServer> {
    let discovery = DiscoveryConfig {
      ports,
      ..Default::default()
    };
    Arc::new(HostServer::new(discovery))
  }

  #[tokio::test]
  async fn test_bind_takes_first_free_port() {
    // Occupy one candidate so bind must fall through to the next
    let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let server = test_server(vec![taken, 0]);
    let listener = server.bind().await.unwrap();
    assert_ne!(listener.local_addr().unwrap().port(), taken);
  }

  #[tokio::test]
  async fn test_bind_exhaustion_is_an_error() {
    let occupied = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let server = test_server(vec![taken]);
    assert!(matches!(server.bind().await, Err(ServerError::NoAvailablePort)));
  }

  #[tokio::test]
  async fn test_notifications_route_by_target() {
    let server = test_server(vec![0]);
    server.register_target("app", Arc::new(NoopBackend));

    let app_queue = Arc::new(ChangeQueue::new());
    let tool_queue = Arc::new(ChangeQueue::new());
    server.bind_session(
      Uuid::new_v4(),
      SessionHandle {
        target: "app".to_string(),
        queue: Arc::clone(&app_queue),
        cancel: CancellationToken::new(),
      },
    );
    server.bind_session(
      Uuid::new_v4(),
      SessionHandle {
        target: "tool".to_string(),
        queue: Arc::clone(&tool_queue),
        cancel: CancellationToken::new(),
      },
    );

    server.notify_changed("app", UnitId::from("src/view.rs"));
    assert_eq!(app_queue.len(), 1);
    assert!(tool_queue.is_empty());
  }

  #[tokio::test]
  async fn test_session_count_watch() {
    let server = test_server(vec![0]);
    let mut rx = server.subscribe_sessions();
    assert_eq!(*rx.borrow(), 0);

    let id = Uuid::new_v4();
    server.bind_session(
      id,
      SessionHandle {
        target: "app".to_string(),
        queue: Arc::new(ChangeQueue::new()),
        cancel: CancellationToken::new(),
      },
    );
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), 1);

    server.unbind_session(id);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), 0);
  }
}
