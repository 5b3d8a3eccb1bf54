//! One connected client's session.
//!
//! Lifecycle: `Connecting -> Handshaking -> Idle -> BuildRequested ->
//! Building -> DeltaSent -> Idle ... | Terminated`. The session task is the
//! only consumer of its change queue; waiting on the queue's wake signal in
//! `Idle` is the loop's single blocking point besides socket IO.
//!
//! Failure policy: socket errors, handshake rejection and cancellation
//! terminate the session (and only it). A backend failure is recoverable -
//! the consumed change snapshot is restored so the same units are retried
//! on the next trigger.

use std::fmt;
use std::sync::Arc;

use protocol::{Envelope, FramedMessages, ProtocolError, framed, read_message, read_message_timeout, send_message};
use rekindle_core::{TargetDescriptor, UnitId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::build::BuildBackend;
use crate::changes::ChangeQueue;
use crate::error::ServerError;
use crate::server::{HostServer, SessionHandle};

/// Where a session is in its lifecycle. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Connecting,
  Handshaking,
  Idle,
  BuildRequested,
  Building,
  DeltaSent,
  Terminated,
}

impl fmt::Display for SessionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SessionState::Connecting => "connecting",
      SessionState::Handshaking => "handshaking",
      SessionState::Idle => "idle",
      SessionState::BuildRequested => "build-requested",
      SessionState::Building => "building",
      SessionState::DeltaSent => "delta-sent",
      SessionState::Terminated => "terminated",
    };
    f.write_str(name)
  }
}

/// What one wake of the session loop amounted to.
enum CycleOutcome {
  /// Delta compiled and transmitted; the consumed snapshot is discarded
  Sent,
  /// Nothing pending and nothing requested; no build dispatched
  NoOp,
  /// Backend reported a failure; snapshot restored, session stays alive
  BuildFailed,
}

pub(crate) struct Session<T> {
  id: Uuid,
  server: Arc<HostServer>,
  framed: FramedMessages<T>,
  queue: Arc<ChangeQueue>,
  cancel: CancellationToken,
  state: SessionState,
  bound: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
  pub(crate) fn new(server: Arc<HostServer>, io: T, cancel: CancellationToken) -> Self {
    Self {
      id: Uuid::new_v4(),
      server,
      framed: framed(io),
      queue: Arc::new(ChangeQueue::new()),
      cancel,
      state: SessionState::Connecting,
      bound: false,
    }
  }

  /// Drive the session to completion. Never panics across the session
  /// boundary; every exit path releases the registry entry and waiters.
  pub(crate) async fn run(mut self) {
    let result = self.drive().await;

    if self.bound {
      self.server.unbind_session(self.id);
    }
    // Release anything parked on this session's token
    self.cancel.cancel();
    self.set_state(SessionState::Terminated);

    match result {
      Ok(()) => debug!(session = %self.id, "session closed"),
      Err(e) => info!(session = %self.id, error = %e, "session terminated"),
    }
  }

  async fn drive(&mut self) -> Result<(), ServerError> {
    self.set_state(SessionState::Handshaking);
    send_message(&mut self.framed, &Envelope::server_hello(self.id)).await?;

    let reply = read_message_timeout(&mut self.framed, self.server.handshake_timeout()).await?;
    let target = match reply {
      Envelope::ClientHello { target, platform } => TargetDescriptor {
        name: target,
        platform,
      },
      other => return Err(ServerError::Handshake(format!("expected client_hello, got {}", other.name()))),
    };

    let backend = self
      .server
      .backend_for(&target.name)
      .ok_or_else(|| ServerError::UnknownTarget(target.name.clone()))?;

    info!(session = %self.id, target = %target, "hot reload session started");

    // Change aggregation begins here: only a session that identified its
    // target receives notifications.
    self.server.bind_session(
      self.id,
      SessionHandle {
        target: target.name.clone(),
        queue: Arc::clone(&self.queue),
        cancel: self.cancel.clone(),
      },
    );
    self.bound = true;

    loop {
      self.set_state(SessionState::Idle);
      if !self.queue.wait(&self.cancel).await {
        return Ok(());
      }

      self.set_state(SessionState::BuildRequested);
      send_message(&mut self.framed, &Envelope::BuildRequest {}).await?;

      // The client may know about live needs beyond the changed files
      // (units it failed to resolve from the previous delta), so the
      // request blocks on its reply.
      let requested = match self.read_cancellable().await? {
        None => return Ok(()),
        Some(Envelope::AdditionalUnits { units }) => units,
        Some(other) => return Err(ServerError::UnexpectedMessage(other.name())),
      };

      self.set_state(SessionState::Building);
      if let CycleOutcome::Sent = self.build_cycle(&target, backend.as_ref(), requested).await? {
        self.set_state(SessionState::DeltaSent);
      }
    }
  }

  /// Snapshot the pending set and run one build.
  ///
  /// The snapshot is cleared atomically at capture; changes arriving while
  /// the backend runs accumulate into the next cycle. Every failure path
  /// after capture restores the snapshot - a build must not drop changes.
  async fn build_cycle(
    &mut self,
    target: &TargetDescriptor,
    backend: &dyn BuildBackend,
    requested: Vec<UnitId>,
  ) -> Result<CycleOutcome, ServerError> {
    let changed = self.queue.take();
    if changed.is_empty() && requested.is_empty() {
      debug!(session = %self.id, "woke with nothing to build");
      return Ok(CycleOutcome::NoOp);
    }

    debug!(
      session = %self.id,
      changed = changed.len(),
      requested = requested.len(),
      "dispatching build"
    );

    let built = match backend.build(target, &changed, &requested).await {
      Ok(built) => built,
      Err(e) => {
        warn!(session = %self.id, error = %e, "build failed, changes kept for retry");
        self.queue.restore(changed);
        return Ok(CycleOutcome::BuildFailed);
      }
    };

    let version = self.server.versions().next(&target.name);
    let delta = Envelope::Delta {
      version,
      changed_units: built.changed_units,
      all_units: built.all_units,
      module: built.module,
      debug_info: built.debug_info,
    };

    if let Err(e) = send_message(&mut self.framed, &delta).await {
      self.queue.restore(changed);
      return Err(e.into());
    }

    info!(session = %self.id, version, "delta sent");
    Ok(CycleOutcome::Sent)
  }

  async fn read_cancellable(&mut self) -> Result<Option<Envelope>, ProtocolError> {
    let cancel = self.cancel.clone();
    tokio::select! {
      biased;

      _ = cancel.cancelled() => Ok(None),
      result = read_message(&mut self.framed) => result.map(Some),
    }
  }

  fn set_state(&mut self, next: SessionState) {
    trace!(session = %self.id, from = %self.state, to = %next, "session state");
    self.state = next;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::{BuildError, BuiltDelta};
  use rekindle_core::DiscoveryConfig;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::io::DuplexStream;

  /// Backend double: records calls, tracks concurrency, optionally fails
  /// the first N builds, optionally stalls to widen race windows.
  #[derive(Default)]
  struct MockBackend {
    fail_remaining: AtomicUsize,
    delay_ms: u64,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    calls: std::sync::Mutex<Vec<(Vec<UnitId>, Vec<UnitId>)>>,
  }

  #[async_trait::async_trait]
  impl BuildBackend for MockBackend {
    async fn build(
      &self,
      _target: &TargetDescriptor,
      changed: &[UnitId],
      requested: &[UnitId],
    ) -> Result<BuiltDelta, BuildError> {
      let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_concurrent.fetch_max(now, Ordering::SeqCst);

      if self.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
      }

      self
        .calls
        .lock()
        .unwrap()
        .push((changed.to_vec(), requested.to_vec()));
      self.concurrent.fetch_sub(1, Ordering::SeqCst);

      if self
        .fail_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
      {
        return Err(BuildError::Compile("expected ';'".to_string()));
      }

      let mut all = changed.to_vec();
      all.extend(requested.iter().cloned());
      Ok(BuiltDelta {
        changed_units: changed.to_vec(),
        all_units: all,
        module: vec![0xCA, 0xFE],
        debug_info: Vec::new(),
      })
    }
  }

  struct Harness {
    server: Arc<HostServer>,
    backend: Arc<MockBackend>,
    cancel: CancellationToken,
  }

  impl Harness {
    fn new(backend: MockBackend) -> Self {
      let server = Arc::new(HostServer::new(DiscoveryConfig::default()));
      let backend = Arc::new(backend);
      server.register_target("app", Arc::clone(&backend) as Arc<dyn BuildBackend>);
      Self {
        server,
        backend,
        cancel: CancellationToken::new(),
      }
    }

    /// Spawn a session over an in-memory stream, returning the client end.
    fn connect(&self) -> FramedMessages<DuplexStream> {
      let (client_io, server_io) = tokio::io::duplex(protocol::MAX_FRAME_BYTES.min(1 << 20));
      let session = Session::new(Arc::clone(&self.server), server_io, self.cancel.child_token());
      tokio::spawn(session.run());
      framed(client_io)
    }

    /// Complete the handshake as a well-behaved client and wait until the
    /// session is registered for change routing.
    async fn handshake(&self, client: &mut FramedMessages<DuplexStream>) {
      let hello = read_message(client).await.unwrap();
      assert!(hello.is_valid_hello());

      send_message(
        client,
        &Envelope::ClientHello {
          target: "app".to_string(),
          platform: None,
        },
      )
      .await
      .unwrap();

      for _ in 0..100 {
        if self.server.session_count() > 0 {
          return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
      panic!("session never bound");
    }
  }

  async fn expect_build_request(client: &mut FramedMessages<DuplexStream>) {
    assert_eq!(read_message(client).await.unwrap(), Envelope::BuildRequest {});
  }

  async fn reply_units(client: &mut FramedMessages<DuplexStream>, units: Vec<UnitId>) {
    send_message(client, &Envelope::AdditionalUnits { units }).await.unwrap();
  }

  async fn expect_delta(client: &mut FramedMessages<DuplexStream>) -> (u64, Vec<UnitId>, Vec<UnitId>) {
    match read_message(client).await.unwrap() {
      Envelope::Delta {
        version,
        changed_units,
        all_units,
        ..
      } => (version, changed_units, all_units),
      other => panic!("expected delta, got {}", other.name()),
    }
  }

  #[tokio::test]
  async fn test_full_reload_cycle() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    harness.server.notify_changed("app", UnitId::from("src/view.rs"));
    harness.server.trigger("app");

    expect_build_request(&mut client).await;
    reply_units(&mut client, vec![UnitId::from("app::Model")]).await;

    let (version, changed, all) = expect_delta(&mut client).await;
    assert_eq!(version, 1);
    assert_eq!(changed, vec![UnitId::from("src/view.rs")]);
    assert_eq!(all, vec![UnitId::from("src/view.rs"), UnitId::from("app::Model")]);

    let calls = harness.backend.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, vec![UnitId::from("app::Model")]);
  }

  #[tokio::test]
  async fn test_build_failure_preserves_pending_changes() {
    let backend = MockBackend {
      fail_remaining: AtomicUsize::new(1),
      ..Default::default()
    };
    let harness = Harness::new(backend);
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    harness.server.notify_changed("app", UnitId::from("src/view.rs"));
    harness.server.trigger("app");

    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;

    // The failed cycle sends nothing; the next trigger retries the same
    // change set without any new notification.
    harness.server.trigger("app");
    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;

    let (version, changed, _) = expect_delta(&mut client).await;
    assert_eq!(version, 1, "failed builds must not burn versions");
    assert_eq!(changed, vec![UnitId::from("src/view.rs")]);

    let calls = harness.backend.calls.lock().unwrap();
    assert_eq!(calls[0].0, calls[1].0, "retry must see the identical change set");
  }

  #[tokio::test]
  async fn test_no_second_build_in_flight() {
    let backend = MockBackend {
      delay_ms: 100,
      ..Default::default()
    };
    let harness = Harness::new(backend);
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    harness.server.notify_changed("app", UnitId::from("src/a.rs"));
    harness.server.trigger("app");

    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;

    // Land a change while the first build is still running
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness.server.notify_changed("app", UnitId::from("src/b.rs"));
    harness.server.trigger("app");

    let (_, changed_first, _) = expect_delta(&mut client).await;
    assert_eq!(changed_first, vec![UnitId::from("src/a.rs")]);

    // The queued change starts its own later cycle
    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;
    let (_, changed_second, _) = expect_delta(&mut client).await;
    assert_eq!(changed_second, vec![UnitId::from("src/b.rs")]);

    assert_eq!(harness.backend.max_concurrent.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_noop_wake_skips_build_and_version() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    // Trigger without any pending change; client requests nothing either
    harness.server.trigger("app");
    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;

    // A real change afterwards still gets version 1
    harness.server.notify_changed("app", UnitId::from("src/view.rs"));
    harness.server.trigger("app");
    expect_build_request(&mut client).await;
    reply_units(&mut client, Vec::new()).await;

    let (version, _, _) = expect_delta(&mut client).await;
    assert_eq!(version, 1);
    assert_eq!(harness.backend.calls.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_requested_units_alone_dispatch_a_build() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    harness.server.trigger("app");
    expect_build_request(&mut client).await;
    reply_units(&mut client, vec![UnitId::from("app::Missing")]).await;

    let (version, changed, all) = expect_delta(&mut client).await;
    assert_eq!(version, 1);
    assert!(changed.is_empty());
    assert_eq!(all, vec![UnitId::from("app::Missing")]);
  }

  #[tokio::test]
  async fn test_versions_survive_reconnect() {
    let harness = Harness::new(MockBackend::default());

    for expected_version in 1..=2u64 {
      let mut client = harness.connect();
      harness.handshake(&mut client).await;

      harness.server.notify_changed("app", UnitId::from("src/view.rs"));
      harness.server.trigger("app");
      expect_build_request(&mut client).await;
      reply_units(&mut client, Vec::new()).await;

      let (version, _, _) = expect_delta(&mut client).await;
      assert_eq!(version, expected_version);

      drop(client);
      for _ in 0..100 {
        if harness.server.session_count() == 0 {
          break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    }
  }

  #[tokio::test]
  async fn test_wrong_identity_terminates_session() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();

    let _ = read_message(&mut client).await.unwrap();
    send_message(&mut client, &Envelope::AdditionalUnits { units: Vec::new() })
      .await
      .unwrap();

    let err = read_message(&mut client).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
    assert_eq!(harness.server.session_count(), 0);
  }

  #[tokio::test]
  async fn test_unknown_target_terminates_session() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();

    let _ = read_message(&mut client).await.unwrap();
    send_message(
      &mut client,
      &Envelope::ClientHello {
        target: "ghost".to_string(),
        platform: None,
      },
    )
    .await
    .unwrap();

    let err = read_message(&mut client).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
    assert_eq!(harness.server.session_count(), 0);
  }

  #[tokio::test]
  async fn test_cancellation_releases_idle_session() {
    let harness = Harness::new(MockBackend::default());
    let mut client = harness.connect();
    harness.handshake(&mut client).await;

    harness.cancel.cancel();

    let err = read_message(&mut client).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
  }
}
