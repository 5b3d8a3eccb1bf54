//! Pending-change aggregation for one session.
//!
//! External change notifications arrive in bursts from whatever feeds the
//! host (file watcher, editor glue). The queue coalesces them into a
//! deduplicated pending set and exposes a saturating wake signal the session
//! loop blocks on, so bursts collapse into a single build cycle instead of a
//! spin of empty ones.

use rekindle_core::UnitId;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Deduplicated pending set plus a one-slot wake trigger.
///
/// `Notify` stores at most one permit, which is exactly the required trig
/// semantics: releasing while a wake is already outstanding is a no-op.
#[derive(Debug, Default)]
pub struct ChangeQueue {
  pending: Mutex<HashSet<UnitId>>,
  wake: Notify,
}

impl ChangeQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a changed unit to the pending set. Idempotent; returns whether the
  /// unit was newly inserted.
  pub fn add(&self, unit: UnitId) -> bool {
    self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(unit)
  }

  /// Arm the wake signal. Saturates at one outstanding wake.
  pub fn trigger(&self) {
    self.wake.notify_one();
  }

  /// Block until the queue is triggered or the session is cancelled.
  ///
  /// Returns `false` on cancellation so the caller can unwind without
  /// consuming a wake that was never armed.
  pub async fn wait(&self, cancel: &CancellationToken) -> bool {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => false,
      _ = self.wake.notified() => true,
    }
  }

  /// Atomically snapshot and clear the pending set.
  ///
  /// The snapshot is sorted so build requests are deterministic. Changes
  /// that arrive after this call accumulate into the next cycle.
  pub fn take(&self) -> Vec<UnitId> {
    let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    let mut snapshot: Vec<UnitId> = guard.drain().collect();
    snapshot.sort();
    snapshot
  }

  /// Union a failed build's snapshot back into the pending set, preserving
  /// anything that arrived while the build was running.
  pub fn restore(&self, units: impl IntoIterator<Item = UnitId>) {
    self.pending.lock().unwrap_or_else(|e| e.into_inner()).extend(units);
  }

  pub fn len(&self) -> usize {
    self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
