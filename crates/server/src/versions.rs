//! Per-target build version counters.
//!
//! Owned by the coordinator so versions survive session reconnects but stay
//! isolated between coordinator instances (each test constructs its own).

use std::collections::HashMap;
use std::sync::Mutex;

/// Strictly increasing, never-reused build versions keyed by target name.
#[derive(Debug, Default)]
pub struct VersionRegistry {
  counters: Mutex<HashMap<String, u64>>,
}

impl VersionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Allocate the next version for a target. The first build is version 1.
  pub fn next(&self, target: &str) -> u64 {
    let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
    let counter = counters.entry(target.to_string()).or_insert(0);
    *counter += 1;
    *counter
  }

  /// Last allocated version for a target, if any build ran.
  pub fn current(&self, target: &str) -> Option<u64> {
    let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
    counters.get(target).copied()
  }
}
