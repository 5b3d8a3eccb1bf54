//! The build backend seam.
//!
//! The actual incremental compiler lives outside this crate. The host hands
//! it a snapshot of changed source paths plus the units the client asked for
//! by name, and gets back a self-consistent compiled module with the
//! identifiers it contains.

use async_trait::async_trait;
use rekindle_core::{TargetDescriptor, UnitId};
use thiserror::Error;

/// One build's output, before version assignment.
#[derive(Debug, Clone)]
pub struct BuiltDelta {
  /// Units whose sources were directly edited
  pub changed_units: Vec<UnitId>,
  /// Every unit in the emitted module: changed, requested, and anything
  /// structurally coupled to them (e.g. sibling fragments of a changed type)
  pub all_units: Vec<UnitId>,
  /// Compiled module bytes
  pub module: Vec<u8>,
  /// Debug companion bytes (may be empty)
  pub debug_info: Vec<u8>,
}

/// Backend failure. Always recoverable at the session level: the pending
/// change set is restored and retried on the next trigger.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("compilation failed: {0}")]
  Compile(String),
  #[error("build command failed: {0}")]
  Command(String),
  #[error("build IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("malformed build manifest: {0}")]
  Manifest(String),
}

/// External incremental-build capability.
///
/// Implementations receive the changed source paths captured at dispatch
/// time and the additionally requested unit names from the client, and must
/// produce a module containing all of them plus whatever is structurally
/// required to keep it loadable.
#[async_trait]
pub trait BuildBackend: Send + Sync {
  async fn build(
    &self,
    target: &TargetDescriptor,
    changed: &[UnitId],
    requested: &[UnitId],
  ) -> Result<BuiltDelta, BuildError>;
}
