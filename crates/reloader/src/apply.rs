//! The delta apply path.
//!
//! A delta names more units than were edited: the module also carries
//! everything pulled in for resolvability. The apply callback gets each
//! resolved unit tagged with whether its source actually changed, so the
//! application can decide what to swap live versus merely keep loadable.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rekindle_core::UnitId;
use tracing::{info, warn};

use crate::error::LoadError;

/// The hosting runtime's dynamic-loading facility, injected by the
/// embedding program. `Module` is whatever the runtime hands back for a
/// loaded blob; `Unit` is a resolved handle the apply callback can act on.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
  type Module: Send + Sync;
  type Unit: Send + Sync;

  /// Load a compiled module (and its debug companion, possibly empty) into
  /// the runtime.
  async fn load(&self, module: &[u8], debug_info: &[u8]) -> Result<Self::Module, LoadError>;

  /// Look up one unit in a loaded module. `None` means the unit is absent,
  /// which the apply path treats as skippable, not fatal.
  fn resolve(&self, module: &Self::Module, unit: &UnitId) -> Option<Self::Unit>;
}

/// One resolved unit handed to the apply callback.
pub struct ReloadedUnit<U> {
  pub unit: UnitId,
  pub handle: U,
  /// Whether this unit's source was directly edited (as opposed to being
  /// included only for resolvability)
  pub changed: bool,
}

/// Callback invoked with every successfully resolved unit of a delta.
pub type ApplyFn<U> = Arc<dyn Fn(Vec<ReloadedUnit<U>>) + Send + Sync>;

/// Load a delta's module and invoke the apply callback.
///
/// Resolution failures for individual units are logged and skipped; a
/// module that fails to load drops the whole delta but leaves the session
/// running.
pub(crate) async fn apply_delta<L: ModuleLoader>(
  loader: &L,
  apply: &ApplyFn<L::Unit>,
  version: u64,
  changed_units: Vec<UnitId>,
  all_units: Vec<UnitId>,
  module: Vec<u8>,
  debug_info: Vec<u8>,
) {
  let handle = match loader.load(&module, &debug_info).await {
    Ok(handle) => handle,
    Err(e) => {
      warn!(version, error = %e, "could not load reloaded module, delta dropped");
      return;
    }
  };

  let changed: HashSet<&UnitId> = changed_units.iter().collect();
  let mut resolved = Vec::with_capacity(all_units.len());
  for unit in &all_units {
    match loader.resolve(&handle, unit) {
      Some(unit_handle) => resolved.push(ReloadedUnit {
        unit: unit.clone(),
        handle: unit_handle,
        changed: changed.contains(unit),
      }),
      None => warn!(version, unit = %unit, "unit missing from reloaded module, skipped"),
    }
  }

  info!(version, units = resolved.len(), "applying delta");
  apply(resolved);
}
