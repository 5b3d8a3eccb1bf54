//! Shared identifier types used on both sides of the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a reloadable unit.
///
/// On the host side this is a changed source path; in a delta it is the
/// fully-qualified name of a compiled unit the client can resolve through
/// its module loader. The protocol does not care which - both are opaque
/// strings that must compare equal when they refer to the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for UnitId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for UnitId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

/// Identity of a build target, exchanged during the handshake.
///
/// `name` keys the host-side registry (which backend builds this target,
/// which version counter applies); `platform` is a free-form qualifier the
/// client may attach (e.g. an OS or device family) for logging and backend
/// use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<String>,
}

impl TargetDescriptor {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      platform: None,
    }
  }

  pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
    self.platform = Some(platform.into());
    self
  }
}

impl fmt::Display for TargetDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.platform {
      Some(platform) => write!(f, "{} ({platform})", self.name),
      None => f.write_str(&self.name),
    }
  }
}
