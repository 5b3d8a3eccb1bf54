//! Build backend that shells out to a configured command.
//!
//! This is what makes `rekindle serve` usable without IDE glue: the project
//! supplies any incremental-build command, and the contract between the two
//! is a small JSON manifest the command writes on success.
//!
//! The command runs from the project root with the request described in
//! environment variables:
//!
//! - `REKINDLE_TARGET` - the build target name
//! - `REKINDLE_CHANGED` - comma-separated changed source paths
//! - `REKINDLE_REQUESTED` - comma-separated additionally requested units
//!
//! The manifest names the units contained in the produced artifact:
//!
//! ```json
//! {
//!   "changed_units": ["app::View"],
//!   "all_units": ["app::View", "app::ViewModel"],
//!   "module_path": "target/rekindle/patch.so",
//!   "debug_info_path": "target/rekindle/patch.dbg"
//! }
//! ```

use async_trait::async_trait;
use rekindle_core::{BuildCommandConfig, TargetDescriptor, UnitId};
use serde::Deserialize;
use server::{BuildBackend, BuildError, BuiltDelta};
use std::path::PathBuf;
use tracing::debug;

/// Manifest the build command writes on success.
#[derive(Debug, Deserialize)]
struct BuildManifest {
  changed_units: Vec<UnitId>,
  all_units: Vec<UnitId>,
  module_path: PathBuf,
  #[serde(default)]
  debug_info_path: Option<PathBuf>,
}

/// [`BuildBackend`] running a configured shell command per build.
pub struct CommandBackend {
  root: PathBuf,
  config: BuildCommandConfig,
}

impl CommandBackend {
  pub fn new(root: PathBuf, config: BuildCommandConfig) -> Self {
    Self { root, config }
  }

  fn join_units(units: &[UnitId]) -> String {
    units.iter().map(|u| u.as_str()).collect::<Vec<_>>().join(",")
  }
}

#[async_trait]
impl BuildBackend for CommandBackend {
  async fn build(
    &self,
    target: &TargetDescriptor,
    changed: &[UnitId],
    requested: &[UnitId],
  ) -> Result<BuiltDelta, BuildError> {
    if self.config.command.is_empty() {
      return Err(BuildError::Command("no build command configured".to_string()));
    }

    debug!(target = %target, command = %self.config.command, "running build command");
    let output = tokio::process::Command::new("sh")
      .arg("-c")
      .arg(&self.config.command)
      .current_dir(&self.root)
      .env("REKINDLE_TARGET", &target.name)
      .env("REKINDLE_CHANGED", Self::join_units(changed))
      .env("REKINDLE_REQUESTED", Self::join_units(requested))
      .output()
      .await?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(BuildError::Compile(stderr.trim().to_string()));
    }

    let manifest_path = self.root.join(&self.config.manifest_path);
    let manifest_text = tokio::fs::read_to_string(&manifest_path).await?;
    let manifest: BuildManifest = serde_json::from_str(&manifest_text).map_err(|e| BuildError::Manifest(e.to_string()))?;

    let module = tokio::fs::read(self.root.join(&manifest.module_path)).await?;
    let debug_info = match &manifest.debug_info_path {
      Some(path) => tokio::fs::read(self.root.join(path)).await?,
      None => Vec::new(),
    };

    Ok(BuiltDelta {
      changed_units: manifest.changed_units,
      all_units: manifest.all_units,
      module,
      debug_info,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn backend_with_command(dir: &TempDir, command: &str) -> CommandBackend {
    CommandBackend::new(
      dir.path().to_path_buf(),
      BuildCommandConfig {
        command: command.to_string(),
        manifest_path: PathBuf::from("manifest.json"),
      },
    )
  }

  #[tokio::test]
  async fn test_successful_command_produces_delta() {
    let dir = TempDir::new().unwrap();
    let command = r#"
printf 'PATCH' > patch.bin
cat > manifest.json <<EOF
{"changed_units": ["app::View"], "all_units": ["app::View", "$REKINDLE_REQUESTED"], "module_path": "patch.bin"}
EOF
"#;
    let backend = backend_with_command(&dir, command);

    let delta = backend
      .build(
        &TargetDescriptor::new("app"),
        &[UnitId::from("src/view.rs")],
        &[UnitId::from("app::Extra")],
      )
      .await
      .unwrap();

    assert_eq!(delta.changed_units, vec![UnitId::from("app::View")]);
    assert_eq!(delta.all_units, vec![UnitId::from("app::View"), UnitId::from("app::Extra")]);
    assert_eq!(delta.module, b"PATCH");
    assert!(delta.debug_info.is_empty());
  }

  #[tokio::test]
  async fn test_failing_command_is_a_compile_error() {
    let dir = TempDir::new().unwrap();
    let backend = backend_with_command(&dir, "echo 'expected `;`' >&2; exit 1");

    let err = backend
      .build(&TargetDescriptor::new("app"), &[UnitId::from("src/view.rs")], &[])
      .await
      .unwrap_err();

    match err {
      BuildError::Compile(message) => assert!(message.contains("expected")),
      other => panic!("expected compile error, got {other}"),
    }
  }

  #[tokio::test]
  async fn test_missing_manifest_is_an_error() {
    let dir = TempDir::new().unwrap();
    let backend = backend_with_command(&dir, "true");

    let err = backend
      .build(&TargetDescriptor::new("app"), &[UnitId::from("src/view.rs")], &[])
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::Io(_)));
  }

  #[tokio::test]
  async fn test_unconfigured_command_is_rejected() {
    let dir = TempDir::new().unwrap();
    let backend = CommandBackend::new(dir.path().to_path_buf(), BuildCommandConfig::default());

    let err = backend
      .build(&TargetDescriptor::new("app"), &[UnitId::from("src/view.rs")], &[])
      .await
      .unwrap_err();
    assert!(matches!(err, BuildError::Command(_)));
  }
}
