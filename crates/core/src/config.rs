//! Configuration for the rekindle host and client with per-project overrides.
//!
//! Config priority: project-relative (rekindle.toml) > user (~/.config/rekindle/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Candidate TCP ports, tried in this fixed priority order by both ends.
///
/// The server binds the first free one; the client scans all of them per
/// candidate address until a valid handshake succeeds.
pub const DEFAULT_PORTS: &[u16] = &[5088, 5089, 5994, 5995, 5996, 5997, 5998];

// ============================================================================
// Discovery Configuration
// ============================================================================

/// Connection discovery settings, shared by server bind and client scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
  /// Candidate addresses the client scans for a listening host
  #[serde(default = "default_addresses")]
  pub addresses: Vec<String>,

  /// Candidate ports in priority order (first bindable wins on the server)
  #[serde(default = "default_ports")]
  pub ports: Vec<u16>,

  /// Address the server binds on
  #[serde(default = "default_bind_address")]
  pub bind_address: String,

  /// Per-attempt TCP connect timeout in milliseconds
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,

  /// Timeout for handshake reads in milliseconds
  #[serde(default = "default_handshake_timeout_ms")]
  pub handshake_timeout_ms: u64,

  /// Overall budget for one discovery sweep in milliseconds; when exhausted
  /// the client gives up silently and hot reload stays disabled
  #[serde(default = "default_discovery_timeout_ms")]
  pub discovery_timeout_ms: u64,

  /// Delay before the client's first connection attempt in milliseconds,
  /// giving the host time to come up when both start together
  #[serde(default = "default_startup_delay_ms")]
  pub startup_delay_ms: u64,
}

fn default_addresses() -> Vec<String> {
  vec!["127.0.0.1".to_string()]
}
fn default_ports() -> Vec<u16> {
  DEFAULT_PORTS.to_vec()
}
fn default_bind_address() -> String {
  "127.0.0.1".to_string()
}
fn default_connect_timeout_ms() -> u64 {
  1000
}
fn default_handshake_timeout_ms() -> u64 {
  2000
}
fn default_discovery_timeout_ms() -> u64 {
  20_000
}
fn default_startup_delay_ms() -> u64 {
  1000
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    Self {
      addresses: default_addresses(),
      ports: default_ports(),
      bind_address: default_bind_address(),
      connect_timeout_ms: default_connect_timeout_ms(),
      handshake_timeout_ms: default_handshake_timeout_ms(),
      discovery_timeout_ms: default_discovery_timeout_ms(),
      startup_delay_ms: default_startup_delay_ms(),
    }
  }
}

impl DiscoveryConfig {
  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn handshake_timeout(&self) -> Duration {
    Duration::from_millis(self.handshake_timeout_ms)
  }

  pub fn discovery_timeout(&self) -> Duration {
    Duration::from_millis(self.discovery_timeout_ms)
  }

  pub fn startup_delay(&self) -> Duration {
    Duration::from_millis(self.startup_delay_ms)
  }
}

// ============================================================================
// Watcher Configuration
// ============================================================================

/// File watcher settings for the host-side change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  /// Debounce window in milliseconds before a burst of events settles
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,

  /// File extensions that count as reloadable sources (empty = all files)
  #[serde(default)]
  pub extensions: Vec<String>,
}

fn default_debounce_ms() -> u64 {
  300
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      debounce_ms: default_debounce_ms(),
      extensions: Vec::new(),
    }
  }
}

impl WatcherConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  /// Whether a path passes the extension filter.
  pub fn matches_extension(&self, path: &Path) -> bool {
    if self.extensions.is_empty() {
      return true;
    }
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
  }
}

// ============================================================================
// Service Configuration
// ============================================================================

/// Settings for the standalone `rekindle serve` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  #[serde(default = "default_log_level")]
  pub log_level: String,

  /// Log file rotation: "daily", "hourly", "never"
  #[serde(default = "default_log_rotation")]
  pub log_rotation: String,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_log_rotation() -> String {
  "daily".to_string()
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      log_level: default_log_level(),
      log_rotation: default_log_rotation(),
    }
  }
}

// ============================================================================
// Build Command Configuration
// ============================================================================

/// Settings for the command-driven build backend used by `rekindle serve`.
///
/// The command is run with `sh -c` from the project root; it must write a
/// JSON manifest describing the produced delta (changed/included unit ids
/// plus artifact paths) to `manifest_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildCommandConfig {
  /// Shell command that performs one incremental build
  #[serde(default)]
  pub command: String,

  /// Path to the manifest the command writes, relative to the project root
  #[serde(default = "default_manifest_path")]
  pub manifest_path: PathBuf,
}

fn default_manifest_path() -> PathBuf {
  PathBuf::from("target/rekindle/manifest.json")
}

impl Default for BuildCommandConfig {
  fn default() -> Self {
    Self {
      command: String::new(),
      manifest_path: default_manifest_path(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// rekindle configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Connection discovery settings
  #[serde(default)]
  pub discovery: DiscoveryConfig,

  /// File watcher settings
  #[serde(default)]
  pub watcher: WatcherConfig,

  /// Standalone service settings
  #[serde(default)]
  pub service: ServiceConfig,

  /// Command build backend settings
  #[serde(default)]
  pub build: BuildCommandConfig,
}

impl Config {
  /// Load config for a project, with fallback to user config.
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  /// Load config from an explicit file path.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
  }

  /// Get the user-level config path.
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("REKINDLE_CONFIG_DIR") {
      return Some(PathBuf::from(path).join("config.toml"));
    }

    dirs::config_dir().map(|p| p.join("rekindle").join("config.toml"))
  }

  /// Get the project-relative config path.
  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join("rekindle.toml")
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {0}: {1}")]
  Read(PathBuf, #[source] std::io::Error),
  #[error("failed to parse config {0}: {1}")]
  Parse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.discovery.ports, DEFAULT_PORTS);
    assert_eq!(config.discovery.addresses, vec!["127.0.0.1"]);
    assert_eq!(config.discovery.handshake_timeout(), Duration::from_secs(2));
    assert_eq!(config.watcher.debounce(), Duration::from_millis(300));
  }

  #[test]
  fn test_project_config_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
      dir.path().join("rekindle.toml"),
      r#"
[discovery]
ports = [9001, 9002]
connect_timeout_ms = 250

[watcher]
extensions = ["rs", "toml"]
"#,
    )
    .unwrap();

    let config = Config::load_for_project(dir.path());
    assert_eq!(config.discovery.ports, vec![9001, 9002]);
    assert_eq!(config.discovery.connect_timeout(), Duration::from_millis(250));
    // Unset sections keep their defaults
    assert_eq!(config.discovery.handshake_timeout_ms, 2000);
    assert_eq!(config.watcher.extensions, vec!["rs", "toml"]);
  }

  #[test]
  fn test_missing_config_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_for_project(dir.path());
    assert_eq!(config.discovery.ports, DEFAULT_PORTS);
  }

  #[test]
  fn test_extension_filter() {
    let watcher = WatcherConfig {
      extensions: vec!["rs".to_string()],
      ..Default::default()
    };
    assert!(watcher.matches_extension(Path::new("src/main.rs")));
    assert!(!watcher.matches_extension(Path::new("README.md")));
    assert!(!watcher.matches_extension(Path::new("Makefile")));

    let all = WatcherConfig::default();
    assert!(all.matches_extension(Path::new("anything.xyz")));
  }

  #[test]
  fn test_load_from_bad_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[discovery\nports = oops").unwrap();
    assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(..))));
  }
}
