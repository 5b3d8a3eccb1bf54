mod config;
mod ids;

pub use config::{BuildCommandConfig, Config, ConfigError, DiscoveryConfig, ServiceConfig, WatcherConfig};
pub use ids::{TargetDescriptor, UnitId};
