//! Common utilities and types shared across coordkit

pub mod config;
pub mod error;
pub mod path;
pub mod utils;

pub use config::{Config, DiscoveryConfig, EnsembleConfig, NamespaceConfig, ServerConfig};
pub use error::{Error, Result};
pub use path::Namespaces;
pub use utils::{parse_duration, timestamp_now_millis};
