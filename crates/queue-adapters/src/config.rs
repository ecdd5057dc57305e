//! Runtime configuration: which provider to use and the default queue options.
//!
//! Sources, later ones overriding earlier ones:
//!  1. An optional YAML file
//!  2. Environment variables prefixed `QUEUE__` with `__` as the nesting
//!     separator, e.g. `QUEUE__PROVIDER__TYPE=sqlite` or
//!     `QUEUE__QUEUE__POLLING_INTERVAL_MS=250`
//!
//! Every field carries a serde default, so an empty environment yields an
//! in-memory provider with default queue options.

use crate::client::{QueueClient, QueueClientFactory, QueueProvider};
use crate::error::ConfigurationError;
use crate::provider::ProviderConfig;
use crate::queue::QueueOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QUEUE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
    pub queue: QueueOptions,
}

impl RuntimeConfig {
    /// Load from `path` (if given) and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
            info!(path = %path.display(), "Loading queue configuration from file");
        }

        let config: RuntimeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.queue.validate()?;

        if let ProviderConfig::Sqlite(sqlite) = &self.provider {
            if sqlite.path.as_os_str().is_empty() {
                return Err(ConfigurationError::Invalid {
                    message: "sqlite provider requires a database path".to_string(),
                });
            }
        }
        if let ProviderConfig::Document(document) = &self.provider {
            if document.capped.is_some_and(|capped| capped.max_documents == 0) {
                return Err(ConfigurationError::Invalid {
                    message: "capped collections must hold at least one document".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Client over the configured provider
    pub fn client(&self) -> QueueClient {
        QueueClientFactory::create_client(&self.provider)
    }
}

impl ProviderConfig {
    /// Construct the provider this configuration describes
    pub fn build(&self) -> Arc<dyn QueueProvider> {
        QueueClientFactory::create_provider(self)
    }
}
