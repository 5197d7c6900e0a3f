//! Configuration structures for the storage manager.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use crate::cache::CacheConfig;
pub use crate::metrics::MetricsConfig;
pub use crate::retry::RetryConfig;
use crate::storage::StorageConfig;

/// Options for [`StorageManager`](crate::StorageManager).
///
/// ```yaml
/// default_provider: primary
/// providers:
///   primary:
///     provider: s3
///     bucket_name: uploads
///     region: us-east-1
///   backup:
///     provider: filesystem
///     bucket_name: /var/lib/unistore
/// retry:
///   max_retries: 5
/// cache:
///   ttl_secs: 60
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageManagerOptions {
    /// Provider used when an operation names none
    pub default_provider: String,

    /// Backends to construct, by provider name
    #[serde(default)]
    pub providers: BTreeMap<String, StorageConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Concurrency limit for batch deletes and provider sync (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub multipart: MultipartConfig,
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for StorageManagerOptions {
    fn default() -> Self {
        Self {
            default_provider: "default".to_string(),
            providers: BTreeMap::new(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
            max_concurrency: default_max_concurrency(),
            multipart: MultipartConfig::default(),
        }
    }
}

/// When and how the manager splits uploads into parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartConfig {
    /// Payloads larger than this use multipart when the backend supports it
    /// (default: 8 MiB)
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: u64,

    /// Size of every part but the last (default: 5 MiB)
    #[serde(default = "default_part_size_bytes")]
    pub part_size_bytes: u64,
}

fn default_threshold_bytes() -> u64 {
    8 * 1024 * 1024
}

fn default_part_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_threshold_bytes(),
            part_size_bytes: default_part_size_bytes(),
        }
    }
}

impl StorageManagerOptions {
    /// Options with a single provider that is also the default
    pub fn single(name: impl Into<String>, config: StorageConfig) -> Self {
        let name = name.into();
        let mut providers = BTreeMap::new();
        providers.insert(name.clone(), config);
        Self {
            default_provider: name,
            providers,
            ..Self::default()
        }
    }

    /// Parse options from a YAML document
    pub fn from_yaml_str(yaml: &str) -> crate::Result<Self> {
        let options: Self = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Read and parse a YAML options file
    pub async fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.default_provider.is_empty() {
            return Err(crate::Error::Config(
                "default_provider must not be empty".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(crate::Error::Config(
                "max_concurrency must be > 0".to_string(),
            ));
        }

        if self.multipart.part_size_bytes == 0 {
            return Err(crate::Error::Config(
                "multipart.part_size_bytes must be > 0".to_string(),
            ));
        }

        for (name, provider) in &self.providers {
            if provider.bucket_name.is_empty() {
                return Err(crate::Error::Config(format!(
                    "Provider '{}' has an empty bucket_name",
                    name
                )));
            }
        }

        // The default provider may still be registered programmatically,
        // so its absence is reported when the manager is built.
        Ok(())
    }
}
