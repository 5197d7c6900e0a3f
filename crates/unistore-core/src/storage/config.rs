//! Storage configuration types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Kinds of backend the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// AWS S3 or S3-compatible storage (MinIO, Ceph RGW, DigitalOcean Spaces, etc.)
    S3,
    /// Google Cloud Storage
    Gcs,
    /// Azure Blob Storage
    Azure,
    /// Local filesystem storage
    Filesystem,
    /// In-memory storage (for testing)
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::S3 => "s3",
            ProviderKind::Gcs => "gcs",
            ProviderKind::Azure => "azure",
            ProviderKind::Filesystem => "filesystem",
            ProviderKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes how to construct one backend instance.
///
/// `credentials` and `options` are opaque to the core; each adapter reads
/// the keys it understands:
///
/// | provider | credentials | options |
/// |---|---|---|
/// | s3 | `access_key_id`, `secret_access_key`, `session_token` | `endpoint`, `allow_http`, `prefix`, `public_url_base` |
/// | gcs | `service_account_path` | `prefix`, `public_url_base` |
/// | azure | `account_name`, `account_key`, `sas_token` | `endpoint`, `prefix`, `public_url_base` |
/// | filesystem | - | `root` (defaults to `bucket_name`), `public_url_base` |
/// | memory | - | `public_url_base` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub provider: ProviderKind,
    /// Logical container name (bucket, container, or root directory)
    pub bucket_name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl StorageConfig {
    pub fn new(provider: ProviderKind, bucket_name: impl Into<String>) -> Self {
        Self {
            provider,
            bucket_name: bucket_name.into(),
            region: None,
            credentials: HashMap::new(),
            options: HashMap::new(),
        }
    }

    /// In-memory backend named `name`
    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(ProviderKind::Memory, name)
    }

    /// Filesystem backend rooted at `path`
    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(ProviderKind::Filesystem, path.to_string_lossy().to_string())
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Boolean option; accepts `true`/`1`/`yes`
    pub fn flag(&self, key: &str) -> bool {
        self.option(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    /// Parse configuration from a URL string
    ///
    /// Supported URL formats:
    /// - `s3://bucket-name?region=us-east-1&endpoint=http://localhost:9000`
    /// - `azure://container@account.blob.core.windows.net`
    /// - `gcs://bucket-name` or `gs://bucket-name`
    /// - `file:///path/to/data`
    /// - `memory://name`
    pub fn from_url(url: &str) -> crate::Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| crate::Error::Config(format!("Invalid storage URL: {}", e)))?;
        let query = |name: &str| {
            parsed
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.to_string())
        };

        let mut config = match parsed.scheme() {
            "s3" | "s3a" => {
                let mut config =
                    Self::new(ProviderKind::S3, parsed.host_str().unwrap_or_default());
                config.region = query("region");
                if let Some(endpoint) = query("endpoint") {
                    if endpoint.starts_with("http://") {
                        config = config.with_option("allow_http", "true");
                    }
                    config = config.with_option("endpoint", endpoint);
                }
                if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                    config = config.with_credential("access_key_id", key);
                }
                if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                    config = config.with_credential("secret_access_key", secret);
                }
                config
            }
            "azure" | "az" => {
                let host = parsed.host_str().unwrap_or_default();
                let account_name = host.split('.').next().unwrap_or(host).to_string();
                let container = if parsed.username().is_empty() {
                    parsed.path().trim_start_matches('/').to_string()
                } else {
                    parsed.username().to_string()
                };

                let mut config = Self::new(ProviderKind::Azure, container)
                    .with_credential("account_name", account_name);
                if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
                    config = config.with_credential("account_key", key);
                }
                config
            }
            "gcs" | "gs" => {
                let mut config =
                    Self::new(ProviderKind::Gcs, parsed.host_str().unwrap_or_default());
                if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
                    config = config.with_credential("service_account_path", path);
                }
                config
            }
            "file" => Self::filesystem(parsed.path()),
            "memory" => Self::memory(
                parsed
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .unwrap_or("memory"),
            ),
            scheme => {
                return Err(crate::Error::Config(format!(
                    "Unknown storage scheme: {}",
                    scheme
                )))
            }
        };

        if let Some(prefix) = query("prefix") {
            config = config.with_option("prefix", prefix);
        }

        if config.bucket_name.is_empty() {
            return Err(crate::Error::Config(format!(
                "Storage URL has no bucket or container: {}",
                url
            )));
        }

        Ok(config)
    }

    /// Get the key prefix for this storage configuration
    pub fn prefix(&self) -> Option<&str> {
        self.option("prefix")
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }
}
