//! Storage backend abstraction and implementations.
//!
//! This module defines the [`StorageBackend`] contract every provider
//! implements, the value types exchanged across it, and the adapters that
//! ship with the crate:
//!
//! - **S3 / GCS / Azure**: [`ObjectStoreBackend`], built on `object_store`
//! - **Filesystem**: [`FilesystemBackend`], rooted at a local directory
//! - **Memory**: [`MemoryBackend`], in-process storage (for testing)
//!
//! Any other type implementing [`StorageBackend`] can be registered with the
//! [`BackendRegistry`](crate::registry::BackendRegistry) directly.

mod backend;
mod cloud;
mod config;
mod filesystem;
mod memory;
mod types;

pub use backend::StorageBackend;
pub use cloud::ObjectStoreBackend;
pub use config::{ProviderKind, StorageConfig};
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
pub use types::{
    guess_mime_type, ByteRange, ListOptions, ListResult, MetadataUpdate, PartInfo,
    ProgressCallback, SignedUrlMethod, SignedUrlOptions, StorageMetadata, StorageObject,
    UploadOptions, DEFAULT_MIME_TYPE,
};

use crate::error::StorageError;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Create a storage backend from configuration.
///
/// # Example
///
/// ```rust,ignore
/// use unistore_core::storage::{create_backend, StorageConfig};
///
/// let backend = create_backend(&StorageConfig::memory("scratch"))?;
/// ```
pub fn create_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.provider {
        ProviderKind::S3 => Arc::new(ObjectStoreBackend::s3(config)?),
        ProviderKind::Gcs => Arc::new(ObjectStoreBackend::gcs(config)?),
        ProviderKind::Azure => Arc::new(ObjectStoreBackend::azure(config)?),
        ProviderKind::Filesystem => Arc::new(FilesystemBackend::from_config(config)),
        ProviderKind::Memory => {
            let mut backend = MemoryBackend::with_bucket(&config.bucket_name);
            if let Some(base) = config.option("public_url_base") {
                backend = backend.with_public_url_base(base);
            }
            if let Some(limit) = config.option("capacity_bytes") {
                let limit = limit.parse::<u64>().map_err(|e| {
                    crate::Error::Config(format!("Invalid capacity_bytes '{}': {}", limit, e))
                })?;
                backend = backend.with_capacity_limit(limit);
            }
            Arc::new(backend)
        }
    };

    info!(
        "Created {} backend for bucket: {}",
        config.provider, config.bucket_name
    );
    Ok(backend)
}

/// Reject keys that cannot name an object.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.ends_with('/') {
        return Err(StorageError::InvalidKey(format!("'{}' is not an object key", key)).into());
    }
    Ok(())
}

/// Page size used when a listing does not ask for one.
pub(crate) const DEFAULT_PAGE_SIZE: usize = 1000;

/// The delimiter-folded prefix `key` belongs to, if any. `key` must start
/// with `prefix`.
pub(crate) fn common_prefix<'a>(
    key: &'a str,
    prefix: &str,
    delimiter: Option<&str>,
) -> Option<&'a str> {
    let delimiter = delimiter.filter(|d| !d.is_empty())?;
    key[prefix.len()..]
        .find(delimiter)
        .map(|idx| &key[..prefix.len() + idx + delimiter.len()])
}

/// Apply continuation token, delimiter grouping and page size to a
/// key-ordered sequence of objects.
///
/// Keys folded under one common prefix are contiguous in key order, so a
/// page never splits a common prefix and the next page resumes after its
/// last member.
pub(crate) fn paginate<I>(entries: I, options: &ListOptions) -> ListResult
where
    I: IntoIterator<Item = StorageObject>,
{
    let prefix = options.prefix.as_deref().unwrap_or("");
    let max_results = options.max_results.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let delimiter = options.delimiter.as_deref().filter(|d| !d.is_empty());
    let token = options.page_token.as_deref();

    let mut result = ListResult::default();
    let mut consumed = 0usize;
    let mut last_key: Option<String> = None;

    for object in entries {
        if !object.key.starts_with(prefix) {
            continue;
        }
        if token.is_some_and(|t| object.key.as_str() <= t) {
            continue;
        }

        let folded = common_prefix(&object.key, prefix, delimiter).map(str::to_string);

        if let Some(common) = folded {
            if result.prefixes.last() == Some(&common) {
                last_key = Some(object.key);
                continue;
            }
            if consumed == max_results {
                result.is_truncated = true;
                break;
            }
            result.prefixes.push(common);
            last_key = Some(object.key);
        } else {
            if consumed == max_results {
                result.is_truncated = true;
                break;
            }
            last_key = Some(object.key.clone());
            result.objects.push(object);
        }
        consumed += 1;
    }

    if result.is_truncated {
        result.next_page_token = last_key;
    }
    result
}

/// Append `key` to `base` as percent-encoded path segments.
pub(crate) fn join_url(base: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    match url::Url::parse(base) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().extend(key.split('/'));
            }
            url.to_string()
        }
        _ => format!("{}/{}", base.trim_end_matches('/'), key),
    }
}
