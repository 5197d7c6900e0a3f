//! Test helper utilities.
//!
//! Provides a backend that counts calls and fails on demand, plus
//! builders for the managers used across the suite.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use unistore_core::{
    ByteRange, ListOptions, ListResult, MemoryBackend, MetadataUpdate, RetryConfig,
    SignedUrlOptions, StorageBackend, StorageError, StorageManager, StorageMetadata,
    StorageObject, UploadOptions,
};

const PROVIDER: &str = "flaky";

/// In-memory backend that records every call and fails selected ones.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    failing_ops: Mutex<HashSet<&'static str>>,
    failing_uploads: Mutex<HashSet<String>>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail
    pub fn fail_always(&self, operation: &'static str) {
        self.failing_ops.lock().insert(operation);
    }

    /// Make uploads of `key` fail
    pub fn fail_upload_of(&self, key: impl Into<String>) {
        self.failing_uploads.lock().insert(key.into());
    }

    /// Number of times `operation` was invoked
    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    fn enter(&self, operation: &'static str) -> unistore_core::Result<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        if self.failing_ops.lock().contains(operation) {
            return Err(StorageError::backend(PROVIDER, format!("injected {} failure", operation)).into());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> unistore_core::Result<StorageObject> {
        self.enter("upload")?;
        if self.failing_uploads.lock().contains(key) {
            return Err(StorageError::backend(PROVIDER, format!("upload of {} rejected", key)).into());
        }
        self.inner.upload(key, data, options).await
    }

    async fn download(&self, key: &str, range: Option<ByteRange>) -> unistore_core::Result<Bytes> {
        self.enter("download")?;
        self.inner.download(key, range).await
    }

    async fn download_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> unistore_core::Result<BoxStream<'static, unistore_core::Result<Bytes>>> {
        self.enter("download_stream")?;
        self.inner.download_stream(key, range).await
    }

    async fn delete(&self, key: &str) -> unistore_core::Result<()> {
        self.enter("delete")?;
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> unistore_core::Result<Vec<String>> {
        self.enter("delete_many")?;
        self.inner.delete_many(keys).await
    }

    async fn exists(&self, key: &str) -> unistore_core::Result<bool> {
        self.enter("exists")?;
        self.inner.exists(key).await
    }

    async fn get_metadata(&self, key: &str) -> unistore_core::Result<StorageMetadata> {
        self.enter("get_metadata")?;
        self.inner.get_metadata(key).await
    }

    async fn update_metadata(&self, key: &str, update: &MetadataUpdate) -> unistore_core::Result<()> {
        self.enter("update_metadata")?;
        self.inner.update_metadata(key, update).await
    }

    async fn list(&self, options: &ListOptions) -> unistore_core::Result<ListResult> {
        self.enter("list")?;
        self.inner.list(options).await
    }

    fn get_public_url(&self, key: &str) -> String {
        self.inner.get_public_url(key)
    }

    async fn get_signed_url(
        &self,
        key: &str,
        options: &SignedUrlOptions,
    ) -> unistore_core::Result<String> {
        self.enter("get_signed_url")?;
        self.inner.get_signed_url(key, options).await
    }

    async fn copy(&self, src: &str, dest: &str) -> unistore_core::Result<StorageObject> {
        self.enter("copy")?;
        self.inner.copy(src, dest).await
    }

    async fn health_check(&self) -> unistore_core::Result<bool> {
        self.enter("health_check")?;
        self.inner.health_check().await
    }
}

/// Manager over a single in-memory provider named `primary`, without retries
pub fn memory_manager() -> StorageManager {
    StorageManager::builder()
        .backend("primary", Arc::new(MemoryBackend::with_bucket("primary")))
        .retry(RetryConfig::no_retries())
        .build()
        .unwrap()
}

/// Manager whose only provider is `backend`, registered as `flaky`
pub fn flaky_manager(backend: Arc<FlakyBackend>, retry: RetryConfig) -> StorageManager {
    StorageManager::builder()
        .backend("flaky", backend)
        .retry(retry)
        .build()
        .unwrap()
}

/// Retry configuration with short deterministic delays
pub fn fast_retries(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms: 100,
        exponential_backoff: true,
        max_jitter_ms: 0,
    }
}

/// Event sink collecting `kind:provider:key` strings
pub fn record_events(manager: &StorageManager) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    manager.subscribe(move |event| {
        sink.lock()
            .push(format!("{}:{}:{}", event.kind, event.provider, event.key));
    });
    events
}
