//! The storage manager: one facade over every registered backend.
//!
//! Every operation resolves a backend from the [`BackendRegistry`] (the
//! default provider unless one is named), runs through the
//! [`RetryPolicy`], records exactly one [`StorageMetric`] per provider it
//! touches and, on success, emits a [`StorageEvent`]. Metadata reads are
//! served from a TTL cache.
//!
//! ```rust,ignore
//! use bytes::Bytes;
//! use unistore_core::{StorageConfig, StorageManager, UploadOptions};
//!
//! let manager = StorageManager::builder()
//!     .provider("primary", StorageConfig::from_url("s3://uploads?region=us-east-1")?)
//!     .provider("backup", StorageConfig::filesystem("/var/lib/unistore"))
//!     .build()?;
//! manager.initialize()?;
//!
//! manager
//!     .upload("docs/readme.txt", Bytes::from("hello"), &UploadOptions::new(), None)
//!     .await?;
//! manager.sync_providers("primary", "backup", "docs/").await?;
//! manager.shutdown().await;
//! ```

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::TtlCache;
use crate::config::StorageManagerOptions;
use crate::events::{EventBus, StorageEvent, StorageEventKind, Subscription};
use crate::metrics::{
    MetricOperation, MetricsCollector, MetricsSummary, StorageMetric, TimeRange,
};
use crate::registry::{BackendRegistry, ProviderChange};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::{
    create_backend, ByteRange, ListOptions, ListResult, MetadataUpdate, SignedUrlOptions,
    StorageBackend, StorageConfig, StorageMetadata, StorageObject, UploadOptions,
};
use crate::{Error, Result};

/// How [`StorageManager::download`] hands the object back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Bytes,
    Text,
    Json,
    Stream,
}

/// Options for [`StorageManager::download`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub range: Option<ByteRange>,
    pub response_type: ResponseType,
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }
}

/// Downloaded object, shaped by [`ResponseType`].
pub enum DownloadOutput {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl DownloadOutput {
    fn decode(key: &str, data: Bytes, response_type: ResponseType) -> Result<Self> {
        Ok(match response_type {
            ResponseType::Bytes | ResponseType::Stream => DownloadOutput::Bytes(data),
            ResponseType::Text => DownloadOutput::Text(String::from_utf8(data.to_vec()).map_err(
                |e| Error::Serialization(format!("Object {} is not valid UTF-8: {}", key, e)),
            )?),
            ResponseType::Json => DownloadOutput::Json(serde_json::from_slice(&data)?),
        })
    }

    /// Raw bytes, draining the stream if there is one
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            DownloadOutput::Bytes(data) => Ok(data),
            DownloadOutput::Text(text) => Ok(Bytes::from(text)),
            DownloadOutput::Json(value) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
            DownloadOutput::Stream(mut chunks) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = chunks.try_next().await? {
                    buffer.extend_from_slice(&chunk);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// Content as UTF-8 text
    pub async fn into_text(self) -> Result<String> {
        match self {
            DownloadOutput::Text(text) => Ok(text),
            other => {
                let data = other.into_bytes().await?;
                String::from_utf8(data.to_vec())
                    .map_err(|e| Error::Serialization(format!("Invalid UTF-8: {}", e)))
            }
        }
    }
}

impl std::fmt::Debug for DownloadOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadOutput::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            DownloadOutput::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            DownloadOutput::Json(value) => f.debug_tuple("Json").field(value).finish(),
            DownloadOutput::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A key [`StorageManager::sync_providers`] could not copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of [`StorageManager::sync_providers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: Vec<String>,
    pub failed: Vec<SyncFailure>,
    pub bytes_copied: u64,
}

impl SyncReport {
    /// True when every listed object was copied
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct Attribution {
    user_id: Option<String>,
    tenant_id: Option<String>,
}

struct Lifecycle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    registry: BackendRegistry,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    cache: TtlCache<StorageMetadata>,
    events: EventBus,
    options: StorageManagerOptions,
    lifecycle: Mutex<Option<Lifecycle>>,
}

/// Provider-agnostic storage facade.
///
/// Cloning is cheap; clones share backends, cache, metrics and
/// subscribers.
#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<Inner>,
    attribution: Attribution,
}

fn no_size<T>(_: &T) -> Option<u64> {
    None
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl StorageManager {
    /// Build a manager from options, constructing every configured provider
    pub fn new(options: StorageManagerOptions) -> Result<Self> {
        options.validate()?;
        let registry = BackendRegistry::from_configs(&options.default_provider, &options.providers)?;
        Ok(Self::from_parts(options, registry))
    }

    pub fn builder() -> StorageManagerBuilder {
        StorageManagerBuilder::default()
    }

    fn from_parts(options: StorageManagerOptions, registry: BackendRegistry) -> Self {
        info!(
            "Storage manager created with providers {:?} (default: {})",
            registry.list(),
            registry.default_provider()
        );

        Self {
            inner: Arc::new(Inner {
                retry: RetryPolicy::new(options.retry.clone()),
                metrics: Arc::new(MetricsCollector::new(options.metrics.clone())),
                cache: TtlCache::new(&options.cache),
                events: EventBus::new(),
                registry,
                options,
                lifecycle: Mutex::new(None),
            }),
            attribution: Attribution::default(),
        }
    }

    /// Start the cache and metrics sweepers on the current runtime.
    ///
    /// Calling it again while initialized is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.is_some() {
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Initialization(
                "StorageManager::initialize must run inside a tokio runtime".to_string(),
            ));
        }

        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::new();
        if self.inner.options.cache.enabled {
            tasks.push(self.inner.cache.spawn_sweeper(shutdown.subscribe()));
        }
        if self.inner.options.metrics.enabled {
            tasks.push(self.inner.metrics.clone().spawn_sweeper(shutdown.subscribe()));
        }

        *lifecycle = Some(Lifecycle { shutdown, tasks });
        info!(
            "Storage manager initialized ({} background tasks)",
            lifecycle.as_ref().map_or(0, |l| l.tasks.len())
        );
        Ok(())
    }

    /// Stop the background sweepers; a no-op when not initialized
    pub async fn shutdown(&self) {
        let lifecycle = self.inner.lifecycle.lock().take();
        let Some(lifecycle) = lifecycle else {
            return;
        };

        let _ = lifecycle.shutdown.send(());
        for task in lifecycle.tasks {
            if let Err(e) = task.await {
                error!("Storage manager background task failed: {}", e);
            }
        }
        info!("Storage manager shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lifecycle.lock().is_some()
    }

    /// A handle whose emitted events carry `user_id` and `tenant_id`
    pub fn with_attribution(
        &self,
        user_id: impl Into<Option<String>>,
        tenant_id: impl Into<Option<String>>,
    ) -> Self {
        Self {
            inner: self.inner.clone(),
            attribution: Attribution {
                user_id: user_id.into(),
                tenant_id: tenant_id.into(),
            },
        }
    }

    pub fn options(&self) -> &StorageManagerOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    pub fn default_provider(&self) -> &str {
        self.inner.registry.default_provider()
    }

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    pub fn get_provider(&self, name: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
        self.inner.registry.get(name)
    }

    pub fn add_provider(&self, name: impl Into<String>, config: &StorageConfig) -> Result<()> {
        self.inner.registry.add(name, config)
    }

    pub fn register_provider(&self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        self.inner.registry.register(name, backend)
    }

    pub fn remove_provider(&self, name: &str) -> Result<()> {
        self.inner.registry.remove(name)
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.inner.registry.list()
    }

    pub fn subscribe_provider_changes(&self) -> broadcast::Receiver<ProviderChange> {
        self.inner.registry.subscribe_provider_changes()
    }

    // ------------------------------------------------------------------
    // Events, metrics, cache
    // ------------------------------------------------------------------

    /// Receive every [`StorageEvent`] emitted from now on
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn get_metrics(&self, provider: Option<&str>, range: Option<TimeRange>) -> Vec<StorageMetric> {
        self.inner.metrics.query(provider, range)
    }

    pub fn metrics_summary(&self, provider: Option<&str>) -> MetricsSummary {
        self.inner.metrics.summary(provider)
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    fn metadata_cache_key(provider: &str, key: &str) -> String {
        format!("metadata:{}:{}", provider, key)
    }

    fn provider_name(&self, provider: Option<&str>) -> String {
        provider
            .unwrap_or(self.inner.registry.default_provider())
            .to_string()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.options.max_concurrency.max(1)
    }

    fn record(
        &self,
        operation: MetricOperation,
        provider: &str,
        started: Instant,
        size: Option<u64>,
        error: Option<&Error>,
    ) {
        self.inner.metrics.record_operation(
            operation,
            provider,
            started.elapsed(),
            size,
            error.map(|e| e.to_string()),
        );
    }

    fn emit(&self, event: StorageEvent) {
        let event = event.with_attribution(
            self.attribution.user_id.clone(),
            self.attribution.tenant_id.clone(),
        );
        self.inner.events.emit(&event);
    }

    fn after_write(&self, provider: &str, key: &str) {
        if self.inner.options.cache.invalidate_on_write {
            self.inner
                .cache
                .invalidate(&Self::metadata_cache_key(provider, key));
        }
    }

    /// Resolve the backend, run `call` under the retry policy and record
    /// one metric for the whole call.
    async fn instrumented<T, S, F, Fut>(
        &self,
        operation: MetricOperation,
        name: &'static str,
        provider: &str,
        size_of: S,
        call: F,
    ) -> Result<T>
    where
        S: Fn(&T) -> Option<u64>,
        F: Fn(Arc<dyn StorageBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match self.inner.registry.get(Some(provider)) {
            Ok(backend) => {
                self.inner
                    .retry
                    .execute(name, || call(backend.clone()))
                    .await
            }
            Err(e) => Err(e),
        };

        let size = result.as_ref().ok().and_then(|value| size_of(value));
        self.record(operation, provider, started, size, result.as_ref().err());
        result
    }

    // ------------------------------------------------------------------
    // Object operations
    // ------------------------------------------------------------------

    /// Store `data` under `key`, replacing any existing object
    pub async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
        provider: Option<&str>,
    ) -> Result<StorageObject> {
        let provider = self.provider_name(provider);
        let size = data.len() as u64;
        let started = Instant::now();

        let result = match self.inner.registry.get(Some(&provider)) {
            Ok(backend) => self.put_object(&backend, key, data, options).await,
            Err(e) => Err(e),
        };
        self.record(
            MetricOperation::Upload,
            &provider,
            started,
            result.is_ok().then_some(size),
            result.as_ref().err(),
        );
        let object = result?;

        self.after_write(&provider, key);
        self.emit(
            StorageEvent::new(StorageEventKind::Upload, &provider, key)
                .with_size(size)
                .with_metadata(object.metadata.clone()),
        );
        Ok(object)
    }

    /// Single put or multipart upload, depending on size and backend
    async fn put_object(
        &self,
        backend: &Arc<dyn StorageBackend>,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<StorageObject> {
        let multipart = &self.inner.options.multipart;
        if data.len() as u64 > multipart.threshold_bytes && backend.supports_multipart() {
            return self.put_multipart(backend, key, data, options).await;
        }

        let object = self
            .inner
            .retry
            .execute("upload", || backend.upload(key, data.clone(), options))
            .await?;
        options.report_progress(100);
        Ok(object)
    }

    async fn put_multipart(
        &self,
        backend: &Arc<dyn StorageBackend>,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<StorageObject> {
        let retry = &self.inner.retry;
        let part_size = self.inner.options.multipart.part_size_bytes.max(1) as usize;
        let total = data.len();

        let upload_id = retry
            .execute("create_multipart_upload", || {
                backend.create_multipart_upload(key, options)
            })
            .await?;
        debug!(
            "Multipart upload {} for {}: {} bytes in parts of {}",
            upload_id, key, total, part_size
        );

        let result = self
            .upload_parts(backend, &upload_id, &data, part_size, options)
            .await;

        if let Err(e) = &result {
            warn!("Multipart upload {} for {} failed: {}", upload_id, key, e);
            if let Err(abort_err) = backend.abort_multipart_upload(&upload_id).await {
                warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        backend: &Arc<dyn StorageBackend>,
        upload_id: &str,
        data: &Bytes,
        part_size: usize,
        options: &UploadOptions,
    ) -> Result<StorageObject> {
        let retry = &self.inner.retry;
        let total = data.len();
        let mut parts = Vec::new();

        for (index, start) in (0..total).step_by(part_size).enumerate() {
            let chunk = data.slice(start..(start + part_size).min(total));
            let part_number = index as u32 + 1;
            let part = retry
                .execute("upload_part", || {
                    backend.upload_part(upload_id, part_number, chunk.clone())
                })
                .await?;
            parts.push(part);

            let done = (start + chunk.len()) as u64;
            options.report_progress((done * 100 / total as u64) as u8);
        }

        retry
            .execute("complete_multipart_upload", || {
                backend.complete_multipart_upload(upload_id, &parts)
            })
            .await
    }

    /// Fetch an object, or a byte range of it
    pub async fn download(
        &self,
        key: &str,
        options: &DownloadOptions,
        provider: Option<&str>,
    ) -> Result<DownloadOutput> {
        let provider = self.provider_name(provider);
        let range = options.range;

        let (output, size) = if options.response_type == ResponseType::Stream {
            let chunks = self
                .instrumented(
                    MetricOperation::Download,
                    "download",
                    &provider,
                    no_size,
                    |backend| async move { backend.download_stream(key, range).await },
                )
                .await?;
            (DownloadOutput::Stream(chunks), None)
        } else {
            // Decoding is part of the download, so a bad body is a failed metric
            let started = Instant::now();
            let result = self
                .fetch_decoded(&provider, key, range, options.response_type)
                .await;
            self.record(
                MetricOperation::Download,
                &provider,
                started,
                result.as_ref().ok().map(|(_, size)| *size),
                result.as_ref().err(),
            );
            let (output, size) = result?;
            (output, Some(size))
        };

        let mut event = StorageEvent::new(StorageEventKind::Download, &provider, key);
        event.size = size;
        self.emit(event);
        Ok(output)
    }

    async fn fetch_decoded(
        &self,
        provider: &str,
        key: &str,
        range: Option<ByteRange>,
        response_type: ResponseType,
    ) -> Result<(DownloadOutput, u64)> {
        let backend = self.inner.registry.get(Some(provider))?;
        let data = self
            .inner
            .retry
            .execute("download", || backend.download(key, range))
            .await?;
        let size = data.len() as u64;
        Ok((DownloadOutput::decode(key, data, response_type)?, size))
    }

    /// Delete an object; deleting a missing key succeeds
    pub async fn delete(&self, key: &str, provider: Option<&str>) -> Result<()> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::Delete,
            "delete",
            &provider,
            no_size,
            |backend| async move { ignore_not_found(backend.delete(key).await) },
        )
        .await?;

        self.after_write(&provider, key);
        self.emit(StorageEvent::new(StorageEventKind::Delete, &provider, key));
        Ok(())
    }

    /// Delete several objects, best effort; returns the keys that remain
    pub async fn delete_many(&self, keys: &[String], provider: Option<&str>) -> Result<Vec<String>> {
        let provider = self.provider_name(provider);
        let started = Instant::now();
        let result = self.delete_keys(&provider, keys).await;
        self.record(
            MetricOperation::Delete,
            &provider,
            started,
            None,
            result.as_ref().err(),
        );
        let failed = result?;

        for key in keys.iter().filter(|k| !failed.contains(k)) {
            self.after_write(&provider, key);
            self.emit(StorageEvent::new(StorageEventKind::Delete, &provider, key));
        }
        Ok(failed)
    }

    async fn delete_keys(&self, provider: &str, keys: &[String]) -> Result<Vec<String>> {
        let backend = self.inner.registry.get(Some(provider))?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        match backend.delete_many(keys).await {
            Ok(failed) => return Ok(failed),
            Err(e) if e.is_not_supported() => {
                debug!("{} has no batch delete, deleting {} keys individually", provider, keys.len());
            }
            Err(e) => {
                warn!("Batch delete on {} failed, deleting keys individually: {}", provider, e);
            }
        }

        let retry = &self.inner.retry;
        let mut failed: Vec<String> = stream::iter(keys.iter())
            .map(|key| {
                let backend = backend.clone();
                async move {
                    let result = retry
                        .execute("delete", || {
                            let backend = backend.clone();
                            async move { ignore_not_found(backend.delete(key).await) }
                        })
                        .await;
                    (key, result)
                }
            })
            .buffer_unordered(self.max_concurrency())
            .filter_map(|(key, result)| async move {
                match result {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Failed to delete {} from {}: {}", key, provider, e);
                        Some(key.clone())
                    }
                }
            })
            .collect()
            .await;

        failed.sort_by_key(|k| keys.iter().position(|key| key == k));
        Ok(failed)
    }

    pub async fn exists(&self, key: &str, provider: Option<&str>) -> Result<bool> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::Metadata,
            "exists",
            &provider,
            no_size,
            |backend| async move { backend.exists(key).await },
        )
        .await
    }

    /// Object metadata, served from the cache while fresh
    pub async fn get_metadata(&self, key: &str, provider: Option<&str>) -> Result<StorageMetadata> {
        let provider = self.provider_name(provider);
        let cache_key = Self::metadata_cache_key(&provider, key);

        if let Some(metadata) = self.inner.cache.get(&cache_key) {
            debug!("Metadata cache hit: {}", cache_key);
            self.record(MetricOperation::Metadata, &provider, Instant::now(), None, None);
            return Ok(metadata);
        }

        let metadata = self
            .instrumented(
                MetricOperation::Metadata,
                "get_metadata",
                &provider,
                no_size,
                |backend| async move { backend.get_metadata(key).await },
            )
            .await?;
        self.inner.cache.set_default(cache_key, metadata.clone());
        Ok(metadata)
    }

    pub async fn update_metadata(
        &self,
        key: &str,
        update: &MetadataUpdate,
        provider: Option<&str>,
    ) -> Result<()> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::Metadata,
            "update_metadata",
            &provider,
            no_size,
            |backend| async move { backend.update_metadata(key, update).await },
        )
        .await?;
        self.after_write(&provider, key);
        Ok(())
    }

    /// One page of objects
    pub async fn list(&self, options: &ListOptions, provider: Option<&str>) -> Result<ListResult> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::List,
            "list",
            &provider,
            no_size,
            |backend| async move { backend.list(options).await },
        )
        .await
    }

    /// Every object under `prefix`, across all pages
    pub async fn list_by_prefix(
        &self,
        prefix: &str,
        provider: Option<&str>,
    ) -> Result<Vec<StorageObject>> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::List,
            "list_by_prefix",
            &provider,
            no_size,
            |backend| async move { backend.list_by_prefix(prefix).await },
        )
        .await
    }

    /// Deterministic public URL; no network call
    pub fn get_public_url(&self, key: &str, provider: Option<&str>) -> Result<String> {
        let provider = self.provider_name(provider);
        let started = Instant::now();
        let result = self
            .inner
            .registry
            .get(Some(&provider))
            .map(|backend| backend.get_public_url(key));
        self.record(MetricOperation::Url, &provider, started, None, result.as_ref().err());
        result
    }

    /// Time-limited pre-authorized URL
    pub async fn get_signed_url(
        &self,
        key: &str,
        options: &SignedUrlOptions,
        provider: Option<&str>,
    ) -> Result<String> {
        let provider = self.provider_name(provider);
        self.instrumented(
            MetricOperation::Url,
            "get_signed_url",
            &provider,
            no_size,
            |backend| async move { backend.get_signed_url(key, options).await },
        )
        .await
    }

    /// Copy within one backend
    pub async fn copy(&self, src: &str, dest: &str, provider: Option<&str>) -> Result<StorageObject> {
        let provider = self.provider_name(provider);
        let object = self
            .instrumented(
                MetricOperation::Upload,
                "copy",
                &provider,
                |object: &StorageObject| Some(object.size),
                |backend| async move { backend.copy(src, dest).await },
            )
            .await?;

        self.after_write(&provider, dest);
        self.emit(
            StorageEvent::new(StorageEventKind::Copy, &provider, dest)
                .with_size(object.size)
                .with_metadata(object.metadata.clone()),
        );
        Ok(object)
    }

    /// Move within one backend; copy then delete unless the backend moves natively
    pub async fn move_object(
        &self,
        src: &str,
        dest: &str,
        provider: Option<&str>,
    ) -> Result<StorageObject> {
        let provider = self.provider_name(provider);
        let object = self
            .instrumented(
                MetricOperation::Upload,
                "move",
                &provider,
                |object: &StorageObject| Some(object.size),
                |backend| async move { backend.move_object(src, dest).await },
            )
            .await?;

        self.after_write(&provider, src);
        self.after_write(&provider, dest);
        self.emit(
            StorageEvent::new(StorageEventKind::Move, &provider, dest)
                .with_size(object.size)
                .with_metadata(object.metadata.clone()),
        );
        Ok(object)
    }

    /// Download from one provider and upload to another, keeping the
    /// content type and custom metadata. The object is buffered in memory.
    ///
    /// The source read is recorded as a `download` against the source and
    /// the write as an `upload` against the destination.
    pub async fn copy_between_providers(
        &self,
        src_provider: &str,
        src_key: &str,
        dest_provider: &str,
        dest_key: &str,
    ) -> Result<StorageObject> {
        let dest = match self.inner.registry.get(Some(dest_provider)) {
            Ok(dest) => dest,
            Err(e) => {
                self.record(MetricOperation::Upload, dest_provider, Instant::now(), None, Some(&e));
                return Err(e);
            }
        };
        let (data, options) = self.read_source(src_provider, src_key).await?;

        let size = data.len() as u64;
        let started = Instant::now();
        let result = self.put_object(&dest, dest_key, data, &options).await;
        self.record(
            MetricOperation::Upload,
            dest_provider,
            started,
            result.is_ok().then_some(size),
            result.as_ref().err(),
        );
        let object = result?;

        self.after_write(dest_provider, dest_key);
        self.emit(
            StorageEvent::new(StorageEventKind::Copy, dest_provider, dest_key)
                .with_size(object.size)
                .with_metadata(object.metadata.clone()),
        );
        Ok(object)
    }

    /// Body and upload options of a source object, recorded as one download
    async fn read_source(&self, provider: &str, key: &str) -> Result<(Bytes, UploadOptions)> {
        let started = Instant::now();
        let result = self.fetch_with_metadata(provider, key).await;
        self.record(
            MetricOperation::Download,
            provider,
            started,
            result.as_ref().ok().map(|(data, _)| data.len() as u64),
            result.as_ref().err(),
        );
        result
    }

    async fn fetch_with_metadata(&self, provider: &str, key: &str) -> Result<(Bytes, UploadOptions)> {
        let backend = self.inner.registry.get(Some(provider))?;
        let retry = &self.inner.retry;
        let metadata = retry
            .execute("get_metadata", || backend.get_metadata(key))
            .await?;
        let data = retry
            .execute("download", || backend.download(key, None))
            .await?;
        Ok((data, UploadOptions::from(&metadata)))
    }

    /// Copy every object under `prefix` from one provider to another.
    ///
    /// The source listing and each per-key copy record their own metrics;
    /// the sync adds none of its own. Individual failures are collected in
    /// the report. Only an unknown destination or a failed source listing
    /// fails the call.
    pub async fn sync_providers(
        &self,
        src_provider: &str,
        dest_provider: &str,
        prefix: &str,
    ) -> Result<SyncReport> {
        if !self.inner.registry.contains(dest_provider) {
            return Err(Error::ProviderNotFound(dest_provider.to_string()));
        }
        let objects = self.list_by_prefix(prefix, Some(src_provider)).await?;
        info!(
            "Syncing {} objects under '{}' from {} to {}",
            objects.len(),
            prefix,
            src_provider,
            dest_provider
        );

        let results: Vec<(String, Result<StorageObject>)> = stream::iter(objects)
            .map(|object| async move {
                let result = self
                    .copy_between_providers(src_provider, &object.key, dest_provider, &object.key)
                    .await;
                (object.key, result)
            })
            .buffer_unordered(self.max_concurrency())
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (key, result) in results {
            match result {
                Ok(object) => {
                    report.bytes_copied += object.size;
                    report.copied.push(key);
                }
                Err(e) => {
                    warn!("Failed to sync {} to {}: {}", key, dest_provider, e);
                    report.failed.push(SyncFailure {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.copied.sort();
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        info!(
            "Sync {} -> {} complete: {} copied, {} failed",
            src_provider,
            dest_provider,
            report.copied.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Check one provider, or all of them; a failing check reports `false`
    pub async fn health_check(&self, provider: Option<&str>) -> BTreeMap<String, bool> {
        let names = match provider {
            Some(name) => vec![name.to_string()],
            None => self.inner.registry.list(),
        };

        let checks = names.into_iter().map(|name| async move {
            let healthy = match self.inner.registry.get(Some(&name)) {
                Ok(backend) => match backend.health_check().await {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        warn!("Health check for {} failed: {}", name, e);
                        false
                    }
                },
                Err(_) => false,
            };
            (name, healthy)
        });

        futures::future::join_all(checks).await.into_iter().collect()
    }
}

/// Builder for [`StorageManager`].
#[derive(Default)]
pub struct StorageManagerBuilder {
    options: StorageManagerOptions,
    default_provider: Option<String>,
    first_provider: Option<String>,
    backends: Vec<(String, Arc<dyn StorageBackend>)>,
}

impl StorageManagerBuilder {
    /// Start from existing options; their providers are kept
    pub fn options(mut self, options: StorageManagerOptions) -> Self {
        self.default_provider = Some(options.default_provider.clone());
        self.options = options;
        self
    }

    /// Add a provider built from configuration
    pub fn provider(mut self, name: impl Into<String>, config: StorageConfig) -> Self {
        let name = name.into();
        self.first_provider.get_or_insert_with(|| name.clone());
        self.options.providers.insert(name, config);
        self
    }

    /// Add an already-constructed backend
    pub fn backend(mut self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        let name = name.into();
        self.first_provider.get_or_insert_with(|| name.clone());
        self.backends.push((name, backend));
        self
    }

    /// Provider used when an operation names none; defaults to the first added
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn cache(mut self, cache: crate::config::CacheConfig) -> Self {
        self.options.cache = cache;
        self
    }

    pub fn metrics(mut self, metrics: crate::config::MetricsConfig) -> Self {
        self.options.metrics = metrics;
        self
    }

    pub fn multipart(mut self, multipart: crate::config::MultipartConfig) -> Self {
        self.options.multipart = multipart;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.options.max_concurrency = max_concurrency;
        self
    }

    pub fn build(mut self) -> Result<StorageManager> {
        let default_provider = self
            .default_provider
            .or(self.first_provider)
            .ok_or_else(|| Error::Initialization("No storage providers configured".to_string()))?;
        self.options.default_provider = default_provider;
        self.options.validate()?;

        let mut backends: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        for (name, config) in &self.options.providers {
            let backend = create_backend(config).map_err(|e| {
                Error::Initialization(format!("Failed to create provider '{}': {}", name, e))
            })?;
            backends.insert(name.clone(), backend);
        }
        for (name, backend) in self.backends {
            backends.insert(name, backend);
        }

        let registry = BackendRegistry::new(self.options.default_provider.clone(), backends)?;
        Ok(StorageManager::from_parts(self.options, registry))
    }
}
