//! Unistore Core Library
//!
//! A single storage API over S3, Google Cloud Storage, Azure Blob Storage,
//! the local filesystem and in-memory buckets. The [`StorageManager`] adds
//! retries, metrics, metadata caching, events and cross-provider transfer
//! on top of the per-provider [`StorageBackend`] adapters.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod storage;

pub use cache::{CacheConfig, TtlCache};
pub use config::{MultipartConfig, StorageManagerOptions};
pub use error::{Error, ErrorKind, Result, StorageError};
pub use events::{EventBus, StorageEvent, StorageEventKind, Subscription};
pub use manager::{
    DownloadOptions, DownloadOutput, ResponseType, StorageManager, StorageManagerBuilder,
    SyncFailure, SyncReport,
};
pub use metrics::{
    LatencyStats, MetricOperation, MetricsCollector, MetricsConfig, MetricsSummary,
    OperationSummary, StorageMetric, TimeRange,
};
pub use registry::{BackendRegistry, ProviderChange};
pub use retry::{RetryConfig, RetryPolicy};
pub use storage::{
    create_backend, ByteRange, FilesystemBackend, ListOptions, ListResult, MemoryBackend,
    MetadataUpdate, ObjectStoreBackend, PartInfo, ProviderKind, SignedUrlMethod,
    SignedUrlOptions, StorageBackend, StorageConfig, StorageMetadata, StorageObject,
    UploadOptions,
};
