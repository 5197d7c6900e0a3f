//! In-memory storage backend for testing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{
    ByteRange, ListOptions, ListResult, MetadataUpdate, PartInfo, SignedUrlOptions,
    StorageMetadata, StorageObject, UploadOptions,
};
use super::{join_url, paginate, validate_key, StorageBackend};
use crate::error::StorageError;
use crate::Result;

const PROVIDER: &str = "memory";

struct StoredObject {
    data: Bytes,
    metadata: StorageMetadata,
    public: bool,
}

struct PendingUpload {
    key: String,
    options: UploadOptions,
    parts: BTreeMap<u32, Bytes>,
}

/// In-memory storage backend.
///
/// Implements the whole contract, including batch deletes, metadata updates
/// and multipart uploads. Data does not survive the process. An optional
/// capacity limit turns oversized writes into `QuotaExceeded` errors.
pub struct MemoryBackend {
    bucket: String,
    public_url_base: String,
    capacity_bytes: Option<u64>,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    version: AtomicU64,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::with_bucket("memory")
    }

    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            public_url_base: format!("memory://{}", bucket),
            bucket,
            capacity_bytes: None,
            objects: RwLock::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Reject writes once the stored bytes would exceed `bytes`
    pub fn with_capacity_limit(mut self, bytes: u64) -> Self {
        self.capacity_bytes = Some(bytes);
        self
    }

    pub fn with_public_url_base(mut self, base: impl Into<String>) -> Self {
        self.public_url_base = base.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn next_etag(&self) -> String {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        format!("\"{:016x}\"", version)
    }

    fn check_capacity(
        &self,
        objects: &BTreeMap<String, StoredObject>,
        key: &str,
        incoming: u64,
    ) -> Result<()> {
        let Some(limit) = self.capacity_bytes else {
            return Ok(());
        };

        let used: u64 = objects
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, o)| o.data.len() as u64)
            .sum();

        if used + incoming > limit {
            return Err(StorageError::QuotaExceeded {
                provider: PROVIDER.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn store(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<StorageObject> {
        let mut objects = self.objects.write();
        self.check_capacity(&objects, key, data.len() as u64)?;

        let mut metadata = options.to_metadata(key, data.len() as u64, Utc::now());
        metadata.etag = Some(self.next_etag());

        let object = self.to_object(key, &metadata, options.public);
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata,
                public: options.public,
            },
        );
        Ok(object)
    }

    fn to_object(&self, key: &str, metadata: &StorageMetadata, public: bool) -> StorageObject {
        let url = self.get_public_url(key);
        let object = StorageObject::new(key, metadata.size, metadata.last_modified)
            .with_etag(metadata.etag.clone())
            .with_metadata(metadata.clone())
            .with_url(url.clone());
        if public {
            object.with_public_url(url)
        } else {
            object
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<StorageObject> {
        validate_key(key)?;
        debug!("Memory PUT: {} ({} bytes)", key, data.len());
        self.store(key, data, options)
    }

    async fn download(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let objects = self.objects.read();
        let stored = objects
            .get(key)
            .ok_or_else(|| StorageError::not_found(key, PROVIDER))?;

        Ok(match range {
            Some(range) => stored
                .data
                .slice(range.to_slice_range(stored.data.len() as u64)),
            None => stored.data.clone(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut objects = self.objects.write();
        for key in keys {
            objects.remove(key);
        }
        Ok(Vec::new())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn get_metadata(&self, key: &str) -> Result<StorageMetadata> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| StorageError::not_found(key, PROVIDER).into())
    }

    async fn update_metadata(&self, key: &str, update: &MetadataUpdate) -> Result<()> {
        let mut objects = self.objects.write();
        let stored = objects
            .get_mut(key)
            .ok_or_else(|| StorageError::not_found(key, PROVIDER))?;
        stored.metadata.apply(update);
        stored.metadata.last_modified = Utc::now();
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        let prefix = options.prefix.as_deref().unwrap_or("");
        let start = match &options.page_token {
            Some(token) if token.as_str() >= prefix => Bound::Excluded(token.clone()),
            _ => Bound::Included(prefix.to_string()),
        };

        let objects = self.objects.read();
        let entries = objects
            .range::<String, _>((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| self.to_object(key, &stored.metadata, stored.public));

        Ok(paginate(entries, options))
    }

    fn get_public_url(&self, key: &str) -> String {
        join_url(&self.public_url_base, key)
    }

    async fn get_signed_url(&self, key: &str, options: &SignedUrlOptions) -> Result<String> {
        validate_key(key)?;
        let expires_in = ChronoDuration::from_std(options.expires_in)
            .map_err(|e| StorageError::backend(PROVIDER, format!("Invalid expiry: {}", e)))?;
        let expires_at = (Utc::now() + expires_in).timestamp();

        Ok(format!(
            "{}?X-Method={}&X-Expires={}",
            self.get_public_url(key),
            options.method.as_str(),
            expires_at
        ))
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<StorageObject> {
        validate_key(dest)?;
        let mut objects = self.objects.write();
        let source = objects
            .get(src)
            .ok_or_else(|| StorageError::not_found(src, PROVIDER))?;

        let data = source.data.clone();
        let public = source.public;
        let mut metadata = source.metadata.clone();
        self.check_capacity(&objects, dest, data.len() as u64)?;

        metadata.etag = Some(self.next_etag());
        metadata.last_modified = Utc::now();
        let object = self.to_object(dest, &metadata, public);
        objects.insert(
            dest.to_string(),
            StoredObject {
                data,
                metadata,
                public,
            },
        );
        Ok(object)
    }

    async fn move_object(&self, src: &str, dest: &str) -> Result<StorageObject> {
        validate_key(dest)?;
        let mut objects = self.objects.write();
        let mut stored = objects
            .remove(src)
            .ok_or_else(|| StorageError::not_found(src, PROVIDER))?;

        stored.metadata.last_modified = Utc::now();
        let object = self.to_object(dest, &stored.metadata, stored.public);
        objects.insert(dest.to_string(), stored);
        Ok(object)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn supports_multipart(&self) -> bool {
        true
    }

    async fn create_multipart_upload(&self, key: &str, options: &UploadOptions) -> Result<String> {
        validate_key(key)?;
        let upload_id = format!(
            "mpu-{:08}",
            self.version.fetch_add(1, Ordering::Relaxed) + 1
        );

        self.uploads.lock().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                options: UploadOptions {
                    on_progress: None,
                    ..options.clone()
                },
                parts: BTreeMap::new(),
            },
        );
        debug!("Memory multipart upload started: {} -> {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(&self, upload_id: &str, part_number: u32, data: Bytes) -> Result<PartInfo> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id, PROVIDER))?;

        let size = data.len() as u64;
        upload.parts.insert(part_number, data);
        Ok(PartInfo {
            part_number,
            etag: Some(format!("\"{}-{}\"", upload_id, part_number)),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        parts: &[PartInfo],
    ) -> Result<StorageObject> {
        // The upload stays pending until the object is stored, so a rejected
        // completion can be retried or aborted
        let (key, data, options) = {
            let uploads = self.uploads.lock();
            let upload = uploads
                .get(upload_id)
                .ok_or_else(|| StorageError::not_found(upload_id, PROVIDER))?;

            let total: usize = upload.parts.values().map(Bytes::len).sum();
            let mut buffer = BytesMut::with_capacity(total);
            for part in parts {
                let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                    StorageError::backend(
                        PROVIDER,
                        format!("Part {} was never uploaded", part.part_number),
                    )
                    .with_code("InvalidPart")
                })?;
                buffer.extend_from_slice(data);
            }
            (upload.key.clone(), buffer.freeze(), upload.options.clone())
        };

        let object = self.store(&key, data, &options)?;
        self.uploads.lock().remove(upload_id);
        Ok(object)
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        self.uploads.lock().remove(upload_id);
        Ok(())
    }
}
