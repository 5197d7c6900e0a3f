//! S3, GCS and Azure storage backend using object_store.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, GetRange, GetResult, MultipartUpload,
    ObjectMeta, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{
    ByteRange, ListOptions, ListResult, MetadataUpdate, PartInfo, SignedUrlOptions,
    StorageMetadata, StorageObject, UploadOptions, DEFAULT_MIME_TYPE,
};
use super::{
    common_prefix, join_url, paginate, validate_key, ProviderKind, StorageBackend, StorageConfig,
};
use crate::error::StorageError;
use crate::{Error, Result};

struct PendingMultipart {
    key: String,
    upload: Box<dyn MultipartUpload>,
    parts: Vec<PartInfo>,
}

/// Cloud object storage backend.
///
/// One adapter serves S3 (and S3-compatible stores such as MinIO), Google
/// Cloud Storage and Azure Blob Storage; the provider only changes how the
/// `object_store` client is built and what the default public URL looks like.
pub struct ObjectStoreBackend {
    provider: ProviderKind,
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    prefix: Option<String>,
    public_url_base: String,
    uploads: Mutex<HashMap<String, PendingMultipart>>,
    upload_seq: AtomicU64,
}

impl ObjectStoreBackend {
    /// Create an S3 backend
    pub fn s3(config: &StorageConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket_name);
        let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        builder = builder.with_region(&region);

        if let Some(endpoint) = config.option("endpoint") {
            // Path-style addressing for custom endpoints
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if let Some(access_key) = config.credential("access_key_id") {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = config.credential("secret_access_key") {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(token) = config.credential("session_token") {
            builder = builder.with_token(token);
        }
        if config.flag("allow_http") {
            builder = builder.with_allow_http(true);
        }

        let store = Arc::new(builder.build().map_err(|e| {
            Error::Initialization(format!("Failed to create S3 client: {}", e))
        })?);

        let default_base = match config.option("endpoint") {
            Some(endpoint) => format!(
                "{}/{}",
                endpoint.trim_end_matches('/'),
                config.bucket_name
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                config.bucket_name, region
            ),
        };

        Ok(Self::from_parts(
            ProviderKind::S3,
            store.clone(),
            Some(store as Arc<dyn Signer>),
            config,
            default_base,
        ))
    }

    /// Create a Google Cloud Storage backend
    pub fn gcs(config: &StorageConfig) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(&config.bucket_name);

        if let Some(path) = config.credential("service_account_path") {
            builder = builder.with_service_account_path(path);
        }

        let store = Arc::new(builder.build().map_err(|e| {
            Error::Initialization(format!("Failed to create GCS client: {}", e))
        })?);

        let default_base = format!("https://storage.googleapis.com/{}", config.bucket_name);
        Ok(Self::from_parts(
            ProviderKind::Gcs,
            store.clone(),
            Some(store as Arc<dyn Signer>),
            config,
            default_base,
        ))
    }

    /// Create an Azure Blob Storage backend
    pub fn azure(config: &StorageConfig) -> Result<Self> {
        let account_name = config.credential("account_name").ok_or_else(|| {
            Error::Config("Azure provider requires the account_name credential".to_string())
        })?;

        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(account_name)
            .with_container_name(&config.bucket_name);

        if let Some(endpoint) = config.option("endpoint") {
            builder = builder.with_endpoint(endpoint.to_string());
        }

        if let Some(sas_token) = config.credential("sas_token") {
            let pairs: Vec<(String, String)> = sas_token
                .trim_start_matches('?')
                .split('&')
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            builder = builder.with_sas_authorization(pairs);
        } else if let Some(account_key) = config.credential("account_key") {
            builder = builder.with_access_key(account_key);
        }

        let store = Arc::new(builder.build().map_err(|e| {
            Error::Initialization(format!("Failed to create Azure client: {}", e))
        })?);

        let default_base = match config.option("endpoint") {
            Some(endpoint) => format!(
                "{}/{}",
                endpoint.trim_end_matches('/'),
                config.bucket_name
            ),
            None => format!(
                "https://{}.blob.core.windows.net/{}",
                account_name, config.bucket_name
            ),
        };

        Ok(Self::from_parts(
            ProviderKind::Azure,
            store.clone(),
            Some(store as Arc<dyn Signer>),
            config,
            default_base,
        ))
    }

    /// Wrap an existing `object_store` client.
    ///
    /// Without a signer, `get_signed_url` returns `OperationNotSupported`.
    pub fn with_store(
        provider: ProviderKind,
        store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        public_url_base: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            signer,
            prefix: None,
            public_url_base: public_url_base.into(),
            uploads: Mutex::new(HashMap::new()),
            upload_seq: AtomicU64::new(0),
        }
    }

    /// Scope every key below `prefix`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    fn from_parts(
        provider: ProviderKind,
        store: Arc<dyn ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        config: &StorageConfig,
        default_public_url_base: String,
    ) -> Self {
        info!(
            "Created {} backend for bucket: {}, prefix: {:?}",
            provider,
            config.bucket_name,
            config.prefix()
        );

        let public_url_base = config
            .option("public_url_base")
            .map(str::to_string)
            .unwrap_or(default_public_url_base);

        let backend = Self::with_store(provider, store, signer, public_url_base);
        match config.prefix() {
            Some(prefix) => backend.with_prefix(prefix),
            None => backend,
        }
    }

    /// Build the full path for a key
    fn full_path(&self, key: &str) -> Path {
        let key = key.trim_start_matches('/');
        match &self.prefix {
            Some(prefix) => Path::from(format!("{}/{}", prefix, key)),
            None => Path::from(key),
        }
    }

    /// Strip prefix from a path to get the key
    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        match &self.prefix {
            Some(prefix) => path
                .strip_prefix(prefix.as_str())
                .map(|p| p.trim_start_matches('/'))
                .unwrap_or(path),
            None => path,
        }
    }

    fn map_error(&self, key: &str, operation: &str, err: object_store::Error) -> Error {
        let provider = self.provider.as_str();
        let mapped = match err {
            object_store::Error::NotFound { .. } => StorageError::not_found(key, provider),
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => {
                StorageError::access_denied(key, provider)
            }
            object_store::Error::NotImplemented => {
                StorageError::not_supported("native operation", provider)
            }
            other => StorageError::backend_with_source(
                provider,
                format!("{} {} failed", operation, key),
                other,
            ),
        };
        mapped.into()
    }

    fn to_object(&self, meta: &ObjectMeta, metadata: Option<StorageMetadata>) -> StorageObject {
        let key = self.strip_prefix(meta.location.as_ref()).to_string();
        let url = self.get_public_url(&key);
        let object = StorageObject::new(key, meta.size as u64, meta.last_modified)
            .with_etag(meta.e_tag.clone())
            .with_url(url);
        match metadata {
            Some(metadata) => object.with_metadata(metadata),
            None => object,
        }
    }

    fn metadata_from(meta: &ObjectMeta, attributes: &Attributes) -> StorageMetadata {
        let mut metadata = StorageMetadata::new(meta.size as u64, meta.last_modified);
        metadata.etag = meta.e_tag.clone();
        metadata.mime_type = DEFAULT_MIME_TYPE.to_string();

        for (attribute, value) in attributes.iter() {
            let value = value.to_string();
            match attribute {
                Attribute::ContentType => metadata.mime_type = value,
                Attribute::CacheControl => metadata.cache_control = Some(value),
                Attribute::ContentEncoding => metadata.content_encoding = Some(value),
                Attribute::Metadata(name) => {
                    metadata.custom_metadata.insert(name.to_string(), value);
                }
                _ => {}
            }
        }
        metadata
    }

    fn attributes_from(metadata: &StorageMetadata) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(metadata.mime_type.clone()),
        );
        if let Some(cache_control) = &metadata.cache_control {
            attributes.insert(
                Attribute::CacheControl,
                AttributeValue::from(cache_control.clone()),
            );
        }
        if let Some(encoding) = &metadata.content_encoding {
            attributes.insert(
                Attribute::ContentEncoding,
                AttributeValue::from(encoding.clone()),
            );
        }
        for (name, value) in &metadata.custom_metadata {
            attributes.insert(
                Attribute::Metadata(name.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }
        attributes
    }

    async fn get(&self, key: &str, options: GetOptions) -> Result<GetResult> {
        let path = self.full_path(key);
        self.store
            .get_opts(&path, options)
            .await
            .map_err(|e| self.map_error(key, "GET", e))
    }

    fn get_range(range: Option<ByteRange>) -> Option<GetRange> {
        range.map(|r| match r.end {
            Some(end) => GetRange::Bounded(r.start as usize..end.saturating_add(1) as usize),
            None => GetRange::Offset(r.start as usize),
        })
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn provider(&self) -> &str {
        self.provider.as_str()
    }

    async fn upload(
        &self,
        key: &str,
        data: Bytes,
        options: &UploadOptions,
    ) -> Result<StorageObject> {
        validate_key(key)?;
        let path = self.full_path(key);
        let size = data.len() as u64;
        debug!("{} PUT: {} ({} bytes)", self.provider, path, size);

        let metadata = options.to_metadata(key, size, chrono::Utc::now());
        let put_options = PutOptions {
            attributes: Self::attributes_from(&metadata),
            ..Default::default()
        };

        let result = self
            .store
            .put_opts(&path, PutPayload::from_bytes(data), put_options)
            .await
            .map_err(|e| self.map_error(key, "PUT", e))?;

        let mut metadata = metadata;
        metadata.etag = result.e_tag.clone();

        let url = self.get_public_url(key);
        let object = StorageObject::new(key, size, metadata.last_modified)
            .with_etag(result.e_tag)
            .with_metadata(metadata)
            .with_url(url.clone());
        Ok(if options.public {
            object.with_public_url(url)
        } else {
            object
        })
    }

    async fn download(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes> {
        debug!("{} GET: {}", self.provider, key);
        let options = GetOptions {
            range: Self::get_range(range),
            ..Default::default()
        };
        let result = self.get(key, options).await?;
        result
            .bytes()
            .await
            .map_err(|e| self.map_error(key, "read body of", e))
    }

    async fn download_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let options = GetOptions {
            range: Self::get_range(range),
            ..Default::default()
        };
        let result = self.get(key, options).await?;

        let provider = self.provider.as_str();
        let key = key.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| {
                Error::from(StorageError::backend_with_source(
                    provider,
                    format!("Stream of {} failed", key),
                    e,
                ))
            })
            .boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.full_path(key);
        debug!("{} DELETE: {}", self.provider, path);
        self.store
            .delete(&path)
            .await
            .map_err(|e| self.map_error(key, "DELETE", e))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let locations: Vec<object_store::Result<Path>> =
            keys.iter().map(|k| Ok(self.full_path(k))).collect();

        let results: Vec<object_store::Result<Path>> = self
            .store
            .delete_stream(stream::iter(locations).boxed())
            .collect()
            .await;

        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
                Err(object_store::Error::PermissionDenied { path, .. })
                | Err(object_store::Error::Unauthenticated { path, .. }) => {
                    failed.push(self.strip_prefix(&path).to_string());
                }
                Err(e) => return Err(self.map_error("", "batch DELETE", e)),
            }
        }
        Ok(failed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.full_path(key);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.map_error(key, "HEAD", e)),
        }
    }

    async fn get_metadata(&self, key: &str) -> Result<StorageMetadata> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self.get(key, options).await?;
        Ok(Self::metadata_from(&result.meta, &result.attributes))
    }

    async fn update_metadata(&self, key: &str, update: &MetadataUpdate) -> Result<()> {
        // Object stores keep attributes immutable; rewrite the object
        let result = self.get(key, GetOptions::default()).await?;
        let mut metadata = Self::metadata_from(&result.meta, &result.attributes);
        let data = result
            .bytes()
            .await
            .map_err(|e| self.map_error(key, "read body of", e))?;
        metadata.apply(update);

        let put_options = PutOptions {
            attributes: Self::attributes_from(&metadata),
            ..Default::default()
        };
        self.store
            .put_opts(&self.full_path(key), PutPayload::from_bytes(data), put_options)
            .await
            .map_err(|e| self.map_error(key, "PUT", e))?;
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        let prefix = options.prefix.as_deref().unwrap_or("");
        // object_store lists whole path segments; walk the deepest
        // directory the prefix names and filter the rest by string
        let dir = match (prefix.rfind('/'), &self.prefix) {
            (Some(idx), _) => Some(self.full_path(&prefix[..idx])),
            (None, Some(root)) => Some(Path::from(root.as_str())),
            (None, None) => None,
        };
        // One entry past the page shows truncation; with a delimiter an
        // entry is a whole folded prefix
        let max_entries = options
            .max_results
            .unwrap_or(super::DEFAULT_PAGE_SIZE)
            .max(1)
            .saturating_add(1);
        let delimiter = options.delimiter.as_deref();
        debug!("{} LIST: {:?} (prefix {})", self.provider, dir, prefix);

        let mut listing = match &options.page_token {
            Some(token) => self
                .store
                .list_with_offset(dir.as_ref(), &self.full_path(token)),
            None => self.store.list(dir.as_ref()),
        };

        let mut objects = Vec::new();
        let mut entries = 0usize;
        let mut last_entry: Option<String> = None;
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| self.map_error(prefix, "LIST", e))?;
            let object = self.to_object(&meta, None);
            if !object.key.starts_with(prefix) {
                continue;
            }

            let entry = common_prefix(&object.key, prefix, delimiter).unwrap_or(&object.key);
            if last_entry.as_deref() != Some(entry) {
                if entries == max_entries {
                    break;
                }
                entries += 1;
                last_entry = Some(entry.to_string());
            }
            objects.push(object);
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(paginate(objects, options))
    }

    fn get_public_url(&self, key: &str) -> String {
        join_url(&self.public_url_base, self.full_path(key).as_ref())
    }

    async fn get_signed_url(&self, key: &str, options: &SignedUrlOptions) -> Result<String> {
        validate_key(key)?;
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::not_supported("get_signed_url", self.provider.as_str())
        })?;

        let url = signer
            .signed_url(
                options.method.to_http(),
                &self.full_path(key),
                options.expires_in,
            )
            .await
            .map_err(|e| self.map_error(key, "SIGN", e))?;
        Ok(url.to_string())
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<StorageObject> {
        validate_key(dest)?;
        let dest_path = self.full_path(dest);
        debug!("{} COPY: {} -> {}", self.provider, src, dest_path);

        self.store
            .copy(&self.full_path(src), &dest_path)
            .await
            .map_err(|e| self.map_error(src, "COPY", e))?;

        let meta = self
            .store
            .head(&dest_path)
            .await
            .map_err(|e| self.map_error(dest, "HEAD", e))?;
        Ok(self.to_object(&meta, None))
    }

    async fn health_check(&self) -> Result<bool> {
        let root = self.prefix.as_deref().map(Path::from);
        self.store
            .list_with_delimiter(root.as_ref())
            .await
            .map_err(|e| self.map_error("", "LIST", e))?;
        Ok(true)
    }

    fn supports_multipart(&self) -> bool {
        true
    }

    async fn create_multipart_upload(&self, key: &str, options: &UploadOptions) -> Result<String> {
        validate_key(key)?;
        let metadata = options.to_metadata(key, 0, chrono::Utc::now());
        let opts = PutMultipartOpts {
            attributes: Self::attributes_from(&metadata),
            ..Default::default()
        };

        let upload = self
            .store
            .put_multipart_opts(&self.full_path(key), opts)
            .await
            .map_err(|e| self.map_error(key, "CREATE MULTIPART", e))?;

        let upload_id = format!(
            "{}-{:08}",
            self.provider,
            self.upload_seq.fetch_add(1, Ordering::Relaxed) + 1
        );
        self.uploads.lock().insert(
            upload_id.clone(),
            PendingMultipart {
                key: key.to_string(),
                upload,
                parts: Vec::new(),
            },
        );
        debug!("{} multipart upload {} started for {}", self.provider, upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(&self, upload_id: &str, part_number: u32, data: Bytes) -> Result<PartInfo> {
        let size = data.len() as u64;
        let (key, pending_part) = {
            let mut uploads = self.uploads.lock();
            let pending = uploads
                .get_mut(upload_id)
                .ok_or_else(|| StorageError::not_found(upload_id, self.provider.as_str()))?;

            let expected = pending.parts.len() as u32 + 1;
            if part_number != expected {
                return Err(StorageError::backend(
                    self.provider.as_str(),
                    format!(
                        "Part {} of upload {} is out of order, expected part {}",
                        part_number, upload_id, expected
                    ),
                )
                .with_code("InvalidPartOrder")
                .into());
            }

            pending.parts.push(PartInfo {
                part_number,
                etag: None,
                size,
            });
            (
                pending.key.clone(),
                pending.upload.put_part(PutPayload::from_bytes(data)),
            )
        };

        if let Err(e) = pending_part.await {
            if let Some(pending) = self.uploads.lock().get_mut(upload_id) {
                pending.parts.pop();
            }
            return Err(self.map_error(&key, "UPLOAD PART", e));
        }

        Ok(PartInfo {
            part_number,
            etag: None,
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        parts: &[PartInfo],
    ) -> Result<StorageObject> {
        let mut pending = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| StorageError::not_found(upload_id, self.provider.as_str()))?;

        if parts.len() != pending.parts.len() {
            let _ = pending.upload.abort().await;
            return Err(StorageError::backend(
                self.provider.as_str(),
                format!(
                    "Upload {} received {} parts but completion lists {}",
                    upload_id,
                    pending.parts.len(),
                    parts.len()
                ),
            )
            .with_code("InvalidPart")
            .into());
        }

        let result = pending
            .upload
            .complete()
            .await
            .map_err(|e| self.map_error(&pending.key, "COMPLETE MULTIPART", e))?;

        let size = pending.parts.iter().map(|p| p.size).sum();
        let url = self.get_public_url(&pending.key);
        Ok(StorageObject::new(pending.key, size, chrono::Utc::now())
            .with_etag(result.e_tag)
            .with_url(url))
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<()> {
        let pending = self.uploads.lock().remove(upload_id);
        match pending {
            Some(mut pending) => pending
                .upload
                .abort()
                .await
                .map_err(|e| self.map_error(&pending.key, "ABORT MULTIPART", e)),
            None => Ok(()),
        }
    }
}
