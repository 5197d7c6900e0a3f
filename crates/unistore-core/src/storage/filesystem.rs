//! Filesystem storage backend implementation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use super::types::{
    guess_mime_type, ByteRange, ListOptions, ListResult, SignedUrlOptions, StorageMetadata,
    StorageObject, UploadOptions,
};
use super::{join_url, paginate, validate_key, StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::Result;

const PROVIDER: &str = "filesystem";
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem-based storage backend.
///
/// Objects are plain files below `base_path`; only size, modification time
/// and a content type guessed from the extension survive a round trip.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_path: PathBuf,
    public_url_base: String,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base path
    pub fn new(base_path: PathBuf) -> Self {
        let public_url_base = url::Url::from_directory_path(&base_path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", base_path.display()));
        Self {
            base_path,
            public_url_base,
        }
    }

    /// Build from configuration: `root` option, else `bucket_name`
    pub fn from_config(config: &StorageConfig) -> Self {
        let root = config.option("root").unwrap_or(&config.bucket_name);
        let backend = Self::new(PathBuf::from(root));
        match config.option("public_url_base") {
            Some(base) => backend.with_public_url_base(base),
            None => backend,
        }
    }

    pub fn with_public_url_base(mut self, base: impl Into<String>) -> Self {
        self.public_url_base = base.into();
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a storage key to a filesystem path
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let normalized = key.trim_start_matches('/');
        let relative = Path::new(normalized);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(
                StorageError::InvalidKey(format!("'{}' escapes the storage root", key)).into(),
            );
        }
        Ok(self.base_path.join(relative))
    }

    /// Convert a filesystem path to a storage key
    fn path_to_key(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.base_path).ok().map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
    }

    fn io_error(&self, key: &str, action: &str, path: &Path, e: std::io::Error) -> StorageError {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::not_found(key, PROVIDER),
            std::io::ErrorKind::PermissionDenied => StorageError::access_denied(key, PROVIDER),
            _ => StorageError::backend_with_source(
                PROVIDER,
                format!("Failed to {} {}", action, path.display()),
                e,
            ),
        }
    }

    async fn stat(&self, key: &str) -> Result<StorageMetadata> {
        let path = self.key_to_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(key, "stat", &path, e))?;
        if !metadata.is_file() {
            return Err(StorageError::not_found(key, PROVIDER).into());
        }

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut result = StorageMetadata::new(metadata.len(), last_modified);
        result.mime_type = guess_mime_type(key).to_string();
        Ok(result)
    }

    fn to_object(&self, key: &str, metadata: StorageMetadata) -> StorageObject {
        StorageObject::new(key, metadata.size, metadata.last_modified)
            .with_metadata(metadata)
            .with_url(self.get_public_url(key))
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::backend_with_source(
                    PROVIDER,
                    format!("Failed to create directories for {}", path.display()),
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Every file below `dir`, as keys
    async fn walk(&self, dir: PathBuf) -> Result<Vec<String>> {
        let mut results = Vec::new();
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(results);
        }

        let mut stack = vec![dir];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                StorageError::backend_with_source(
                    PROVIDER,
                    format!("Failed to read directory {}", dir.display()),
                    e,
                )
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                StorageError::backend_with_source(PROVIDER, "Failed to read directory entry", e)
            })? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| {
                    StorageError::backend_with_source(
                        PROVIDER,
                        format!("Failed to stat {}", path.display()),
                        e,
                    )
                })?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Some(key) = self.path_to_key(&path) {
                    results.push(key);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
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
        let path = self.key_to_path(key)?;
        self.ensure_parent(&path).await?;
        debug!("Filesystem PUT: {} ({} bytes)", path.display(), data.len());

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| self.io_error(key, "create file", &path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| self.io_error(key, "write to file", &path, e))?;
        file.flush()
            .await
            .map_err(|e| self.io_error(key, "flush file", &path, e))?;

        let mut metadata = self.stat(key).await?;
        metadata.mime_type = options.resolved_mime_type(key);
        Ok(self.to_object(key, metadata))
    }

    async fn download(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let path = self.key_to_path(key)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| self.io_error(key, "open file", &path, e))?;

        let mut data = Vec::new();
        match range {
            None => {
                file.read_to_end(&mut data)
                    .await
                    .map_err(|e| self.io_error(key, "read file", &path, e))?;
            }
            Some(range) => {
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| self.io_error(key, "stat", &path, e))?
                    .len();
                let slice = range.to_slice_range(len);
                file.seek(SeekFrom::Start(slice.start as u64))
                    .await
                    .map_err(|e| self.io_error(key, "seek in", &path, e))?;
                file.take((slice.end - slice.start) as u64)
                    .read_to_end(&mut data)
                    .await
                    .map_err(|e| self.io_error(key, "read file", &path, e))?;
            }
        }

        Ok(Bytes::from(data))
    }

    async fn download_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let data = self.download(key, range).await?;
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + READ_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_to_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| self.io_error(key, "delete file", &path, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn get_metadata(&self, key: &str) -> Result<StorageMetadata> {
        self.stat(key).await
    }

    async fn list(&self, options: &ListOptions) -> Result<ListResult> {
        let prefix = options.prefix.as_deref().unwrap_or("");
        // Walk only the deepest directory the prefix names
        let dir = match prefix.rfind('/') {
            Some(idx) => self.key_to_path(&prefix[..idx])?,
            None => self.base_path.clone(),
        };

        let keys = self.walk(dir).await?;
        let mut objects = Vec::new();
        for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
            match self.stat(&key).await {
                Ok(metadata) => objects.push(self.to_object(&key, metadata)),
                // Removed between the walk and the stat
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(paginate(objects, options))
    }

    fn get_public_url(&self, key: &str) -> String {
        join_url(&self.public_url_base, key)
    }

    async fn get_signed_url(&self, _key: &str, _options: &SignedUrlOptions) -> Result<String> {
        Err(StorageError::not_supported("get_signed_url", PROVIDER).into())
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<StorageObject> {
        validate_key(dest)?;
        let src_path = self.key_to_path(src)?;
        let dest_path = self.key_to_path(dest)?;
        self.ensure_parent(&dest_path).await?;

        fs::copy(&src_path, &dest_path)
            .await
            .map_err(|e| self.io_error(src, "copy", &src_path, e))?;

        let metadata = self.stat(dest).await?;
        Ok(self.to_object(dest, metadata))
    }

    async fn move_object(&self, src: &str, dest: &str) -> Result<StorageObject> {
        validate_key(dest)?;
        let src_path = self.key_to_path(src)?;
        let dest_path = self.key_to_path(dest)?;
        self.ensure_parent(&dest_path).await?;

        fs::rename(&src_path, &dest_path)
            .await
            .map_err(|e| self.io_error(src, "rename", &src_path, e))?;

        let metadata = self.stat(dest).await?;
        Ok(self.to_object(dest, metadata))
    }

    async fn health_check(&self) -> Result<bool> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            StorageError::backend_with_source(
                PROVIDER,
                format!("Storage root {} is not usable", self.base_path.display()),
                e,
            )
        })?;
        Ok(true)
    }
}
