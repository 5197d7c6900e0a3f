//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use super::types::{
    ByteRange, ListOptions, ListResult, MetadataUpdate, PartInfo, SignedUrlOptions,
    StorageMetadata, StorageObject, UploadOptions,
};
use crate::error::StorageError;
use crate::Result;

/// Trait every storage backend implements.
///
/// Implementations translate their native failures into
/// [`StorageError`](crate::error::StorageError) before returning. The
/// optional capabilities (batch delete, metadata updates, multipart uploads)
/// default to `OperationNotSupported`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short provider label used in errors and logs (e.g. "s3", "memory")
    fn provider(&self) -> &str;

    /// Write an object, replacing any existing one under the same key
    async fn upload(&self, key: &str, data: Bytes, options: &UploadOptions)
        -> Result<StorageObject>;

    /// Read an object, or a byte range of it
    async fn download(&self, key: &str, range: Option<ByteRange>) -> Result<Bytes>;

    /// Read an object as a stream of chunks
    async fn download_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let data = self.download(key, range).await?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }

    /// Delete an object. May return `NotFound` for missing keys.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete several objects in one request, returning the keys that failed
    async fn delete_many(&self, _keys: &[String]) -> Result<Vec<String>> {
        Err(StorageError::not_supported("delete_many", self.provider()).into())
    }

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get object metadata
    async fn get_metadata(&self, key: &str) -> Result<StorageMetadata>;

    /// Merge a partial metadata update into an existing object
    async fn update_metadata(&self, _key: &str, _update: &MetadataUpdate) -> Result<()> {
        Err(StorageError::not_supported("update_metadata", self.provider()).into())
    }

    /// List one page of objects
    async fn list(&self, options: &ListOptions) -> Result<ListResult>;

    /// List every object under a prefix, following continuation tokens
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<StorageObject>> {
        let mut options = ListOptions::with_prefix(prefix);
        let mut objects = Vec::new();

        loop {
            let page = self.list(&options).await?;
            objects.extend(page.objects);

            match page.next_page_token {
                Some(token) if page.is_truncated => options.page_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    /// Deterministic public address of an object; no network call
    fn get_public_url(&self, key: &str) -> String;

    /// Time-limited, pre-authorized address of an object
    async fn get_signed_url(&self, key: &str, options: &SignedUrlOptions) -> Result<String>;

    /// Copy an object within this backend
    async fn copy(&self, src: &str, dest: &str) -> Result<StorageObject>;

    /// Move an object within this backend.
    ///
    /// The default is copy followed by delete and is not atomic: a failure
    /// between the two steps leaves both objects in place.
    async fn move_object(&self, src: &str, dest: &str) -> Result<StorageObject> {
        let object = self.copy(src, dest).await?;
        self.delete(src).await?;
        Ok(object)
    }

    /// Check that the backend is reachable
    async fn health_check(&self) -> Result<bool>;

    /// Whether the multipart methods are implemented
    fn supports_multipart(&self) -> bool {
        false
    }

    /// Start a multipart upload, returning its upload id
    async fn create_multipart_upload(&self, _key: &str, _options: &UploadOptions) -> Result<String> {
        Err(StorageError::not_supported("create_multipart_upload", self.provider()).into())
    }

    /// Upload one part; part numbers start at 1
    async fn upload_part(&self, _upload_id: &str, _part_number: u32, _data: Bytes) -> Result<PartInfo> {
        Err(StorageError::not_supported("upload_part", self.provider()).into())
    }

    /// Assemble the uploaded parts into the final object
    async fn complete_multipart_upload(
        &self,
        _upload_id: &str,
        _parts: &[PartInfo],
    ) -> Result<StorageObject> {
        Err(StorageError::not_supported("complete_multipart_upload", self.provider()).into())
    }

    /// Discard a multipart upload and its parts
    async fn abort_multipart_upload(&self, _upload_id: &str) -> Result<()> {
        Err(StorageError::not_supported("abort_multipart_upload", self.provider()).into())
    }
}
