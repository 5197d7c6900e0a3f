//! Value types exchanged across the backend contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Mime type reported when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Result of a completed storage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Backend-unique identifier
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// ETag or content hash (if available)
    #[serde(default)]
    pub etag: Option<String>,
    /// Descriptive attributes, when the backend returned them
    #[serde(default)]
    pub metadata: Option<StorageMetadata>,
    /// Backend-native address of the object
    #[serde(default)]
    pub url: Option<String>,
    /// Public address, set when the object was uploaded with a public ACL
    #[serde(default)]
    pub public_url: Option<String>,
}

impl StorageObject {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            etag: None,
            metadata: None,
            url: None,
            public_url: None,
        }
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_metadata(mut self, metadata: StorageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }
}

/// Descriptive attributes of a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMetadata {
    pub size: u64,
    pub mime_type: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub custom_metadata: HashMap<String, String>,
}

impl StorageMetadata {
    /// Metadata with only size and timestamp known.
    pub fn new(size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            size,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            last_modified,
            etag: None,
            cache_control: None,
            content_encoding: None,
            custom_metadata: HashMap::new(),
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &MetadataUpdate) {
        if let Some(mime_type) = &update.mime_type {
            self.mime_type = mime_type.clone();
        }
        if let Some(cache_control) = &update.cache_control {
            self.cache_control = Some(cache_control.clone());
        }
        if let Some(content_encoding) = &update.content_encoding {
            self.content_encoding = Some(content_encoding.clone());
        }
        for (k, v) in &update.custom_metadata {
            self.custom_metadata.insert(k.clone(), v.clone());
        }
    }
}

/// Partial metadata update; `None` fields are left untouched and custom
/// entries are merged into the existing map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub cache_control: Option<String>,
    #[serde(default)]
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub custom_metadata: HashMap<String, String>,
}

/// Callback receiving upload progress as a 0-100 percentage.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Options accepted by uploads.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Content type; guessed from the key when absent
    pub mime_type: Option<String>,
    /// Request a publicly readable object
    pub public: bool,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub custom_metadata: HashMap<String, String>,
    /// Invoked with the completed percentage
    pub on_progress: Option<ProgressCallback>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_metadata.insert(key.into(), value.into());
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Resolve the content type, falling back to the key's extension.
    pub fn resolved_mime_type(&self, key: &str) -> String {
        self.mime_type
            .clone()
            .unwrap_or_else(|| guess_mime_type(key).to_string())
    }

    /// Report progress, clamped to 100.
    pub fn report_progress(&self, percent: u8) {
        if let Some(callback) = &self.on_progress {
            callback(percent.min(100));
        }
    }

    /// Build the metadata an object uploaded with these options will carry.
    pub fn to_metadata(&self, key: &str, size: u64, last_modified: DateTime<Utc>) -> StorageMetadata {
        StorageMetadata {
            size,
            mime_type: self.resolved_mime_type(key),
            last_modified,
            etag: None,
            cache_control: self.cache_control.clone(),
            content_encoding: self.content_encoding.clone(),
            custom_metadata: self.custom_metadata.clone(),
        }
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("mime_type", &self.mime_type)
            .field("public", &self.public)
            .field("cache_control", &self.cache_control)
            .field("content_encoding", &self.content_encoding)
            .field("custom_metadata", &self.custom_metadata)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl From<&StorageMetadata> for UploadOptions {
    fn from(metadata: &StorageMetadata) -> Self {
        Self {
            mime_type: Some(metadata.mime_type.clone()),
            public: false,
            cache_control: metadata.cache_control.clone(),
            content_encoding: metadata.content_encoding.clone(),
            custom_metadata: metadata.custom_metadata.clone(),
            on_progress: None,
        }
    }
}

/// Byte range `[start, end]`, inclusive on both ends; an open end reads to
/// the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Resolve against an object of `len` bytes into a half-open
    /// `start..end` slice range, clamped to the object.
    pub fn to_slice_range(&self, len: u64) -> std::ops::Range<usize> {
        let start = self.start.min(len);
        let end = match self.end {
            Some(end) => end.saturating_add(1).min(len),
            None => len,
        };
        start as usize..end.max(start) as usize
    }
}

/// Options accepted by listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub prefix: Option<String>,
    /// Group keys sharing the segment up to this delimiter into `prefixes`
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Opaque continuation token from a previous page
    #[serde(default)]
    pub page_token: Option<String>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub objects: Vec<StorageObject>,
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
    pub is_truncated: bool,
}

/// HTTP verb a signed URL is valid for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignedUrlMethod {
    #[default]
    Get,
    Put,
    Delete,
    Head,
}

impl SignedUrlMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedUrlMethod::Get => "GET",
            SignedUrlMethod::Put => "PUT",
            SignedUrlMethod::Delete => "DELETE",
            SignedUrlMethod::Head => "HEAD",
        }
    }

    pub fn to_http(self) -> http::Method {
        match self {
            SignedUrlMethod::Get => http::Method::GET,
            SignedUrlMethod::Put => http::Method::PUT,
            SignedUrlMethod::Delete => http::Method::DELETE,
            SignedUrlMethod::Head => http::Method::HEAD,
        }
    }
}

/// Options for pre-authorized URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedUrlOptions {
    pub expires_in: Duration,
    pub method: SignedUrlMethod,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: Duration::from_secs(3600),
            method: SignedUrlMethod::Get,
        }
    }
}

impl SignedUrlOptions {
    pub fn new(expires_in: Duration, method: SignedUrlMethod) -> Self {
        Self { expires_in, method }
    }
}

/// Receipt for one uploaded multipart chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: Option<String>,
    pub size: u64,
}

/// Guess a content type from the extension of `key`.
pub fn guess_mime_type(key: &str) -> &'static str {
    let ext = match key.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => ext.to_ascii_lowercase(),
        _ => return DEFAULT_MIME_TYPE,
    };

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "parquet" => "application/vnd.apache.parquet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    }
}
