//! Object operations through the manager.
//!
//! Tests for:
//! - Upload/download round trips and response shapes
//! - Idempotent and batch deletes
//! - Metadata caching and invalidation
//! - Copy, move and URL generation

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use unistore_core::{
    CacheConfig, DownloadOptions, Error, ListOptions, MetadataUpdate, MetricOperation,
    ResponseType, RetryConfig, SignedUrlMethod, SignedUrlOptions, StorageManager, UploadOptions,
};

use super::helpers::{flaky_manager, memory_manager, record_events, FlakyBackend};

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn test_readme_round_trip() {
    let manager = memory_manager();
    let events = record_events(&manager);

    let object = manager
        .upload(
            "docs/readme.txt",
            Bytes::from("hello world"),
            &UploadOptions::new().metadata("owner", "docs-team"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(object.key, "docs/readme.txt");
    assert_eq!(object.size, 11);

    assert!(manager.exists("docs/readme.txt", None).await.unwrap());

    let text = manager
        .download(
            "docs/readme.txt",
            &DownloadOptions::new().response_type(ResponseType::Text),
            None,
        )
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "hello world");

    let metadata = manager.get_metadata("docs/readme.txt", None).await.unwrap();
    assert_eq!(metadata.size, 11);
    assert_eq!(metadata.mime_type, "text/plain");
    assert_eq!(metadata.custom_metadata["owner"], "docs-team");

    let listed = manager.list_by_prefix("docs/", None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, "docs/readme.txt");

    let url = manager.get_public_url("docs/readme.txt", None).unwrap();
    assert!(url.ends_with("/docs/readme.txt"));

    manager.delete("docs/readme.txt", None).await.unwrap();
    assert!(!manager.exists("docs/readme.txt", None).await.unwrap());

    assert_eq!(
        *events.lock(),
        vec![
            "upload:primary:docs/readme.txt".to_string(),
            "download:primary:docs/readme.txt".to_string(),
            "delete:primary:docs/readme.txt".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let manager = memory_manager();
    let err = manager
        .download("nope.bin", &DownloadOptions::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = manager.get_metadata("nope.bin", None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_undecodable_text_download_records_failure() {
    let manager = memory_manager();
    let events = record_events(&manager);
    manager
        .upload(
            "binary.dat",
            Bytes::from_static(&[0xff, 0xfe]),
            &UploadOptions::new(),
            None,
        )
        .await
        .unwrap();

    let err = manager
        .download(
            "binary.dat",
            &DownloadOptions::new().response_type(ResponseType::Text),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));

    let downloads: Vec<_> = manager
        .get_metrics(Some("primary"), None)
        .into_iter()
        .filter(|m| m.operation == MetricOperation::Download)
        .collect();
    assert_eq!(downloads.len(), 1);
    assert!(!downloads[0].success);
    assert!(downloads[0].error.is_some());

    assert_eq!(*events.lock(), vec!["upload:primary:binary.dat".to_string()]);
}

#[tokio::test]
async fn test_list_pages_through_manager() {
    let manager = memory_manager();
    for i in 0..5 {
        manager
            .upload(
                &format!("logs/{}.log", i),
                Bytes::from("x"),
                &UploadOptions::new(),
                None,
            )
            .await
            .unwrap();
    }

    let first = manager
        .list(&ListOptions::with_prefix("logs/").max_results(3), None)
        .await
        .unwrap();
    assert_eq!(first.objects.len(), 3);
    let token = first.next_page_token.clone().unwrap();

    let second = manager
        .list(
            &ListOptions::with_prefix("logs/").max_results(3).page_token(token),
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.objects.len(), 2);
    assert!(second.next_page_token.is_none());
}

// ============================================================================
// Deletes
// ============================================================================

#[tokio::test]
async fn test_delete_is_idempotent() {
    let manager = memory_manager();
    manager
        .upload("a.txt", Bytes::from("a"), &UploadOptions::new(), None)
        .await
        .unwrap();

    manager.delete("a.txt", None).await.unwrap();
    manager.delete("a.txt", None).await.unwrap();
    manager.delete("never-existed.txt", None).await.unwrap();
    assert!(!manager.exists("a.txt", None).await.unwrap());
}

#[tokio::test]
async fn test_delete_many_falls_back_to_single_deletes() {
    let backend = Arc::new(FlakyBackend::new());
    backend.fail_always("delete_many");
    let manager = flaky_manager(backend.clone(), RetryConfig::no_retries());
    let events = record_events(&manager);

    let keys: Vec<String> = (0..4).map(|i| format!("batch/{}", i)).collect();
    for key in &keys {
        manager
            .upload(key, Bytes::from("x"), &UploadOptions::new(), None)
            .await
            .unwrap();
    }

    let failed = manager.delete_many(&keys, None).await.unwrap();
    assert!(failed.is_empty());
    assert_eq!(backend.calls("delete_many"), 1);
    assert_eq!(backend.calls("delete"), 4);
    assert!(manager.list_by_prefix("batch/", None).await.unwrap().is_empty());

    let deletes = events
        .lock()
        .iter()
        .filter(|e| e.starts_with("delete:"))
        .count();
    assert_eq!(deletes, 4);

    let delete_metrics: Vec<_> = manager
        .get_metrics(Some("flaky"), None)
        .into_iter()
        .filter(|m| m.operation == MetricOperation::Delete)
        .collect();
    assert_eq!(delete_metrics.len(), 1);
    assert!(delete_metrics[0].success);
}

#[tokio::test]
async fn test_delete_many_reports_failed_keys() {
    let backend = Arc::new(FlakyBackend::new());
    backend.fail_always("delete_many");
    backend.fail_always("delete");
    let manager = flaky_manager(backend, RetryConfig::no_retries());

    let keys = vec!["x".to_string(), "y".to_string()];
    let failed = manager.delete_many(&keys, None).await.unwrap();
    assert_eq!(failed, keys);
}

// ============================================================================
// Metadata cache
// ============================================================================

#[tokio::test]
async fn test_metadata_is_cached_until_ttl_expires() {
    let backend = Arc::new(FlakyBackend::new());
    let manager = StorageManager::builder()
        .backend("flaky", backend.clone())
        .retry(RetryConfig::no_retries())
        .cache(CacheConfig {
            ttl_secs: 1,
            ..CacheConfig::default()
        })
        .build()
        .unwrap();

    manager
        .upload("cached.txt", Bytes::from("abc"), &UploadOptions::new(), None)
        .await
        .unwrap();

    manager.get_metadata("cached.txt", None).await.unwrap();
    manager.get_metadata("cached.txt", None).await.unwrap();
    manager.get_metadata("cached.txt", None).await.unwrap();
    assert_eq!(backend.calls("get_metadata"), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    manager.get_metadata("cached.txt", None).await.unwrap();
    assert_eq!(backend.calls("get_metadata"), 2);

    // Cache hits still count as metadata operations
    let metadata_ops = manager
        .get_metrics(None, None)
        .into_iter()
        .filter(|m| m.operation == MetricOperation::Metadata)
        .count();
    assert_eq!(metadata_ops, 4);
}

#[tokio::test]
async fn test_cache_serves_stale_metadata_without_invalidation() {
    let manager = memory_manager();
    manager
        .upload("doc.txt", Bytes::from("v1"), &UploadOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(manager.get_metadata("doc.txt", None).await.unwrap().size, 2);

    manager
        .upload("doc.txt", Bytes::from("version-2"), &UploadOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(manager.get_metadata("doc.txt", None).await.unwrap().size, 2);

    manager.clear_cache();
    assert_eq!(manager.get_metadata("doc.txt", None).await.unwrap().size, 9);
}

#[tokio::test]
async fn test_invalidate_on_write_refreshes_metadata() {
    let manager = StorageManager::builder()
        .provider("primary", unistore_core::StorageConfig::memory("primary"))
        .retry(RetryConfig::no_retries())
        .cache(CacheConfig {
            invalidate_on_write: true,
            ..CacheConfig::default()
        })
        .build()
        .unwrap();

    manager
        .upload("doc.txt", Bytes::from("v1"), &UploadOptions::new(), None)
        .await
        .unwrap();
    manager.get_metadata("doc.txt", None).await.unwrap();

    let mut custom = HashMap::new();
    custom.insert("reviewed".to_string(), "yes".to_string());
    manager
        .update_metadata(
            "doc.txt",
            &MetadataUpdate {
                custom_metadata: custom,
                ..MetadataUpdate::default()
            },
            None,
        )
        .await
        .unwrap();

    let metadata = manager.get_metadata("doc.txt", None).await.unwrap();
    assert_eq!(metadata.custom_metadata["reviewed"], "yes");
}

// ============================================================================
// Copy, move, URLs
// ============================================================================

#[tokio::test]
async fn test_copy_and_move_within_provider() {
    let manager = memory_manager();
    let events = record_events(&manager);
    manager
        .upload(
            "src.json",
            Bytes::from("{}"),
            &UploadOptions::new().mime_type("application/json"),
            None,
        )
        .await
        .unwrap();

    let copied = manager.copy("src.json", "copy.json", None).await.unwrap();
    assert_eq!(copied.size, 2);
    assert!(manager.exists("src.json", None).await.unwrap());

    manager
        .move_object("copy.json", "moved.json", None)
        .await
        .unwrap();
    assert!(!manager.exists("copy.json", None).await.unwrap());

    let metadata = manager.get_metadata("moved.json", None).await.unwrap();
    assert_eq!(metadata.mime_type, "application/json");

    let events = events.lock();
    assert!(events.contains(&"copy:primary:copy.json".to_string()));
    assert!(events.contains(&"move:primary:moved.json".to_string()));
}

#[tokio::test]
async fn test_signed_url() {
    let manager = memory_manager();
    manager
        .upload("private.bin", Bytes::from("x"), &UploadOptions::new(), None)
        .await
        .unwrap();

    let url = manager
        .get_signed_url(
            "private.bin",
            &SignedUrlOptions::new(Duration::from_secs(600), SignedUrlMethod::Get),
            None,
        )
        .await
        .unwrap();
    assert!(url.contains("private.bin"));
    assert!(url.contains("X-Method=GET"));

    let url_metrics = manager
        .get_metrics(None, None)
        .into_iter()
        .filter(|m| m.operation == MetricOperation::Url)
        .count();
    assert_eq!(url_metrics, 1);
}

#[tokio::test]
async fn test_invalid_key_is_rejected() {
    let manager = memory_manager();
    let err = manager
        .upload("", Bytes::from("x"), &UploadOptions::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}
