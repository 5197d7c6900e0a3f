//! Retries, metrics, partial failures and health.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use unistore_core::{
    DownloadOptions, MemoryBackend, MetricOperation, RetryConfig, StorageManager, TimeRange,
    UploadOptions,
};

use super::helpers::{fast_retries, flaky_manager, memory_manager, record_events, FlakyBackend};

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_attempts_and_backoff() {
    let backend = Arc::new(FlakyBackend::new());
    backend.fail_always("download");
    let manager = flaky_manager(backend.clone(), fast_retries(2));

    let started = tokio::time::Instant::now();
    let err = manager
        .download("any.bin", &DownloadOptions::new(), None)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.to_string().contains("injected download failure"));
    assert_eq!(backend.calls("download"), 3);
    // 100ms + 200ms of backoff
    assert!(elapsed >= Duration::from_millis(300), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(310), "elapsed {:?}", elapsed);

    let metrics = manager.get_metrics(Some("flaky"), None);
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].operation, MetricOperation::Download);
    assert!(!metrics[0].success);
    assert!(metrics[0].error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_not_found_is_retried_like_other_failures() {
    let backend = Arc::new(FlakyBackend::new());
    let manager = flaky_manager(backend.clone(), fast_retries(3));
    manager
        .upload("t.txt", Bytes::from("ok"), &UploadOptions::new(), None)
        .await
        .unwrap();

    // Missing keys are retried like any other failure
    let err = manager.get_metadata("missing.txt", None).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(backend.calls("get_metadata"), 4);
}

#[tokio::test]
async fn test_no_retries_makes_single_attempt() {
    let backend = Arc::new(FlakyBackend::new());
    backend.fail_always("exists");
    let manager = flaky_manager(backend.clone(), RetryConfig::no_retries());

    assert!(manager.exists("a", None).await.is_err());
    assert_eq!(backend.calls("exists"), 1);
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_metrics_match_operations() {
    let manager = memory_manager();

    for (key, body) in [("a.txt", "aaaa"), ("b.txt", "bb"), ("c.txt", "c")] {
        manager
            .upload(key, Bytes::from(body), &UploadOptions::new(), None)
            .await
            .unwrap();
    }
    manager
        .download("a.txt", &DownloadOptions::new(), None)
        .await
        .unwrap();
    assert!(manager
        .download("missing.txt", &DownloadOptions::new(), None)
        .await
        .is_err());
    manager.list_by_prefix("", None).await.unwrap();

    let summary = manager.metrics_summary(Some("primary"));
    let uploads = &summary.operations[&MetricOperation::Upload];
    assert_eq!(uploads.count, 3);
    assert_eq!(uploads.failures, 0);
    assert_eq!(uploads.bytes, 7);

    let downloads = &summary.operations[&MetricOperation::Download];
    assert_eq!(downloads.count, 2);
    assert_eq!(downloads.failures, 1);
    assert_eq!(downloads.bytes, 4);

    assert_eq!(summary.operations[&MetricOperation::List].count, 1);
    assert_eq!(summary.total_count(), 6);
    assert_eq!(summary.total_failures(), 1);

    let recent = manager.get_metrics(
        Some("primary"),
        Some(TimeRange::last(chrono::Duration::minutes(5))),
    );
    assert_eq!(recent.len(), 6);
    let ancient = manager.get_metrics(
        Some("primary"),
        Some(TimeRange::new(
            chrono::Utc::now() - chrono::Duration::days(3),
            chrono::Utc::now() - chrono::Duration::days(2),
        )),
    );
    assert!(ancient.is_empty());
    assert!(manager.get_metrics(Some("elsewhere"), None).is_empty());
}

// ============================================================================
// Partial failures
// ============================================================================

#[tokio::test]
async fn test_sync_reports_partial_failure() {
    let source = Arc::new(MemoryBackend::with_bucket("source"));
    let target = Arc::new(FlakyBackend::new());
    target.fail_upload_of("data/1.csv");
    target.fail_upload_of("data/3.csv");

    let manager = StorageManager::builder()
        .backend("source", source)
        .backend("target", target.clone())
        .retry(RetryConfig::no_retries())
        .build()
        .unwrap();
    let events = record_events(&manager);

    for i in 0..5 {
        manager
            .upload(
                &format!("data/{}.csv", i),
                Bytes::from(format!("row-{}", i)),
                &UploadOptions::new(),
                Some("source"),
            )
            .await
            .unwrap();
    }

    let report = manager.sync_providers("source", "target", "data/").await.unwrap();
    assert_eq!(report.copied, vec!["data/0.csv", "data/2.csv", "data/4.csv"]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].key, "data/1.csv");
    assert_eq!(report.failed[1].key, "data/3.csv");
    assert!(report.failed[0].error.contains("rejected"));
    assert_eq!(report.bytes_copied, 15);
    assert!(!report.is_complete());

    let copies = events
        .lock()
        .iter()
        .filter(|e| e.starts_with("copy:target:"))
        .count();
    assert_eq!(copies, 3);

    let target_keys: Vec<String> = manager
        .list_by_prefix("data/", Some("target"))
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.key)
        .collect();
    assert_eq!(target_keys, vec!["data/0.csv", "data/2.csv", "data/4.csv"]);
}

#[tokio::test]
async fn test_sync_records_metrics_per_key() {
    // Room for two of the five 5-byte objects
    let target = Arc::new(MemoryBackend::with_bucket("target").with_capacity_limit(10));
    let manager = StorageManager::builder()
        .backend("source", Arc::new(MemoryBackend::with_bucket("source")))
        .backend("target", target)
        .retry(RetryConfig::no_retries())
        .build()
        .unwrap();

    for i in 0..5 {
        manager
            .upload(
                &format!("data/{}.csv", i),
                Bytes::from(format!("row-{}", i)),
                &UploadOptions::new(),
                Some("source"),
            )
            .await
            .unwrap();
    }

    let report = manager.sync_providers("source", "target", "data/").await.unwrap();
    assert_eq!(report.copied.len(), 2);
    assert_eq!(report.failed.len(), 3);
    assert_eq!(report.bytes_copied, 10);

    let source = manager.metrics_summary(Some("source"));
    let reads = &source.operations[&MetricOperation::Download];
    assert_eq!(reads.count, 5);
    assert_eq!(reads.failures, 0);
    assert_eq!(reads.bytes, 25);
    assert_eq!(source.operations[&MetricOperation::List].count, 1);

    // One upload metric per key and nothing for the sync as a whole
    let target = manager.metrics_summary(Some("target"));
    assert_eq!(target.total_count(), 5);
    let writes = &target.operations[&MetricOperation::Upload];
    assert_eq!(writes.count, 5);
    assert_eq!(writes.failures, 3);
    assert_eq!(writes.bytes, 10);

    let quota_errors = manager
        .get_metrics(Some("target"), None)
        .into_iter()
        .filter(|m| !m.success)
        .filter(|m| m.error.as_deref().is_some_and(|e| e.contains("Quota exceeded")))
        .count();
    assert_eq!(quota_errors, 3);
}

#[tokio::test]
async fn test_sync_unknown_provider_fails() {
    let manager = memory_manager();
    let err = manager
        .sync_providers("primary", "missing", "")
        .await
        .unwrap_err();
    assert!(matches!(err, unistore_core::Error::ProviderNotFound(_)));
}

#[tokio::test]
async fn test_multipart_upload_leaves_no_partial_objects() {
    let backend = Arc::new(MemoryBackend::new());
    let manager = StorageManager::builder()
        .backend("primary", backend.clone())
        .retry(RetryConfig::no_retries())
        .multipart(unistore_core::MultipartConfig {
            threshold_bytes: 4,
            part_size_bytes: 4,
        })
        .build()
        .unwrap();

    let object = manager
        .upload("big.bin", Bytes::from(vec![7u8; 10]), &UploadOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(object.size, 10);
    assert_eq!(backend.len(), 1);

    // Invalid keys fail when the upload is created, leaving nothing behind
    assert!(manager
        .upload("dir/", Bytes::from(vec![7u8; 10]), &UploadOptions::new(), None)
        .await
        .is_err());
    assert_eq!(backend.len(), 1);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check_all_providers() {
    let sick = Arc::new(FlakyBackend::new());
    sick.fail_always("health_check");

    let manager = StorageManager::builder()
        .backend("healthy", Arc::new(MemoryBackend::new()))
        .backend("sick", sick)
        .build()
        .unwrap();

    let health = manager.health_check(None).await;
    assert_eq!(health.len(), 2);
    assert!(health["healthy"]);
    assert!(!health["sick"]);

    let single = manager.health_check(Some("healthy")).await;
    assert_eq!(single.len(), 1);

    let unknown = manager.health_check(Some("ghost")).await;
    assert!(!unknown["ghost"]);
}

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let manager = memory_manager();
    manager.initialize().unwrap();
    manager
        .upload("a.txt", Bytes::from("a"), &UploadOptions::new(), None)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), manager.shutdown())
        .await
        .expect("shutdown should not hang");
    assert!(!manager.is_initialized());
    assert_eq!(manager.metrics().len(), 1);
}
