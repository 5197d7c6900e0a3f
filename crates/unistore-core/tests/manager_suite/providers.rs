//! Provider registry and cross-provider transfers.

use bytes::Bytes;
use std::sync::Arc;

use unistore_core::{
    DownloadOptions, Error, MemoryBackend, MetricOperation, ProviderChange, RetryConfig,
    StorageConfig, StorageManager, StorageManagerOptions, UploadOptions,
};

use super::helpers::record_events;

fn primary_backup_manager() -> StorageManager {
    StorageManager::builder()
        .provider("primary", StorageConfig::memory("primary"))
        .provider("backup", StorageConfig::memory("backup"))
        .retry(RetryConfig::no_retries())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_primary_backup_scenario() {
    let manager = primary_backup_manager();
    assert_eq!(manager.default_provider(), "primary");
    assert_eq!(manager.list_providers(), vec!["backup", "primary"]);

    manager
        .upload(
            "reports/q1.csv",
            Bytes::from("a,b\n1,2\n"),
            &UploadOptions::new()
                .cache_control("max-age=60")
                .metadata("quarter", "q1"),
            None,
        )
        .await
        .unwrap();
    assert!(!manager.exists("reports/q1.csv", Some("backup")).await.unwrap());

    let copied = manager
        .copy_between_providers("primary", "reports/q1.csv", "backup", "archive/q1.csv")
        .await
        .unwrap();
    assert_eq!(copied.size, 8);

    let metadata = manager
        .get_metadata("archive/q1.csv", Some("backup"))
        .await
        .unwrap();
    assert_eq!(metadata.mime_type, "text/csv");
    assert_eq!(metadata.cache_control.as_deref(), Some("max-age=60"));
    assert_eq!(metadata.custom_metadata["quarter"], "q1");

    let data = manager
        .download("archive/q1.csv", &DownloadOptions::new(), Some("backup"))
        .await
        .unwrap()
        .into_bytes()
        .await
        .unwrap();
    assert_eq!(data, Bytes::from("a,b\n1,2\n"));

    // Source untouched
    assert!(manager.exists("reports/q1.csv", None).await.unwrap());
}

#[tokio::test]
async fn test_copy_between_providers_missing_source() {
    let manager = primary_backup_manager();
    let events = record_events(&manager);

    let err = manager
        .copy_between_providers("primary", "ghost.txt", "backup", "ghost.txt")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(events.lock().is_empty());

    // The failed read is charged to the source; nothing reached the destination
    let source = manager.get_metrics(Some("primary"), None);
    assert_eq!(source.len(), 1);
    assert_eq!(source[0].operation, MetricOperation::Download);
    assert!(!source[0].success);
    assert!(manager.get_metrics(Some("backup"), None).is_empty());

    assert!(!manager.exists("ghost.txt", Some("backup")).await.unwrap());
    assert!(manager.list_by_prefix("", Some("backup")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_copy_between_providers_records_both_sides() {
    let manager = primary_backup_manager();
    manager
        .upload("a.txt", Bytes::from("abc"), &UploadOptions::new(), None)
        .await
        .unwrap();

    manager
        .copy_between_providers("primary", "a.txt", "backup", "a.txt")
        .await
        .unwrap();

    let primary = manager.metrics_summary(Some("primary"));
    let downloads = &primary.operations[&MetricOperation::Download];
    assert_eq!(downloads.count, 1);
    assert_eq!(downloads.bytes, 3);

    let backup = manager.metrics_summary(Some("backup"));
    assert_eq!(backup.total_count(), 1);
    assert_eq!(backup.operations[&MetricOperation::Upload].bytes, 3);
    assert_eq!(backup.total_failures(), 0);
}

#[tokio::test]
async fn test_registry_changes_at_runtime() {
    let manager = primary_backup_manager();
    let mut changes = manager.subscribe_provider_changes();

    manager
        .add_provider("scratch", &StorageConfig::memory("scratch"))
        .unwrap();
    manager.register_provider("custom", Arc::new(MemoryBackend::with_bucket("custom")));
    assert_eq!(
        manager.list_providers(),
        vec!["backup", "custom", "primary", "scratch"]
    );

    manager.remove_provider("backup").unwrap();
    assert!(matches!(
        manager.exists("x", Some("backup")).await,
        Err(Error::ProviderNotFound(name)) if name == "backup"
    ));
    assert!(matches!(
        manager.remove_provider("primary"),
        Err(Error::CannotRemoveDefault(_))
    ));
    assert!(matches!(
        manager.remove_provider("backup"),
        Err(Error::ProviderNotFound(_))
    ));

    assert_eq!(
        changes.try_recv().unwrap(),
        ProviderChange::Added("scratch".to_string())
    );
    assert_eq!(
        changes.try_recv().unwrap(),
        ProviderChange::Added("custom".to_string())
    );
    assert_eq!(
        changes.try_recv().unwrap(),
        ProviderChange::Removed("backup".to_string())
    );
}

#[tokio::test]
async fn test_sync_memory_to_filesystem() {
    let dir = tempfile::TempDir::new().unwrap();
    let manager = StorageManager::builder()
        .provider("memory", StorageConfig::memory("memory"))
        .provider("disk", StorageConfig::filesystem(dir.path()))
        .retry(RetryConfig::no_retries())
        .build()
        .unwrap();

    for key in ["site/index.html", "site/css/main.css", "other/skip.txt"] {
        manager
            .upload(key, Bytes::from(key.to_string()), &UploadOptions::new(), None)
            .await
            .unwrap();
    }

    let report = manager.sync_providers("memory", "disk", "site/").await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.copied, vec!["site/css/main.css", "site/index.html"]);

    assert!(dir.path().join("site/index.html").exists());
    assert!(dir.path().join("site/css/main.css").exists());
    assert!(!dir.path().join("other/skip.txt").exists());

    let text = manager
        .download("site/index.html", &DownloadOptions::new(), Some("disk"))
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "site/index.html");
}

#[tokio::test]
async fn test_manager_from_yaml_options() {
    let dir = tempfile::TempDir::new().unwrap();
    let yaml = format!(
        r#"
default_provider: local
providers:
  local:
    provider: filesystem
    bucket_name: {}
  scratch:
    provider: memory
    bucket_name: scratch
retry:
  max_retries: 0
max_concurrency: 4
"#,
        dir.path().display()
    );

    let options = StorageManagerOptions::from_yaml_str(&yaml).unwrap();
    let manager = StorageManager::new(options).unwrap();
    assert_eq!(manager.default_provider(), "local");
    assert_eq!(manager.options().max_concurrency, 4);

    manager
        .upload("hello.txt", Bytes::from("hi"), &UploadOptions::new(), None)
        .await
        .unwrap();
    assert!(dir.path().join("hello.txt").exists());
}

#[test]
fn test_unknown_default_provider_fails_fast() {
    let mut options = StorageManagerOptions::single("local", StorageConfig::memory("local"));
    options.default_provider = "missing".to_string();
    assert!(matches!(
        StorageManager::new(options),
        Err(Error::Initialization(_))
    ));
}
