#![allow(dead_code)]

pub mod mock_blob_store;

pub use mock_blob_store::MockBlobStore;

use kirin::archive::{ArchiveManager, UploadFile, UploadOptions};
use kirin::blob_store::BlobStoreManager;
use kirin::db::Database;
use std::sync::Arc;
use tempfile::TempDir;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Archive over a temporary database and an in-memory blob store
pub struct TestArchive {
    pub archive: ArchiveManager,
    pub database: Database,
    pub storage: Arc<MockBlobStore>,
    _temp_dir: TempDir,
}

pub async fn setup_archive() -> TestArchive {
    setup_archive_with(UploadOptions::default()).await
}

pub async fn setup_archive_with(options: UploadOptions) -> TestArchive {
    tracing_init();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let database = Database::new(db_path.to_str().unwrap())
        .await
        .expect("Failed to create database");

    let storage = Arc::new(MockBlobStore::new());
    let blob_store = BlobStoreManager::from_storage(storage.clone());
    let archive = ArchiveManager::new(database.clone(), blob_store, options);

    TestArchive {
        archive,
        database,
        storage,
        _temp_dir: temp_dir,
    }
}

/// A small fake image file
pub fn image_file(name: &str) -> UploadFile {
    UploadFile::new(name, format!("bytes of {}", name).into_bytes())
}
