// Batch image upload
//
// Each file of a batch goes through two steps:
// - Upload: bytes to the blob store, bounded by a per-file timeout and
//   abandoned when the batch is cancelled
// - Persist: one image row with the sequence assigned before the batch started
//
// Files run concurrently up to `max_concurrent_uploads`. A failure only affects
// its own file; rows already written are never rolled back. The row insert
// starts only after the upload succeeded and is not interrupted by cancellation.

use super::ArchiveError;
use crate::blob_store::{image_key, BlobStoreManager};
use crate::db::{Database, DbImage, EpisodeId};
use crate::ordering::sort_reading_order;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// One file submitted for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name, sanitized before it becomes part of a key
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadFile {
            name: name.into(),
            bytes,
        }
    }
}

/// Limits applied to every upload batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub upload_timeout: Duration,
    pub max_concurrent_uploads: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            upload_timeout: Duration::from_secs(30),
            max_concurrent_uploads: 4,
        }
    }
}

/// Why a file of a batch did not produce an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    Upload(String),
    TimedOut,
    Cancelled,
    /// Blob was uploaded but the image row could not be written
    Store(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Upload(message) => write!(f, "upload failed: {}", message),
            FailureReason::TimedOut => write!(f, "upload timed out"),
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Store(message) => write!(f, "store failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUpload {
    /// Position of the file in the submitted batch
    pub index: usize,
    pub file_name: String,
    pub reason: FailureReason,
}

/// Outcome of an upload batch
///
/// `succeeded` is in reading order, `failed` in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttachReport {
    pub succeeded: Vec<DbImage>,
    pub failed: Vec<FailedUpload>,
}

impl AttachReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The uploaded images, or `PartialBatch` when any file failed
    pub fn into_result(self) -> Result<Vec<DbImage>, ArchiveError> {
        if self.is_complete() {
            Ok(self.succeeded)
        } else {
            Err(ArchiveError::PartialBatch(self))
        }
    }
}

/// Cancellation signal observed by an upload batch
#[derive(Debug, Clone)]
pub struct BatchCancel {
    rx: watch::Receiver<bool>,
}

/// Sender side of a [`BatchCancel`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked cancel handle and batch signal
pub fn cancel_pair() -> (CancelHandle, BatchCancel) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, BatchCancel { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl BatchCancel {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        BatchCancel { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    ///
    /// Stays pending forever if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A file with its key and sequence decided, ready to upload
#[derive(Debug)]
pub(super) struct PlannedUpload {
    pub(super) index: usize,
    pub(super) file: UploadFile,
    pub(super) key: String,
    pub(super) sequence: i64,
}

/// Pair each `(file, sequence)` with its position and storage key
pub(super) fn plan_uploads(
    episode_id: EpisodeId,
    timestamp_ms: i64,
    files: Vec<(UploadFile, i64)>,
) -> Vec<PlannedUpload> {
    files
        .into_iter()
        .enumerate()
        .map(|(index, (file, sequence))| PlannedUpload {
            index,
            key: image_key(episode_id, timestamp_ms, index, &file.name),
            file,
            sequence,
        })
        .collect()
}

/// Upload and persist every planned file, collecting per-file outcomes
pub(super) async fn run_batch(
    database: &Database,
    blob_store: &BlobStoreManager,
    episode_id: EpisodeId,
    planned: Vec<PlannedUpload>,
    options: UploadOptions,
    cancel: BatchCancel,
) -> AttachReport {
    let results: Vec<Result<DbImage, FailedUpload>> = stream::iter(planned)
        .map(|planned| {
            upload_one(
                database,
                blob_store,
                episode_id,
                planned,
                options.upload_timeout,
                cancel.clone(),
            )
        })
        .buffer_unordered(options.max_concurrent_uploads.max(1))
        .collect()
        .await;

    let mut report = AttachReport::default();
    for result in results {
        match result {
            Ok(image) => report.succeeded.push(image),
            Err(failed) => report.failed.push(failed),
        }
    }
    sort_reading_order(&mut report.succeeded);
    report.failed.sort_by_key(|failed| failed.index);
    report
}

async fn upload_one(
    database: &Database,
    blob_store: &BlobStoreManager,
    episode_id: EpisodeId,
    planned: PlannedUpload,
    upload_timeout: Duration,
    mut cancel: BatchCancel,
) -> Result<DbImage, FailedUpload> {
    let PlannedUpload {
        index,
        file,
        key,
        sequence,
    } = planned;
    let fail = |reason: FailureReason| FailedUpload {
        index,
        file_name: file.name.clone(),
        reason,
    };

    if cancel.is_cancelled() {
        return Err(fail(FailureReason::Cancelled));
    }

    let image_url = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Upload of {} cancelled", key);
            return Err(fail(FailureReason::Cancelled));
        }
        result = tokio::time::timeout(upload_timeout, blob_store.upload(&key, &file.bytes)) => {
            match result {
                Ok(Ok(url)) => url,
                Ok(Err(e)) => {
                    warn!("Upload of {} failed: {}", key, e);
                    return Err(fail(FailureReason::Upload(e.to_string())));
                }
                Err(_) => {
                    warn!("Upload of {} timed out after {:?}", key, upload_timeout);
                    return Err(fail(FailureReason::TimedOut));
                }
            }
        }
    };

    database
        .insert_image(episode_id, &image_url, &key, sequence)
        .await
        .map_err(|e| {
            warn!("Uploaded {} but failed to record it: {}", key, e);
            fail(FailureReason::Store(e.to_string()))
        })
}
