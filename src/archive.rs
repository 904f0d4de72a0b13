mod manager;
mod sync;
mod upload;

pub use manager::{
    ArchiveError, ArchiveManager, BatchDeleteReport, FailedDelete, Mutation, NewEpisode,
    ReaderView, RefreshScope, Refreshed, SearchHit, WorkDetail,
};
pub use sync::{FolderSync, SyncReport};
pub use upload::{
    cancel_pair, AttachReport, BatchCancel, CancelHandle, FailedUpload, FailureReason, UploadFile,
    UploadOptions,
};
