use std::sync::Arc;

use log::{info, warn};

use crate::api::ClipRequest;
use crate::auth::{Credential, CredentialStore};
use crate::capture::{CaptureEngine, ClipArtifact};
use crate::error::ClipResult;
use crate::upload::{DriveUploader, UploadResult};

/// Runs one clip request end to end: credential, capture, upload, cleanup.
/// Each stage's failure surfaces as its own error; nothing is retried.
pub struct ClipPipeline {
    store: Arc<CredentialStore>,
    capture: CaptureEngine,
    uploader: DriveUploader,
}

impl ClipPipeline {
    pub fn new(store: Arc<CredentialStore>, capture: CaptureEngine, uploader: DriveUploader) -> Self {
        ClipPipeline {
            store,
            capture,
            uploader,
        }
    }

    pub async fn run(&self, request: &ClipRequest) -> ClipResult<UploadResult> {
        // Checked before capture so a missing credential never burns a
        // capture whose upload is known to be impossible.
        let credential = self.store.get_valid_credential().await?;

        let artifact = self.capture.capture(&request.url, request.duration).await?;
        info!(
            "captured {} ({} bytes)",
            artifact.path.display(),
            artifact.size
        );

        self.upload_and_cleanup(artifact, &request.folder_id, &credential)
            .await
    }

    /// The artifact is deleted whether or not the upload succeeds, so
    /// repeated failing requests cannot accumulate files on disk. A failed
    /// deletion is logged and never changes the request's outcome.
    async fn upload_and_cleanup(
        &self,
        artifact: ClipArtifact,
        folder_id: &str,
        credential: &Credential,
    ) -> ClipResult<UploadResult> {
        let outcome = self.uploader.upload(&artifact, folder_id, credential).await;
        if let Err(err) = artifact.remove().await {
            warn!("{err}");
        }
        outcome
    }
}
