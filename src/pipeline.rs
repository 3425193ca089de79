use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Multipart;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout_at};

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::image_processing::{self, Conversion};
use crate::slug::final_slug;
use crate::storage::{MediaLayout, Tenant, TenantDirectory, ensure_directory};
use crate::upload::{StagedFile, UploadPolicy, UploadReceiver};

#[derive(Clone, Debug)]
pub struct ConvertedImage {
    pub slug: String,
    pub path: PathBuf,
    pub url: String,
}

/// Receive → validate (while provisioning) → convert → clean up → build the URL.
///
/// At most `max_concurrent_uploads` ingests hold an admission permit at once,
/// and a permit stays taken until its conversion has finished on the blocking
/// pool. Waiting for admission, and everything after it, is bounded by
/// `upload_timeout`.
#[derive(Debug)]
pub struct IngestPipeline {
    layout: MediaLayout,
    receiver: UploadReceiver,
    policy: UploadPolicy,
    admission: Arc<Semaphore>,
    timeout: Duration,
}

impl IngestPipeline {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            layout: MediaLayout::new(config.media_root.clone(), config.public_base_url.clone()),
            receiver: UploadReceiver::new(config.staging_dir.clone(), config.max_upload_bytes),
            policy: UploadPolicy::new(config.max_upload_bytes, config.allowed_mime_types.clone()),
            admission: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            timeout: config.upload_timeout,
        }
    }

    pub async fn ingest(
        &self,
        tenant: Tenant,
        category: &str,
        multipart: &mut Multipart,
    ) -> IngestResult<ConvertedImage> {
        let directory = self.layout.tenant_directory(&tenant, category)?;
        let permit = self.admit().await?;
        let start = Instant::now();
        let deadline = start + self.timeout;

        let staged = timeout_at(deadline, self.receiver.receive(multipart))
            .await
            .map_err(|_| IngestError::ReceiveTimedOut)??;
        let staged = timeout_at(deadline, self.prepare(staged, &directory))
            .await
            .map_err(|_| self.timed_out())??;

        let slug = final_slug(&staged.original_name);
        let destination = directory.final_path(&slug);
        let converted = image_processing::convert(&staged, &destination, permit, deadline).await;
        staged.discard().await;
        if converted? == Conversion::Abandoned {
            return Err(self.timed_out());
        }

        let url = self.layout.public_url(&directory, &slug);
        tracing::info!(
            tenant = %directory.tenant,
            category = %directory.category,
            slug = %slug,
            url = %url,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "upload ingested"
        );
        Ok(ConvertedImage {
            slug,
            path: destination,
            url,
        })
    }

    async fn admit(&self) -> IngestResult<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.admission).acquire_owned();
        match tokio::time::timeout(self.timeout, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(IngestError::Busy(self.timeout.as_secs())),
        }
    }

    /// Validation and directory provisioning, run side by side.
    async fn prepare(
        &self,
        staged: Option<StagedFile>,
        directory: &TenantDirectory,
    ) -> IngestResult<StagedFile> {
        let (validated, provisioned) =
            tokio::join!(self.policy.validate(staged), ensure_directory(directory));
        let staged = validated?;
        if let Err(err) = provisioned {
            staged.discard().await;
            return Err(err);
        }
        Ok(staged)
    }

    fn timed_out(&self) -> IngestError {
        IngestError::TimedOut(self.timeout.as_secs())
    }
}
