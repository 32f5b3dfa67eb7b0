//! Orchestrates one invocation: derive the key, stream source -> resize ->
//! sink, and report exactly one [`Outcome`].

use futures::future::{self, Either};
use image::ImageFormat;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::config::ResizeConfig;
use crate::models::{BucketNotification, ObjectRef, Outcome, ProcessingEvent, UploadResult};
use crate::services::error::{PipelineError, SkipReason};
use crate::services::key_deriver::derive;
use crate::services::storage::{ObjectSink, ObjectSource};
use crate::services::transform::ResizeTransform;

pub struct Pipeline {
    source: Arc<dyn ObjectSource>,
    sink: Arc<dyn ObjectSink>,
    transform: ResizeTransform,
    config: ResizeConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        sink: Arc<dyn ObjectSink>,
        config: ResizeConfig,
    ) -> Self {
        Self {
            source,
            sink,
            transform: ResizeTransform::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &ResizeConfig {
        &self.config
    }

    /// Entry point for wire notifications; only the first record is used.
    pub async fn handle_notification(&self, notification: &BucketNotification) -> Outcome {
        match ProcessingEvent::try_from(notification) {
            Ok(event) => self.handle(&event).await,
            Err(e) => {
                warn!("Rejected notification: {}", e);
                Outcome::Failed(e)
            }
        }
    }

    pub async fn handle(&self, event: &ProcessingEvent) -> Outcome {
        let size_tag = &self.config.size_tag;
        info!("Processing {}", event.source);

        let derived = match derive(&event.source.key, size_tag) {
            Ok(derived) => derived,
            Err(reason @ SkipReason::AlreadyProcessed) => {
                info!("Skipping {}: already a {} derivative", event.source, size_tag);
                return Outcome::Skipped(reason);
            }
            Err(reason @ SkipReason::UnknownType) => {
                warn!("Skipping {}: {}", event.source, reason);
                return Outcome::Skipped(reason);
            }
        };

        let source = event.source.with_key(derived.source_key());
        let destination = event.source.with_key(derived.as_str());
        let hint = ImageFormat::from_extension(derived.extension());
        info!("Resizing {} -> {}", source, destination);

        let sink_opened = AtomicBool::new(false);
        let streaming = self.stream(&source, &destination, hint, &sink_opened);

        let result = match tokio::time::timeout(self.config.deadline, streaming).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::DeadlineExceeded(self.config.deadline)),
        };

        match result {
            Ok(uploaded) => {
                info!(
                    "Uploaded {}/{} ({} bytes, {} part(s), sha256 {})",
                    uploaded.bucket, uploaded.key, uploaded.size, uploaded.parts, uploaded.checksum
                );
                Outcome::Uploaded(uploaded)
            }
            Err(e) => {
                error!("Failed to resize {}: {}", source, e.reason());
                if self.config.cleanup_on_failure && sink_opened.load(Ordering::SeqCst) {
                    self.cleanup(&destination).await;
                }
                Outcome::Failed(e)
            }
        }
    }

    /// Race the transform against the upload and stop at the first failure.
    ///
    /// A failing sink drops the transform, which closes the source stream.
    /// A failing transform drops its writer, so the upload is drained until
    /// it has aborted.
    async fn stream(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
        hint: Option<ImageFormat>,
        sink_opened: &AtomicBool,
    ) -> Result<UploadResult, PipelineError> {
        let input = self.source.open_read(source).await?;

        let (writer, completion) = self.sink.open_write(destination);
        sink_opened.store(true, Ordering::SeqCst);

        let producing = Box::pin(self.transform.run(input, hint, writer));

        match future::select(producing, completion).await {
            Either::Left((produced, completion)) => root_cause(produced, completion.await),
            Either::Right((Ok(uploaded), producing)) => root_cause(producing.await, Ok(uploaded)),
            Either::Right((Err(e), _producing)) => {
                warn!("Upload to {} failed, stopping the transform", destination);
                Err(e)
            }
        }
    }

    async fn cleanup(&self, destination: &ObjectRef) {
        match self.sink.remove(destination).await {
            Ok(()) => info!("Removed partial output {}", destination),
            Err(e) => warn!("Could not remove partial output {}: {}", destination, e),
        }
    }
}

/// Picks the error to report once both results are known. A failing
/// transform drops its writer, so the sink reports `Aborted`; a failing sink
/// drops its receiver, so the transform reports `SinkClosed`. Those are
/// consequences, not causes.
fn root_cause(
    produced: Result<u64, PipelineError>,
    uploaded: Result<UploadResult, PipelineError>,
) -> Result<UploadResult, PipelineError> {
    match (produced, uploaded) {
        (Ok(_), Ok(uploaded)) => Ok(uploaded),
        (Err(PipelineError::SinkClosed), Err(sink_err)) => Err(sink_err),
        (Err(transform_err), _) => Err(transform_err),
        (Ok(_), Err(sink_err)) => Err(sink_err),
    }
}
