use super::events::{artifact_url, ArtifactLink, PipelineEvent};
use super::store::ArtifactStore;
use crate::media::{MediaKind, UploadedMedia};
use crate::output;
use crate::pipeline::{FrameProgress, Pipeline, ProcessedArtifact};
use anyhow::Result;
use uuid::Uuid;

/// JPEG quality of live previews
const PREVIEW_QUALITY: u8 = 80;

/// Run every upload through the pipeline in order, reporting through `emit`
///
/// A failing file produces `FileFailed` and the batch moves on. Always ends
/// with exactly one `BatchCompleted`.
pub fn run_batch<E>(
    pipeline: &Pipeline,
    store: &ArtifactStore,
    uploads: &[UploadedMedia],
    confidence: f32,
    preview_interval: u64,
    mut emit: E,
) where
    E: FnMut(PipelineEvent),
{
    let mut failed = 0;

    for (index, upload) in uploads.iter().enumerate() {
        let _span = tracing::info_span!("file", index, name = %upload.name).entered();

        emit(PipelineEvent::FileStarted {
            index,
            name: upload.name.clone(),
            kind: upload.kind,
        });

        let outcome = match upload.kind {
            MediaKind::Image => process_image(pipeline, store, index, upload, confidence),
            MediaKind::Video => process_video(
                pipeline,
                store,
                index,
                upload,
                confidence,
                preview_interval,
                &mut emit,
            ),
        };

        match outcome {
            Ok(event) => emit(event),
            Err(err) => {
                failed += 1;
                tracing::warn!("Processing failed: {err:#}");
                emit(PipelineEvent::FileFailed {
                    index,
                    name: upload.name.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }

    tracing::info!(files = uploads.len(), failed, "Batch finished");
    emit(PipelineEvent::BatchCompleted {
        files: uploads.len(),
        failed,
    });
}

fn process_image(
    pipeline: &Pipeline,
    store: &ArtifactStore,
    index: usize,
    upload: &UploadedMedia,
    confidence: f32,
) -> Result<PipelineEvent> {
    let outcome = pipeline.process_image(upload, confidence)?;
    let summary = outcome.result.summary();
    let (width, height) = outcome.result.annotated.dimensions();

    let id = store.insert(outcome.artifact.clone());
    Ok(PipelineEvent::ImageCompleted {
        index,
        name: upload.name.clone(),
        summary: summary.to_string(),
        detections: summary.count(),
        width,
        height,
        artifact: ArtifactLink::new(id, &outcome.artifact),
    })
}

fn process_video<E>(
    pipeline: &Pipeline,
    store: &ArtifactStore,
    index: usize,
    upload: &UploadedMedia,
    confidence: f32,
    preview_interval: u64,
    emit: &mut E,
) -> Result<PipelineEvent>
where
    E: FnMut(PipelineEvent),
{
    let reporter = VideoReporter::new(store, index, &upload.name, preview_interval);
    let outcome = pipeline.process_video_upload(upload, confidence, |progress: FrameProgress<'_>| {
        reporter.report(&progress, &mut *emit)
    })?;
    drop(reporter);

    let id = store.insert(outcome.artifact.clone());
    Ok(PipelineEvent::VideoCompleted {
        index,
        name: upload.name.clone(),
        frames_processed: outcome.state.frame_count(),
        unique_potholes: outcome.state.unique_count(),
        artifact: ArtifactLink::new(id, &outcome.artifact),
    })
}

/// Turns per-frame progress of one video into `Progress` and `Preview` events
///
/// Previews overwrite a single store slot, which is dropped again with the
/// reporter whether the video finished or failed.
pub struct VideoReporter<'a> {
    store: &'a ArtifactStore,
    index: usize,
    preview_id: Uuid,
    preview_name: String,
    preview_interval: u64,
}

impl<'a> VideoReporter<'a> {
    pub fn new(store: &'a ArtifactStore, index: usize, name: &str, preview_interval: u64) -> Self {
        Self {
            store,
            index,
            preview_id: Uuid::new_v4(),
            preview_name: format!("preview_{name}.jpg"),
            preview_interval: preview_interval.max(1),
        }
    }

    pub fn preview_id(&self) -> Uuid {
        self.preview_id
    }

    pub fn report<E>(&self, progress: &FrameProgress<'_>, emit: &mut E)
    where
        E: FnMut(PipelineEvent),
    {
        emit(PipelineEvent::Progress {
            index: self.index,
            frame_index: progress.frame_index,
            frames_processed: progress.state.frame_count(),
            total_frames: progress.total_frames,
            fraction: progress.fraction,
            detections: progress.detections.len(),
            unique_potholes: progress.state.unique_count(),
        });

        if progress.frame_index % self.preview_interval != 0 {
            return;
        }
        match output::encode_jpeg(progress.annotated, PREVIEW_QUALITY) {
            Ok(jpeg) => {
                self.store.replace(
                    self.preview_id,
                    ProcessedArtifact {
                        bytes: jpeg,
                        mime_type: "image/jpeg".to_string(),
                        file_name: self.preview_name.clone(),
                    },
                );
                emit(PipelineEvent::Preview {
                    index: self.index,
                    frame_index: progress.frame_index,
                    url: artifact_url(self.preview_id),
                });
            }
            Err(err) => tracing::warn!("Skipping preview: {err:#}"),
        }
    }
}

impl Drop for VideoReporter<'_> {
    fn drop(&mut self) {
        if self.store.remove(&self.preview_id) {
            tracing::debug!(id = %self.preview_id, "Dropped preview slot");
        }
    }
}
