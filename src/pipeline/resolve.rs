//! Evidence resolver: fetch the bytes of every image in a claim's manifest.
//!
//! Fetching is best-effort. A file that cannot be read is logged, recorded
//! in [`ResolvedEvidence::dropped`] and left out of the packet; it never
//! aborts the run. Fetches run concurrently up to the configured limit and
//! the results are put back into manifest order before they are returned,
//! so the page order of the packet does not depend on network timing.

use crate::error::EvidenceError;
use crate::model::EvidenceFile;
use crate::progress::ProgressCallback;
use crate::store::ContentStore;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// An image file together with its bytes.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub file: EvidenceFile,
    pub bytes: Vec<u8>,
}

/// An image that was left out of the packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedEvidence {
    pub file_id: Uuid,
    pub name: Option<String>,
    pub error: EvidenceError,
}

/// Outcome of resolving one manifest.
#[derive(Debug, Clone, Default)]
pub struct ResolvedEvidence {
    /// In manifest order.
    pub images: Vec<FetchedImage>,
    /// In manifest order.
    pub dropped: Vec<DroppedEvidence>,
}

/// Fetch every embeddable image in `manifest` from `bucket`.
pub async fn resolve_images(
    content: &dyn ContentStore,
    bucket: &str,
    manifest: &[EvidenceFile],
    concurrency: usize,
    progress: Option<&ProgressCallback>,
) -> ResolvedEvidence {
    let candidates: Vec<&EvidenceFile> = manifest.iter().filter(|f| f.is_embeddable_image()).collect();
    let total = candidates.len();
    debug!("Resolving {} of {} evidence files as images", total, manifest.len());

    let mut results: Vec<(usize, Result<FetchedImage, EvidenceError>)> =
        stream::iter(candidates.into_iter().enumerate().map(|(idx, file)| async move {
            let result = fetch_one(content, bucket, file).await;
            if let Some(cb) = progress {
                match &result {
                    Ok(image) => cb.on_evidence_fetched(
                        idx + 1,
                        total,
                        image.file.display_name().unwrap_or(&image.file.storage_path),
                    ),
                    Err(e) => cb.on_evidence_dropped(idx + 1, total, &e.to_string()),
                }
            }
            (idx, result)
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    // buffer_unordered yields in completion order.
    results.sort_by_key(|(idx, _)| *idx);

    let mut resolved = ResolvedEvidence::default();
    for (_, result) in results {
        match result {
            Ok(image) => resolved.images.push(image),
            Err(error) => {
                let (file_id, name) = match &error {
                    EvidenceError::MissingPath { file_id } | EvidenceError::FetchFailed { file_id, .. } => {
                        (*file_id, manifest.iter().find(|f| f.id == *file_id).and_then(|f| f.original_name.clone()))
                    }
                };
                resolved.dropped.push(DroppedEvidence { file_id, name, error });
            }
        }
    }
    resolved
}

async fn fetch_one(content: &dyn ContentStore, bucket: &str, file: &EvidenceFile) -> Result<FetchedImage, EvidenceError> {
    if file.storage_path.trim().is_empty() {
        warn!("Evidence {} has no storage path, skipping", file.id);
        return Err(EvidenceError::MissingPath { file_id: file.id });
    }
    match content.get(bucket, &file.storage_path).await {
        Ok(bytes) => {
            debug!("Fetched evidence {} ({} bytes)", file.storage_path, bytes.len());
            Ok(FetchedImage {
                file: file.clone(),
                bytes,
            })
        }
        Err(e) => {
            warn!("Failed to fetch evidence {}: {}", file.storage_path, e);
            Err(EvidenceError::FetchFailed {
                file_id: file.id,
                path: file.storage_path.clone(),
                detail: e.to_string(),
            })
        }
    }
}
