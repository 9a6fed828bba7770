//! 📼 The video catalog: the listing file, loaded into a map, and pushed into its own index.
//!
//! The listing (`videos.ndjson`) is one JSON object per line, straight from the
//! platform's API. It feeds two things: titles for every chat document the
//! normalizer produces, and the `videos` index behind `GET /videos`.
//!
//! Videos are upserted, never overwritten. The thumbnail jobs own the
//! `thumbnail_created` / `thumbnail_uploaded` flags, so the catalog push leaves
//! those keys out of the partial doc and whatever the jobs wrote survives.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backends::{DocumentStore, ensure_index};
use crate::bulk::{BulkAction, encode_bulk};
use crate::common::{VideoMetadata, extract_video_id};

/// 📏 Videos per bulk request.
pub const CHUNK_SIZE: usize = 500;

/// 🚩 Keys owned by the thumbnail jobs, never sent by the catalog push.
const LIFECYCLE_FLAGS: &[&str] = &["thumbnail_created", "thumbnail_uploaded"];

#[derive(Debug, Clone, Default)]
pub struct VideoCatalog {
    videos: BTreeMap<String, VideoMetadata>,
}

impl VideoCatalog {
    /// 📖 Parse NDJSON bytes. Returns the catalog and how many lines were unusable
    /// (bad JSON, or no id anywhere).
    pub fn from_ndjson(bytes: &[u8]) -> (Self, usize) {
        let mut the_catalog = Self::default();
        let mut skipped = 0;
        for (line_number, line) in bytes.split(|b| *b == b'\n').enumerate() {
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            let mut the_video: VideoMetadata = match serde_json::from_slice(line) {
                Ok(video) => video,
                Err(err) => {
                    warn!("⚠️ videos listing line {}: not a video ({})", line_number + 1, err);
                    skipped += 1;
                    continue;
                }
            };
            // 🆔 the id in the URL is the canonical one
            if let Some(the_id) = extract_video_id(&the_video.video_url) {
                the_video.video_id = the_id;
            }
            if the_video.video_id.is_empty() {
                warn!("⚠️ videos listing line {}: no video id, skipping", line_number + 1);
                skipped += 1;
                continue;
            }
            the_catalog.videos.insert(the_video.video_id.clone(), the_video);
        }
        (the_catalog, skipped)
    }

    /// 📂 Load the listing from disk. A missing file is an empty catalog and a warning,
    /// because chat without titles is still chat.
    pub async fn load(path: &Path) -> Result<Self> {
        let the_bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ video listing '{}' not found, titles will be empty", path.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("💀 Couldn't read video listing '{}'", path.display()));
            }
        };
        let (the_catalog, skipped) = Self::from_ndjson(&the_bytes);
        info!(
            "📼 loaded {} videos from '{}' ({} lines skipped)",
            the_catalog.len(),
            path.display(),
            skipped
        );
        Ok(the_catalog)
    }

    pub fn get(&self, video_id: &str) -> Option<&VideoMetadata> {
        self.videos.get(video_id)
    }

    /// 🏷️ The title, or `""` when we've never heard of the video.
    pub fn title_of(&self, video_id: &str) -> &str {
        self.get(video_id).map(|video| video.title.as_str()).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VideoMetadata> {
        self.videos.values()
    }
}

/// 📊 What the catalog push did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoIngestReport {
    pub chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
}

fn upsert_doc(video: &VideoMetadata) -> Result<Value> {
    let mut the_doc = serde_json::to_value(video).context("💀 a video refused to become JSON")?;
    if let Some(map) = the_doc.as_object_mut() {
        for flag in LIFECYCLE_FLAGS {
            map.remove(*flag);
        }
    }
    Ok(the_doc)
}

/// 🚀 Upsert every catalog entry into `index`, `CHUNK_SIZE` at a time, keyed by video id.
///
/// Store failures propagate; item-level rejections are counted and logged.
pub async fn ingest_videos<S: DocumentStore + ?Sized>(
    store: &S,
    index: &str,
    catalog: &VideoCatalog,
) -> Result<VideoIngestReport> {
    ensure_index(store, index, &VideoMetadata::index_settings()).await?;

    let the_videos: Vec<&VideoMetadata> = catalog.iter().collect();
    let mut the_report = VideoIngestReport::default();
    for chunk in the_videos.chunks(CHUNK_SIZE) {
        let the_docs = chunk
            .iter()
            .map(|video| {
                Ok((
                    BulkAction::Upsert {
                        id: video.video_id.clone(),
                    },
                    upsert_doc(video)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        let the_payload = encode_bulk(index, &the_docs)?;
        let the_outcome = store
            .bulk_write(index, the_payload)
            .await
            .with_context(|| format!("💀 video chunk {} never made it into '{}'", the_report.chunks + 1, index))?;

        the_report.chunks += 1;
        the_report.succeeded += the_outcome.succeeded;
        the_report.failed += the_outcome.failed;
        if let Some(reason) = the_outcome.first_error_reason {
            warn!("⚠️ video chunk {}: {} rejected, first reason: {}", the_report.chunks, the_outcome.failed, reason);
        } else {
            debug!("✅ video chunk {} upserted ({} docs)", the_report.chunks, chunk.len());
        }
    }
    info!(
        "📼 video catalog push done: {} chunks, {} upserted, {} rejected",
        the_report.chunks, the_report.succeeded, the_report.failed
    );
    Ok(the_report)
}
