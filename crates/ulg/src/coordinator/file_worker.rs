//! 🧵 The file worker: pulls one file at a time off the queue and owns it until it has
//! been routed. The unsung hero. The Supervisor takes the credit in the sprint retro.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{FileReport, Worker};
use crate::app_config::WriteMode;
use crate::backends::{DocumentStore, IngestionSource, SourceBackend, StoreBackend};
use crate::bulk::{BulkAction, encode_bulk};
use crate::common::{ChatEvent, video_id_from_file_name};
use crate::errors::FileError;
use crate::lifecycle::{FileRef, FileState, Outcome, Relocation};
use crate::normalizer::{Normalizer, RawEvent};
use crate::videos::VideoCatalog;

/// 🔧 Everything a worker needs to process a file, shared by every worker.
#[derive(Debug)]
pub(super) struct FileProcessor {
    pub(super) store: Arc<StoreBackend>,
    pub(super) source: Arc<SourceBackend>,
    pub(super) catalog: Arc<VideoCatalog>,
    pub(super) normalizer: Arc<Normalizer>,
    pub(super) index: String,
    pub(super) write_mode: WriteMode,
}

pub(super) struct FileWorker {
    id: usize,
    files: async_channel::Receiver<FileRef>,
    reports: async_channel::Sender<FileReport>,
    processor: Arc<FileProcessor>,
}

impl FileWorker {
    pub(super) fn new(
        id: usize,
        files: async_channel::Receiver<FileRef>,
        reports: async_channel::Sender<FileReport>,
        processor: Arc<FileProcessor>,
    ) -> Self {
        Self {
            id,
            files,
            reports,
            processor,
        }
    }
}

impl Worker for FileWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🧵 worker {} reporting for duty", self.id);
            while let Ok(file) = self.files.recv().await {
                let the_report = self.processor.process(file).await;
                if self.reports.send(the_report).await.is_err() {
                    // -- the collector left. finishing quietly is all that's left to do.
                    warn!("⚠️ worker {}: nobody is collecting reports anymore", self.id);
                    break;
                }
            }
            debug!("🧵 worker {} clocking out", self.id);
            Ok(())
        })
    }
}

impl FileProcessor {
    /// 🚦 pending → in-flight → processed | error, with the artifact moved to match.
    pub(super) async fn process(&self, file: FileRef) -> FileReport {
        let mut the_report = FileReport::new(file.clone());
        let Some(in_flight) = FileState::Pending.start() else {
            // -- unreachable by construction, but a report is still owed
            the_report.state = FileState::Error;
            return the_report;
        };

        let the_outcome = self.submit(&file, &mut the_report).await;
        let Some((the_state, the_relocation)) = in_flight.finish(&the_outcome) else {
            the_report.state = FileState::Error;
            return the_report;
        };
        the_report.state = the_state;
        the_report.error = match the_outcome {
            Outcome::Indexed => None,
            Outcome::Empty { .. } => Some(FileError::Encode("no valid records after normalization".into())),
            Outcome::Failed(err) => Some(err),
        };

        let the_routing = match the_relocation {
            Relocation::MoveTo(location) => self.source.relocate(&file, location).await.map(|_| ()),
            Relocation::Remove => {
                warn!("🗑️ '{}' had nothing in it, removing the remnant", file);
                self.source.remove(&file).await
            }
        };
        if let Err(err) = the_routing {
            warn!("🚚 '{}' finished as {:?} but couldn't be routed: {:#}", file, the_state, err);
            the_report.routing_error = Some(format!("{err:#}"));
        }

        match &the_report.error {
            None => debug!(
                "✅ '{}' processed: {} indexed, {} skipped lines, {} dropped",
                file, the_report.succeeded, the_report.skipped_lines, the_report.dropped
            ),
            Some(err) => warn!("💀 '{}' → error ({}): {}", file, err.kind(), err),
        }
        the_report
    }

    /// 📤 The single attempt: read, normalize, encode, submit, judge.
    async fn submit(&self, file: &FileRef, report: &mut FileReport) -> Outcome {
        let the_bytes = match self.source.read(file).await {
            Ok(bytes) => bytes,
            Err(err) => return Outcome::Failed(FileError::Read(format!("{err:#}"))),
        };
        let Some(the_video_id) = video_id_from_file_name(&file.name) else {
            return Outcome::Failed(FileError::Encode(format!(
                "can't tell which video '{}' belongs to from its name",
                file.name
            )));
        };
        let the_title = self.catalog.title_of(&the_video_id);

        let the_events = self.normalize_lines(&the_bytes, &the_video_id, the_title, report);
        if the_events.is_empty() {
            return Outcome::Empty {
                blank: the_bytes.trim_ascii().is_empty(),
            };
        }

        let the_docs: Vec<(BulkAction, ChatEvent)> = the_events
            .into_iter()
            .map(|event| {
                let the_action = match self.write_mode {
                    WriteMode::Append => BulkAction::Index { id: None },
                    WriteMode::Upsert => BulkAction::Upsert { id: event.id.clone() },
                };
                (the_action, event)
            })
            .collect();
        let the_payload = match encode_bulk(&self.index, &the_docs) {
            Ok(payload) => payload,
            Err(err) => return Outcome::Failed(FileError::Encode(format!("{err:#}"))),
        };
        report.indexed = the_payload.item_count;
        trace!("📦 '{}': {} docs, {} bytes of bulk body", file, the_payload.item_count, the_payload.body.len());

        let the_outcome = match self.store.bulk_write(&self.index, the_payload).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_unavailable() => return Outcome::Failed(FileError::Transport(err.to_string())),
            // -- the store answered and said no to the whole request
            Err(err) => {
                report.failed = report.indexed;
                return Outcome::Failed(FileError::PartialIndex {
                    succeeded: 0,
                    failed: report.indexed,
                    reason: err.to_string(),
                });
            }
        };
        report.succeeded = the_outcome.succeeded;
        report.failed = the_outcome.failed;
        if the_outcome.is_clean() {
            Outcome::Indexed
        } else {
            Outcome::Failed(FileError::PartialIndex {
                succeeded: the_outcome.succeeded,
                failed: the_outcome.failed,
                reason: the_outcome
                    .first_error_reason
                    .unwrap_or_else(|| "bulk response flagged errors".to_string()),
            })
        }
    }

    fn normalize_lines(
        &self,
        bytes: &[u8],
        video_id: &str,
        video_title: &str,
        report: &mut FileReport,
    ) -> Vec<ChatEvent> {
        let mut the_events = Vec::new();
        let mut the_start = 0;
        // -- 🔪 memchr finds the newlines, we do the rest. the last line may not have one.
        let the_ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
        for end in the_ends {
            if the_start > bytes.len() {
                break;
            }
            let the_line = bytes[the_start..end].trim_ascii();
            the_start = end + 1;
            if the_line.is_empty() {
                continue;
            }
            report.lines += 1;
            match RawEvent::parse(the_line) {
                Ok(raw) => match self.normalizer.normalize(raw, video_id, video_title) {
                    Some(event) => the_events.push(event),
                    None => report.dropped += 1,
                },
                Err(err) => {
                    trace!("🙈 {} line {}: {}", report.file, report.lines, err);
                    report.skipped_lines += 1;
                }
            }
        }
        if report.skipped_lines > 0 {
            warn!("⚠️ '{}': skipped {} malformed lines", report.file, report.skipped_lines);
        }
        the_events
    }
}
