//! 🎬 *[camera pans across a directory full of chat logs]*
//! 🎬 *[narrator]* "Four workers. One queue. No file left behind."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The bulk ingestion coordinator. It hands pending files to a bounded pool of
//! workers, each worker owns one file end to end (read → normalize → encode → submit →
//! route), and every finished file sends exactly one [`FileReport`] back to a single
//! collector. Nothing is written concurrently except through that channel.
//!
//! Cancellation is coarse: [`StopSignal::stop`] stops feeding new files. Whatever is
//! already in flight finishes, gets routed, and gets reported. Files that never started
//! stay in `pending` for the next run.
//!
//! The coordinator never retries. Files that failed with a transport error are listed by
//! [`IngestionReport::retryable`] for whoever runs the schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod file_worker;
use file_worker::{FileProcessor, FileWorker};

use crate::app_config::{AppConfig, WriteMode};
use crate::backends::{DocumentStore, IngestionSource, SourceBackend, StoreBackend, ensure_index};
use crate::common::ChatEvent;
use crate::errors::FileError;
use crate::lifecycle::{FileRef, FileState};
use crate::normalizer::Normalizer;
use crate::progress::IngestProgress;
use crate::videos::VideoCatalog;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!"
pub trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🛑 "Stop accepting new files." Clone it, hand it to a ctrl-c handler, pull it whenever.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 🔧 Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub index: String,
    pub max_workers: usize,
    pub write_mode: WriteMode,
    pub show_progress: bool,
}

impl IngestSettings {
    pub fn from_config(config: &AppConfig, show_progress: bool) -> Self {
        Self {
            index: config.elasticsearch.chat_logs_index.clone(),
            max_workers: config.ingest.max_workers,
            write_mode: config.ingest.write_mode,
            show_progress,
        }
    }
}

/// 📋 Everything we know about one file after its single attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub file: FileRef,
    /// 🚦 `Processed` or `Error`, never anything in between
    pub state: FileState,
    /// non-blank lines seen
    pub lines: usize,
    /// documents handed to the store
    pub indexed: usize,
    /// lines that weren't JSON, or weren't any event shape we know
    pub skipped_lines: usize,
    /// well-formed but non-substantive events (engagement banners, tickers)
    pub dropped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<FileError>,
    /// 🚚 the outcome was decided but moving/removing the artifact failed
    pub routing_error: Option<String>,
}

impl FileReport {
    fn new(file: FileRef) -> Self {
        Self {
            file,
            state: FileState::InFlight,
            lines: 0,
            indexed: 0,
            skipped_lines: 0,
            dropped: 0,
            succeeded: 0,
            failed: 0,
            error: None,
            routing_error: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.state == FileState::Processed
    }
}

/// 📊 The whole run, in no particular file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionReport {
    pub files: Vec<FileReport>,
    /// 🛑 files still queued when the stop signal fired
    pub not_started: usize,
}

impl IngestionReport {
    pub fn processed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|report| report.is_processed())
    }

    pub fn errored(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|report| report.state == FileState::Error)
    }

    /// 🔁 Files that failed only because the store was unreachable. Safe to try again as-is.
    pub fn retryable(&self) -> Vec<&FileRef> {
        self.files
            .iter()
            .filter(|report| report.error.as_ref().is_some_and(FileError::is_retryable))
            .map(|report| &report.file)
            .collect()
    }

    pub fn total_indexed(&self) -> usize {
        self.processed().map(|report| report.succeeded).sum()
    }

    pub fn total_skipped_lines(&self) -> usize {
        self.files.iter().map(|report| report.skipped_lines).sum()
    }

    pub fn total_failed_items(&self) -> usize {
        self.files.iter().map(|report| report.failed).sum()
    }
}

/// 🎯 Owns the shared handles and runs ingestion batches.
#[derive(Debug, Clone)]
pub struct Coordinator {
    store: Arc<StoreBackend>,
    source: Arc<SourceBackend>,
    catalog: Arc<VideoCatalog>,
    normalizer: Arc<Normalizer>,
    settings: IngestSettings,
    stop: StopSignal,
}

impl Coordinator {
    pub fn new(
        store: Arc<StoreBackend>,
        source: Arc<SourceBackend>,
        catalog: Arc<VideoCatalog>,
        normalizer: Normalizer,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            source,
            catalog,
            normalizer: Arc::new(normalizer),
            settings,
            stop: StopSignal::new(),
        }
    }

    /// 🛑 A handle that stops this coordinator from picking up new files.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// 🚀 Process `files` with at most `max_workers` in flight. One report per started file.
    pub async fn ingest(&self, files: Vec<FileRef>) -> IngestionReport {
        let the_worker_count = self.settings.max_workers.max(1);
        let the_total_size = files.iter().map(|file| file.size_bytes).sum();
        let mut the_progress = IngestProgress::new(files.len() as u64, the_total_size, self.settings.show_progress);

        let (file_tx, file_rx) = async_channel::bounded::<FileRef>(the_worker_count);
        let (report_tx, report_rx) = async_channel::unbounded::<FileReport>();

        // 📬 the feeder. stops handing out work the moment the signal fires.
        let the_stop = self.stop.clone();
        let the_feeder = tokio::spawn(async move {
            let mut the_queue = files.into_iter();
            let mut not_started = 0usize;
            for file in the_queue.by_ref() {
                if the_stop.is_stopped() {
                    not_started += 1;
                    break;
                }
                if file_tx.send(file).await.is_err() {
                    // -- every worker is gone. nobody to feed.
                    not_started += 1;
                    break;
                }
            }
            not_started + the_queue.count()
        });

        let the_processor = Arc::new(FileProcessor {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            catalog: Arc::clone(&self.catalog),
            normalizer: Arc::clone(&self.normalizer),
            index: self.settings.index.clone(),
            write_mode: self.settings.write_mode,
        });
        let the_workers: Vec<JoinHandle<Result<()>>> = (0..the_worker_count)
            .map(|worker_id| {
                FileWorker::new(worker_id, file_rx.clone(), report_tx.clone(), Arc::clone(&the_processor)).start()
            })
            .collect();
        drop(file_rx);
        drop(report_tx);

        // 📥 the single collection point
        let mut the_report = IngestionReport::default();
        while let Ok(file_report) = report_rx.recv().await {
            the_progress.file_done(
                file_report.file.size_bytes,
                file_report.succeeded as u64,
                !file_report.is_processed(),
            );
            the_report.files.push(file_report);
        }
        the_progress.finish();

        for (worker_id, joined) in futures::future::join_all(the_workers).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("⚠️ worker {} gave up: {:#}", worker_id, err),
                Err(err) => warn!("💀 worker {} panicked or was cancelled: {}", worker_id, err),
            }
        }
        the_report.not_started = match the_feeder.await {
            Ok(not_started) => not_started,
            Err(err) => {
                warn!("💀 the file feeder fell over: {}", err);
                0
            }
        };

        info!(
            "🏁 ingestion batch done: {} processed, {} errored, {} not started, {} documents indexed",
            the_report.processed().count(),
            the_report.errored().count(),
            the_report.not_started,
            the_report.total_indexed()
        );
        the_report
    }
}

/// 🚀 The whole `ingest` command: make sure the index exists, list what's pending,
/// ingest it, then log how many documents the index holds now.
pub async fn run_ingest(coordinator: &Coordinator) -> Result<IngestionReport> {
    let the_index = &coordinator.settings.index;
    ensure_index(coordinator.store.as_ref(), the_index, &ChatEvent::index_settings()).await?;

    let the_pending = coordinator.source.list_pending().await?;
    if the_pending.is_empty() {
        info!("💤 nothing pending. a quiet day in the archive.");
        return Ok(IngestionReport::default());
    }
    info!("📂 {} files pending, {} workers", the_pending.len(), coordinator.settings.max_workers);

    let the_report = coordinator.ingest(the_pending).await;

    match coordinator.store.count(the_index).await {
        Ok(count) => info!("📊 '{}' now holds {} documents", the_index, count),
        Err(err) => warn!("⚠️ couldn't count '{}' after ingesting: {}", the_index, err),
    }
    for file in the_report.retryable() {
        debug!("🔁 retry candidate: {}", file);
    }
    Ok(the_report)
}
