//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Two seams, two traits:
//! - `DocumentStore`: the search cluster. Bulk write, search, head/create index, count.
//! - `IngestionSource`: where the chat log files live. List, read, relocate, remove.
//!
//! 🎭 This module is the casting agency. Need a real Elasticsearch? A directory on disk?
//! An S3 bucket? Something that lives entirely in RAM for tests? We've got a backend
//! for that. Each seam has an enum that dispatches to the concrete type, so the
//! coordinator never has to know whether it's talking to a cluster or a `Vec`.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::bulk::{BulkOutcome, BulkPayload};
use crate::errors::StoreError;
use crate::lifecycle::{FileLocation, FileRef};

pub mod elasticsearch;
pub mod in_mem;
pub mod local_dir;
pub mod s3;

pub use elasticsearch::ElasticsearchStore;
pub use in_mem::{InMemorySource, InMemoryStore};
pub use local_dir::LocalDirSource;
pub use s3::S3Source;

// ===== Document store =====

/// 🔎 One search request, already shaped for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Value,
    pub sort: Value,
    pub from: u64,
    pub size: u64,
}

/// 📄 One stored document as it came back from a search.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHit {
    pub id: String,
    pub source: Value,
}

/// 📬 The total match count and the requested page of hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: u64,
    pub hits: Vec<StoredHit>,
}

/// 🗄️ The document store. `&self` everywhere: one handle is shared by every worker
/// and every search request.
///
/// # Contract
/// - `bulk_write` returns `Ok` whenever the store answered the bulk request at all,
///   even if some items failed. Item failures live in the `BulkOutcome`.
/// - `head_index` is `Ok(false)` for a missing index, not an error.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
    async fn bulk_write(&self, index: &str, payload: BulkPayload) -> Result<BulkOutcome, StoreError>;
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits, StoreError>;
    async fn head_index(&self, index: &str) -> Result<bool, StoreError>;
    async fn create_index(&self, index: &str, settings: &Value) -> Result<(), StoreError>;
    async fn count(&self, index: &str) -> Result<u64, StoreError>;
}

/// 🎭 The many faces of a document store. Universal remote, async edition.
#[derive(Debug)]
pub enum StoreBackend {
    Elasticsearch(ElasticsearchStore),
    InMemory(InMemoryStore),
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.ping().await,
            StoreBackend::InMemory(mem) => mem.ping().await,
        }
    }

    async fn bulk_write(&self, index: &str, payload: BulkPayload) -> Result<BulkOutcome, StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.bulk_write(index, payload).await,
            StoreBackend::InMemory(mem) => mem.bulk_write(index, payload).await,
        }
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits, StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.search(index, request).await,
            StoreBackend::InMemory(mem) => mem.search(index, request).await,
        }
    }

    async fn head_index(&self, index: &str) -> Result<bool, StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.head_index(index).await,
            StoreBackend::InMemory(mem) => mem.head_index(index).await,
        }
    }

    async fn create_index(&self, index: &str, settings: &Value) -> Result<(), StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.create_index(index, settings).await,
            StoreBackend::InMemory(mem) => mem.create_index(index, settings).await,
        }
    }

    async fn count(&self, index: &str) -> Result<u64, StoreError> {
        match self {
            StoreBackend::Elasticsearch(es) => es.count(index).await,
            StoreBackend::InMemory(mem) => mem.count(index).await,
        }
    }
}

/// 🏗️ Create `index` with `settings` unless it already exists. Returns whether it was created.
pub async fn ensure_index<S: DocumentStore + ?Sized>(store: &S, index: &str, settings: &Value) -> Result<bool> {
    let exists = store
        .head_index(index)
        .await
        .with_context(|| format!("💀 Couldn't even ask whether index '{index}' exists. The cluster is not taking questions."))?;
    if exists {
        debug!("✅ index '{}' already exists, leaving its mappings alone", index);
        return Ok(false);
    }
    store
        .create_index(index, settings)
        .await
        .with_context(|| format!("💀 Index '{index}' doesn't exist and refused to be born"))?;
    info!("🏗️ created index '{}'", index);
    Ok(true)
}

// ===== Ingestion source =====

/// 🚰 Where ingestion files come from and where they go when we're done with them.
///
/// # Contract
/// - `list_pending` lists only the pending location.
/// - `relocate` is a move: after it succeeds the file is gone from its old location.
#[async_trait]
pub trait IngestionSource: std::fmt::Debug + Send + Sync {
    async fn list_pending(&self) -> Result<Vec<FileRef>>;
    async fn read(&self, file: &FileRef) -> Result<Vec<u8>>;
    /// ✍️ Write a new file into `location`. The converters use this to drop files into `pending`.
    async fn write(&self, location: FileLocation, name: &str, contents: Vec<u8>) -> Result<FileRef>;
    async fn exists(&self, location: FileLocation, name: &str) -> Result<bool>;
    async fn relocate(&self, file: &FileRef, to: FileLocation) -> Result<FileRef>;
    async fn remove(&self, file: &FileRef) -> Result<()>;
}

/// 🎭 Local directory, S3 bucket, or RAM. The coordinator can't tell and doesn't care.
#[derive(Debug)]
pub enum SourceBackend {
    Local(LocalDirSource),
    S3(S3Source),
    InMemory(InMemorySource),
}

#[async_trait]
impl IngestionSource for SourceBackend {
    async fn list_pending(&self) -> Result<Vec<FileRef>> {
        match self {
            SourceBackend::Local(s) => s.list_pending().await,
            SourceBackend::S3(s) => s.list_pending().await,
            SourceBackend::InMemory(s) => s.list_pending().await,
        }
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>> {
        match self {
            SourceBackend::Local(s) => s.read(file).await,
            SourceBackend::S3(s) => s.read(file).await,
            SourceBackend::InMemory(s) => s.read(file).await,
        }
    }

    async fn write(&self, location: FileLocation, name: &str, contents: Vec<u8>) -> Result<FileRef> {
        match self {
            SourceBackend::Local(s) => s.write(location, name, contents).await,
            SourceBackend::S3(s) => s.write(location, name, contents).await,
            SourceBackend::InMemory(s) => s.write(location, name, contents).await,
        }
    }

    async fn exists(&self, location: FileLocation, name: &str) -> Result<bool> {
        match self {
            SourceBackend::Local(s) => s.exists(location, name).await,
            SourceBackend::S3(s) => s.exists(location, name).await,
            SourceBackend::InMemory(s) => s.exists(location, name).await,
        }
    }

    async fn relocate(&self, file: &FileRef, to: FileLocation) -> Result<FileRef> {
        match self {
            SourceBackend::Local(s) => s.relocate(file, to).await,
            SourceBackend::S3(s) => s.relocate(file, to).await,
            SourceBackend::InMemory(s) => s.relocate(file, to).await,
        }
    }

    async fn remove(&self, file: &FileRef) -> Result<()> {
        match self {
            SourceBackend::Local(s) => s.remove(file).await,
            SourceBackend::S3(s) => s.remove(file).await,
            SourceBackend::InMemory(s) => s.remove(file).await,
        }
    }
}

/// 📄 Ingestion files are NDJSON, whichever extension the producer felt like that day.
pub fn is_ingestion_file(name: &str) -> bool {
    name.ends_with(".json") || name.ends_with(".ndjson")
}
