//! 📦 In-memory backends: a document store and an ingestion source that never forget.
//! Unlike my dad, who forgot my soccer game in 1998.
//!
//! 🎯 Designed entirely for testing. The store speaks just enough query DSL
//! (`bool`, `match_all`, `term`, `range`, `match_phrase`, `multi_match`, one sort key,
//! `from`/`size` inside the same result window) to run the exact queries the search
//! engine builds, and it can be told to misbehave on demand: go offline, or reject
//! specific documents the way a mapping conflict would.
//!
//! 🔒 Everything lives behind `Arc<tokio::sync::Mutex<..>>` so clones share state.
//! Tests keep one clone, hand the other to the pipeline, and peek afterwards.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value, json};

use crate::backends::{DocumentStore, IngestionSource, SearchHits, SearchRequest, StoredHit, is_ingestion_file};
use crate::bulk::{BulkOutcome, BulkPayload};
use crate::errors::StoreError;
use crate::lifecycle::{FileLocation, FileRef};
use crate::query::MAX_RESULT_WINDOW;

#[derive(Debug, Default)]
struct MemIndex {
    settings: Value,
    docs: Vec<StoredHit>,
}

#[derive(Debug, Default)]
struct StoreState {
    indices: BTreeMap<String, MemIndex>,
    next_id: u64,
    offline: bool,
    rejections: Vec<(String, Value)>,
}

/// 🗄️ A document store that lives in a `BTreeMap`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔌 Pull the plug (or plug it back in). Offline means every call is `Unavailable`.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// 🙅 Reject every bulk item whose document has `field == value`, like a mapping conflict would.
    pub async fn reject_documents_where(&self, field: &str, value: Value) {
        self.state.lock().await.rejections.push((field.to_string(), value));
    }

    /// 👀 Every stored source in `index`, in insertion order.
    pub async fn documents(&self, index: &str) -> Vec<Value> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|idx| idx.docs.iter().map(|hit| hit.source.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn index_settings(&self, index: &str) -> Option<Value> {
        self.state.lock().await.indices.get(index).map(|idx| idx.settings.clone())
    }
}

fn offline_error() -> StoreError {
    StoreError::Unavailable("in-memory store is offline (error sending request)".to_string())
}

// -- 🔎 dotted path lookup. "money.amount" walks into objects, "authorName.keyword" is just "authorName".
fn field<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    let the_path = path.strip_suffix(".keyword").unwrap_or(path);
    the_path.split('.').try_fold(source, |value, segment| value.get(segment))
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn first_entry(object: &Value) -> Option<(&String, &Value)> {
    object.as_object().and_then(|map| map.iter().next())
}

/// 🧮 Does `source` satisfy `query`? Unknown clause types match nothing.
fn matches(query: &Value, source: &Value) -> bool {
    let Some((kind, body)) = first_entry(query) else {
        return false;
    };
    match kind.as_str() {
        "match_all" => true,
        "bool" => {
            let all = |key: &str| {
                body.get(key)
                    .and_then(Value::as_array)
                    .map(|clauses| clauses.iter().all(|clause| matches(clause, source)))
                    .unwrap_or(true)
            };
            let none = body
                .get("must_not")
                .and_then(Value::as_array)
                .map(|clauses| !clauses.iter().any(|clause| matches(clause, source)))
                .unwrap_or(true);
            all("must") && all("filter") && none
        }
        "term" => first_entry(body)
            .map(|(path, expected)| {
                let expected = expected.get("value").unwrap_or(expected);
                field(source, path) == Some(expected)
            })
            .unwrap_or(false),
        "range" => first_entry(body)
            .map(|(path, bounds)| {
                let Some(actual) = field(source, path) else {
                    return false;
                };
                let check = |key: &str, ok: fn(Ordering) -> bool| match bounds.get(key) {
                    Some(bound) => compare(actual, bound).map(ok).unwrap_or(false),
                    None => true,
                };
                check("gte", Ordering::is_ge)
                    && check("gt", Ordering::is_gt)
                    && check("lte", Ordering::is_le)
                    && check("lt", Ordering::is_lt)
            })
            .unwrap_or(false),
        "match_phrase" => first_entry(body)
            .map(|(path, phrase)| {
                let phrase = phrase.get("query").unwrap_or(phrase);
                field(source, path)
                    .map(|actual| as_text(actual).contains(&as_text(phrase)))
                    .unwrap_or(false)
            })
            .unwrap_or(false),
        "multi_match" => {
            let the_terms: Vec<String> = body
                .get("query")
                .map(as_text)
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let the_fields = body.get("fields").and_then(Value::as_array).cloned().unwrap_or_default();
            // -- OR semantics, like the default operator: any term in any field
            the_fields.iter().filter_map(Value::as_str).any(|path| {
                field(source, path)
                    .map(|actual| {
                        let the_text = as_text(actual);
                        the_terms.iter().any(|term| the_text.contains(term.as_str()))
                    })
                    .unwrap_or(false)
            })
        }
        _ => false,
    }
}

fn sort_hits(hits: &mut [StoredHit], sort: &Value) {
    let Some((path, spec)) = sort.as_array().and_then(|keys| keys.first()).and_then(first_entry) else {
        return;
    };
    let descending = spec.get("order").and_then(Value::as_str) == Some("desc");
    hits.sort_by(|a, b| {
        let ordering = match (field(&a.source, path), field(&b.source, path)) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            // -- missing values sort last either way, like ES does
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if descending { ordering.reverse() } else { ordering }
    });
}

fn merge_into(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                target_map.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

fn item(action: &str, id: &str, status: u16, error: Option<&str>) -> Value {
    let mut the_result = Map::new();
    the_result.insert("_id".into(), json!(id));
    the_result.insert("status".into(), json!(status));
    if let Some(reason) = error {
        the_result.insert(
            "error".into(),
            json!({ "type": "mapper_parsing_exception", "reason": reason }),
        );
    }
    let mut the_item = Map::new();
    the_item.insert(action.to_string(), Value::Object(the_result));
    Value::Object(the_item)
}

impl StoreState {
    fn apply_bulk(&mut self, default_index: &str, body: &str) -> Result<Value, StoreError> {
        let mut the_lines = body.lines().filter(|line| !line.trim().is_empty());
        let mut the_items = Vec::new();
        let mut any_errors = false;

        while let Some(action_line) = the_lines.next() {
            let the_action: Value = serde_json::from_str(action_line)?;
            let Some(source_line) = the_lines.next() else {
                return Err(StoreError::rejected(
                    StatusCode::BAD_REQUEST,
                    "bulk body ended after an action line".into(),
                ));
            };
            let the_source: Value = serde_json::from_str(source_line)?;
            let Some((action, meta)) = first_entry(&the_action) else {
                return Err(StoreError::rejected(StatusCode::BAD_REQUEST, "empty action".into()));
            };
            let action = action.clone();
            let index = meta
                .get("_index")
                .and_then(Value::as_str)
                .unwrap_or(default_index)
                .to_string();
            let explicit_id = meta.get("_id").and_then(Value::as_str).map(str::to_string);

            let the_doc = if action == "update" {
                the_source.get("doc").cloned().unwrap_or(Value::Null)
            } else {
                the_source
            };

            let rejected = self
                .rejections
                .iter()
                .find(|(path, value)| field(&the_doc, path) == Some(value))
                .map(|(path, value)| format!("document rejected on [{path}] = {value}"));
            let id = match explicit_id {
                Some(id) => id,
                None => {
                    self.next_id += 1;
                    format!("mem-{}", self.next_id)
                }
            };
            if let Some(reason) = rejected {
                any_errors = true;
                the_items.push(item(&action, &id, 400, Some(&reason)));
                continue;
            }

            let the_index = self.indices.entry(index).or_default();
            let existing = the_index.docs.iter_mut().find(|hit| hit.id == id);
            let status = match (action.as_str(), existing) {
                ("update", Some(hit)) => {
                    merge_into(&mut hit.source, &the_doc);
                    200
                }
                (_, Some(hit)) => {
                    hit.source = the_doc;
                    200
                }
                (_, None) => {
                    the_index.docs.push(StoredHit {
                        id: id.clone(),
                        source: the_doc,
                    });
                    201
                }
            };
            the_items.push(item(&action, &id, status, None));
        }

        Ok(json!({ "errors": any_errors, "items": the_items }))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.state.lock().await.offline {
            return Err(offline_error());
        }
        Ok(())
    }

    async fn bulk_write(&self, index: &str, payload: BulkPayload) -> Result<BulkOutcome, StoreError> {
        let mut the_state = self.state.lock().await;
        if the_state.offline {
            return Err(offline_error());
        }
        let the_response = the_state.apply_bulk(index, &payload.body)?;
        BulkOutcome::from_response(&the_response.to_string()).map_err(|e| StoreError::Decode(format!("{e:#}")))
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits, StoreError> {
        let the_state = self.state.lock().await;
        if the_state.offline {
            return Err(offline_error());
        }
        let Some(the_index) = the_state.indices.get(index) else {
            return Err(StoreError::rejected(
                StatusCode::NOT_FOUND,
                format!("no such index [{index}]"),
            ));
        };
        if request.from.saturating_add(request.size) > MAX_RESULT_WINDOW {
            return Err(StoreError::rejected(
                StatusCode::BAD_REQUEST,
                format!(
                    "Result window is too large, from + size must be less than or equal to: [{MAX_RESULT_WINDOW}] but was [{}]",
                    request.from.saturating_add(request.size)
                ),
            ));
        }
        let mut the_matches: Vec<StoredHit> = the_index
            .docs
            .iter()
            .filter(|hit| matches(&request.query, &hit.source))
            .cloned()
            .collect();
        sort_hits(&mut the_matches, &request.sort);
        let total = the_matches.len() as u64;
        let hits = the_matches
            .into_iter()
            .skip(usize::try_from(request.from).unwrap_or(usize::MAX))
            .take(usize::try_from(request.size).unwrap_or(usize::MAX))
            .collect();
        Ok(SearchHits { total, hits })
    }

    async fn head_index(&self, index: &str) -> Result<bool, StoreError> {
        let the_state = self.state.lock().await;
        if the_state.offline {
            return Err(offline_error());
        }
        Ok(the_state.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, settings: &Value) -> Result<(), StoreError> {
        let mut the_state = self.state.lock().await;
        if the_state.offline {
            return Err(offline_error());
        }
        if the_state.indices.contains_key(index) {
            return Err(StoreError::rejected(
                StatusCode::BAD_REQUEST,
                format!("resource_already_exists_exception: [{index}]"),
            ));
        }
        the_state.indices.insert(
            index.to_string(),
            MemIndex {
                settings: settings.clone(),
                docs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64, StoreError> {
        let the_state = self.state.lock().await;
        if the_state.offline {
            return Err(offline_error());
        }
        Ok(the_state
            .indices
            .get(index)
            .map(|idx| idx.docs.len() as u64)
            .unwrap_or(0))
    }
}

// ===== Ingestion source =====

/// 📂 Files keyed by (location, name). A filesystem with no disk and no opinions.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    files: Arc<tokio::sync::Mutex<BTreeMap<(FileLocation, String), Vec<u8>>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🧪 Seed a pending file.
    pub async fn add_pending(&self, name: &str, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .await
            .insert((FileLocation::Pending, name.to_string()), contents.into());
    }

    /// 👀 Names of the files currently in `location`, sorted.
    pub async fn files_in(&self, location: FileLocation) -> Vec<String> {
        self.files
            .lock()
            .await
            .keys()
            .filter(|(loc, _)| *loc == location)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl IngestionSource for InMemorySource {
    async fn list_pending(&self) -> Result<Vec<FileRef>> {
        Ok(self
            .files
            .lock()
            .await
            .iter()
            .filter(|((loc, name), _)| *loc == FileLocation::Pending && is_ingestion_file(name))
            .map(|((_, name), contents)| FileRef {
                size_bytes: contents.len() as u64,
                ..FileRef::pending(name.clone())
            })
            .collect())
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>> {
        self.files
            .lock()
            .await
            .get(&(file.location, file.name.clone()))
            .cloned()
            .with_context(|| format!("💀 '{file}' is not in memory. It was never here. Or it left."))
    }

    async fn write(&self, location: FileLocation, name: &str, contents: Vec<u8>) -> Result<FileRef> {
        let size_bytes = contents.len() as u64;
        self.files.lock().await.insert((location, name.to_string()), contents);
        Ok(FileRef {
            name: name.to_string(),
            location,
            size_bytes,
        })
    }

    async fn exists(&self, location: FileLocation, name: &str) -> Result<bool> {
        Ok(self.files.lock().await.contains_key(&(location, name.to_string())))
    }

    async fn relocate(&self, file: &FileRef, to: FileLocation) -> Result<FileRef> {
        let mut the_files = self.files.lock().await;
        let Some(contents) = the_files.remove(&(file.location, file.name.clone())) else {
            bail!("💀 can't move '{file}', it isn't there");
        };
        the_files.insert((to, file.name.clone()), contents);
        Ok(file.moved_to(to))
    }

    async fn remove(&self, file: &FileRef) -> Result<()> {
        self.files.lock().await.remove(&(file.location, file.name.clone()));
        Ok(())
    }
}
