//! 📡 Bulk Payload Encoder: formatting documents for the bulk API's peculiar tastes 🚀
//!
//! 🎬 COLD OPEN. INT. ELASTICSEARCH CLUSTER, BULK ENDPOINT, HIGH NOON
//!
//! The bulk API has rules.
//!
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: The trailing newline on the whole body matters. It MATTERS.
//!          Three engineers lost weekends to this. One of them still flinches at `\n`.
//!
//! This module turns `(BulkAction, document)` pairs into one `_bulk` body, and turns
//! the cluster's answer back into counts we can put in a report. Chat logs go in as
//! plain `index` (append). Anything with a stable identity goes in as
//! `update` + `doc_as_upsert`, which is how a video keeps its thumbnail flags while
//! its title gets refreshed. 🦆

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// 🎬 What the cluster should do with one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    /// 📥 append. `_id` only when the caller insists, otherwise ES mints one
    Index { id: Option<String> },
    /// 🔄 merge into the doc with this id, creating it if it doesn't exist yet
    Upsert { id: String },
}

/// 📦 A rendered `_bulk` body, plus how many documents are inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPayload {
    pub body: String,
    pub item_count: usize,
}

impl BulkPayload {
    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }
}

fn action_line(action: &BulkAction, index: &str) -> Value {
    match action {
        BulkAction::Index { id: Some(id) } => json!({ "index": { "_index": index, "_id": id } }),
        BulkAction::Index { id: None } => json!({ "index": { "_index": index } }),
        BulkAction::Upsert { id } => json!({ "update": { "_index": index, "_id": id } }),
    }
}

/// 🔄 Encode every pair into one NDJSON body, trailing newline included.
///
/// Upserts wrap the source as `{"doc": .., "doc_as_upsert": true}`; plain index
/// actions send the document as-is.
pub fn encode_bulk<T: Serialize>(index: &str, documents: &[(BulkAction, T)]) -> Result<BulkPayload> {
    let mut the_body = String::new();
    for (action, document) in documents {
        let the_action = serde_json::to_string(&action_line(action, index)).context(
            "💀 Failed to serialize bulk action metadata. The JSON that describes JSON has \
             failed to become JSON. Alanis Morissette is writing another verse.",
        )?;
        let the_source = match action {
            BulkAction::Index { .. } => serde_json::to_string(document),
            BulkAction::Upsert { .. } => serde_json::to_string(&json!({
                "doc": document,
                "doc_as_upsert": true,
            })),
        }
        .context("💀 A document refused to become JSON. It had one job.")?;

        the_body.push_str(&the_action);
        the_body.push('\n');
        the_body.push_str(&the_source);
        the_body.push('\n');
    }
    Ok(BulkPayload {
        body: the_body,
        item_count: documents.len(),
    })
}

/// 📬 What came back from `_bulk`, boiled down to what the coordinator branches on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub errors: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// 🔎 the first per-item `error.reason`, so the log line says something useful
    pub first_error_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

impl BulkOutcome {
    /// 🔍 Parse a `_bulk` response body. Each item is `{"<action>": {status, error?}}`.
    pub fn from_response(body: &str) -> Result<Self> {
        let the_response: BulkResponseBody = serde_json::from_str(body)
            .context("💀 The bulk response was not the JSON we were promised")?;

        let mut the_outcome = BulkOutcome {
            errors: the_response.errors,
            ..Default::default()
        };
        for item in &the_response.items {
            // -- one key per item: "index", "create", "update" or "delete". we don't care which.
            let Some(result) = item.values().next() else {
                continue;
            };
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
            let the_error = result.get("error");
            if the_error.is_some() || !(200..300).contains(&status) {
                the_outcome.failed += 1;
                if the_outcome.first_error_reason.is_none() {
                    the_outcome.first_error_reason = Some(
                        the_error
                            .and_then(|e| e.get("reason").and_then(Value::as_str))
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("item status {status}")),
                    );
                }
            } else {
                the_outcome.succeeded += 1;
            }
        }
        Ok(the_outcome)
    }

    /// ✅ no item-level failures anywhere
    pub fn is_clean(&self) -> bool {
        !self.errors && self.failed == 0
    }
}
