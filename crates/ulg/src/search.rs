//! 🔭 The search result assembler: run the query, reshape the hits, attach thumbnails.
//!
//! The public result shape is a contract with the frontend. Field names here are
//! renamed from storage on purpose (`authorName` → `author`) and must stay put.
//! Derived fields (`thumbnailUrl`, `authorIconUrl`, `timestampSec`) are computed after
//! the query and degrade to empty/zero when the inputs are missing. Never an error.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::app_config::AppConfig;
use crate::backends::{DocumentStore, SearchHits, SearchRequest, StoreBackend, StoredHit};
use crate::common::{extract_video_id, parse_elapsed_seconds};
use crate::errors::StoreError;
use crate::query::{SearchParams, build_query};
use crate::thumbnails::ThumbnailDeriver;

/// 📏 The video list is small enough to fetch in one go; this is the store's default window cap.
pub const VIDEO_LIST_SIZE: u64 = 10_000;

/// 📄 One result as the frontend sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub video_id: String,
    pub video_title: String,
    pub datetime: String,
    pub elapsed_time: String,
    /// ⏱️ `elapsedTime` in seconds, 0 when it doesn't parse
    pub timestamp_sec: i64,
    pub message: String,
    pub author: String,
    pub author_channel_id: String,
    pub thumbnail_url: String,
    pub author_icon_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub total: u64,
    pub results: Vec<SearchResult>,
}

/// 📼 One entry of `GET /videos`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSummary {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    #[serde(rename = "publishedAt")]
    pub published_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoList {
    pub videos: Vec<VideoSummary>,
}

fn text(source: &Value, field: &str) -> String {
    source.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

// -- a missing index is an empty archive, not a broken one
fn is_missing_index(err: &StoreError) -> bool {
    matches!(err, StoreError::Rejected { status, .. } if *status == StatusCode::NOT_FOUND)
}

/// 🎯 Stateless apart from the shared store handle. Clone it into every request.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    store: Arc<StoreBackend>,
    chat_logs_index: String,
    videos_index: String,
    thumbnails: ThumbnailDeriver,
    author_icon_base_url: String,
}

impl SearchEngine {
    pub fn new(
        store: Arc<StoreBackend>,
        chat_logs_index: impl Into<String>,
        videos_index: impl Into<String>,
        thumbnails: ThumbnailDeriver,
        author_icon_base_url: impl Into<String>,
    ) -> Self {
        let author_icon_base_url: String = author_icon_base_url.into();
        Self {
            store,
            chat_logs_index: chat_logs_index.into(),
            videos_index: videos_index.into(),
            thumbnails,
            author_icon_base_url: author_icon_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(store: Arc<StoreBackend>, config: &AppConfig) -> Self {
        Self::new(
            store,
            config.elasticsearch.chat_logs_index.clone(),
            config.elasticsearch.videos_index.clone(),
            ThumbnailDeriver::new(
                config.search.thumbnail_base_url.clone(),
                config.search.thumbnail_extension.clone(),
            ),
            config.search.author_icon_base_url.clone(),
        )
    }

    fn author_icon_url(&self, channel_id: &str) -> String {
        if channel_id.is_empty() {
            return String::new();
        }
        format!("{}/{}.webp", self.author_icon_base_url, channel_id)
    }

    fn to_result(&self, hit: StoredHit) -> SearchResult {
        let the_source = &hit.source;
        let video_id = text(the_source, "videoId");
        let elapsed_time = text(the_source, "elapsedTime");
        let author_channel_id = text(the_source, "authorChannelId");
        let the_stored_id = text(the_source, "id");
        SearchResult {
            id: if the_stored_id.is_empty() { hit.id } else { the_stored_id },
            thumbnail_url: self.thumbnails.derive(&video_id, &elapsed_time),
            author_icon_url: self.author_icon_url(&author_channel_id),
            timestamp_sec: parse_elapsed_seconds(&elapsed_time).unwrap_or(0),
            video_title: text(the_source, "videoTitle"),
            datetime: text(the_source, "datetime"),
            message: text(the_source, "message"),
            author: text(the_source, "authorName"),
            video_id,
            elapsed_time,
            author_channel_id,
        }
    }

    /// 🔎 One page of chat search results plus the full match count.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchResponse, StoreError> {
        let the_request = build_query(params);
        debug!("🔎 searching '{}': {}", self.chat_logs_index, the_request.query);
        let the_hits = match self.store.search(&self.chat_logs_index, &the_request).await {
            Ok(hits) => hits,
            Err(err) if is_missing_index(&err) => SearchHits::default(),
            Err(err) => return Err(err),
        };
        Ok(SearchResponse {
            total: the_hits.total,
            results: the_hits.hits.into_iter().map(|hit| self.to_result(hit)).collect(),
        })
    }

    /// 📼 Every known video, newest first, one entry per video id.
    pub async fn list_videos(&self) -> Result<VideoList, StoreError> {
        let the_request = SearchRequest {
            query: json!({ "match_all": {} }),
            sort: json!([{ "publishedAt": { "order": "desc" } }]),
            from: 0,
            size: VIDEO_LIST_SIZE,
        };
        let the_hits = match self.store.search(&self.videos_index, &the_request).await {
            Ok(hits) => hits,
            Err(err) if is_missing_index(&err) => SearchHits::default(),
            Err(err) => return Err(err),
        };

        let mut the_seen = HashSet::new();
        let mut the_videos = Vec::new();
        for hit in the_hits.hits {
            let the_source = &hit.source;
            let the_id = extract_video_id(&text(the_source, "video_url"))
                .or_else(|| Some(text(the_source, "videoId")).filter(|id| !id.is_empty()))
                .unwrap_or(hit.id);
            if !the_seen.insert(the_id.clone()) {
                continue;
            }
            the_videos.push(VideoSummary {
                video_id: the_id,
                title: text(the_source, "title"),
                thumbnail_url: text(the_source, "thumbnail_url"),
                published_at: text(the_source, "publishedAt"),
            });
        }
        Ok(VideoList { videos: the_videos })
    }
}
