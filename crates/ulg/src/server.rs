//! 🌐 The HTTP face of the archive. Three routes, all GET, all JSON.
//!
//! ```text
//!   GET /         → {"message": "Utsulog API"}
//!   GET /search   → {total, results: [...]}
//!   GET /videos   → {videos: [...]}
//! ```
//!
//! Every query parameter is taken as an optional string and interpreted leniently, so
//! user input can never produce a 500. The only non-2xx answers come from the store:
//! unreachable → 503, anything else it refuses → 502.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::errors::StoreError;
use crate::query::SearchParams;
use crate::search::SearchEngine;

/// 🎛️ The raw query string. Strings all the way down; meaning is assigned later.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub from: Option<String>,
    /// 🐛 the frontend sends `from_`. we accept both, `from` wins when both show up.
    #[serde(rename = "from_")]
    pub from_alias: Option<String>,
    pub exact: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub author_name: Option<String>,
    pub video_id: Option<String>,
}

fn is_truthy(value: Option<&str>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

impl From<SearchQuery> for SearchParams {
    fn from(query: SearchQuery) -> Self {
        let the_offset = query
            .from
            .as_deref()
            .or(query.from_alias.as_deref())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        SearchParams {
            exact: is_truthy(query.exact.as_deref()),
            q: query.q,
            date_from: query.date_from,
            date_to: query.date_to,
            author_name: query.author_name,
            video_id: query.video_id,
            from: the_offset,
        }
    }
}

/// 💀 How a store failure looks from the outside.
struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let the_status = if self.0.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_GATEWAY
        };
        warn!("⚠️ answering {} because: {}", the_status, self.0);
        (the_status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Utsulog API" }))
}

async fn search(
    State(engine): State<Arc<SearchEngine>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<crate::search::SearchResponse>, ApiError> {
    let the_params = SearchParams::from(query);
    engine.search(&the_params).await.map(Json).map_err(ApiError)
}

async fn videos(State(engine): State<Arc<SearchEngine>>) -> Result<Json<crate::search::VideoList>, ApiError> {
    engine.list_videos().await.map(Json).map_err(ApiError)
}

pub fn router(engine: SearchEngine) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/search", get(search))
        .route("/videos", get(videos))
        .with_state(Arc::new(engine))
}

/// 🚀 Bind and serve until `shutdown` resolves. In-flight requests are allowed to finish.
pub async fn serve(engine: SearchEngine, bind: &str, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let the_listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("💀 Couldn't bind '{bind}'. Something else is probably already sitting there."))?;
    info!("🌐 search API listening on {}", the_listener.local_addr()?);
    axum::serve(the_listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
        .context("💀 the HTTP server stopped unexpectedly")?;
    info!("👋 search API shut down");
    Ok(())
}
