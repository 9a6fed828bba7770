//! 🎬 *[an archive of every chat line ever typed at a livestream]*
//! *[somewhere, a search box. somewhere else, four workers and a bulk endpoint.]*
//!
//! 📦 `ulg` turns raw livestream chat and transcript dumps into an Elasticsearch index
//! and answers searches against it.
//!
//! ```text
//!   chat_logs/*.json ──▶ Normalizer ──▶ encode_bulk ──▶ DocumentStore   (Coordinator)
//!   /search?q=…      ──▶ build_query ──▶ DocumentStore ──▶ SearchEngine ──▶ JSON
//! ```
//!
//! The CLI in `ulg-cli` is a thin shell over the functions re-exported here. 🦆

pub mod app_config;
pub mod backends;
pub mod bulk;
pub mod common;
pub mod coordinator;
pub mod errors;
pub mod lifecycle;
pub mod normalizer;
pub(crate) mod progress;
pub mod query;
pub mod search;
pub mod server;
pub mod thumbnails;
pub mod transcripts;
pub mod videos;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::{AppConfig, DataStoreConfig};
use crate::backends::{DocumentStore, ElasticsearchStore, LocalDirSource, S3Source, SourceBackend, StoreBackend};
use crate::videos::VideoCatalog;

/// 🔌 Build the Elasticsearch-backed store from config and make sure somebody answers.
/// An unreachable or unauthorized cluster is fatal here, before any file is touched.
pub async fn connect_store(config: &AppConfig) -> Result<Arc<StoreBackend>> {
    let the_store = ElasticsearchStore::new(config.elasticsearch.clone())
        .context("💀 Couldn't build the Elasticsearch client")?;
    let the_store = StoreBackend::Elasticsearch(the_store);
    the_store.ping().await.with_context(|| {
        format!(
            "💀 Elasticsearch at '{}' didn't answer the startup ping. Check elasticsearch.url and the credentials.",
            config.elasticsearch.url
        )
    })?;
    info!("🔌 connected to Elasticsearch at {}", config.elasticsearch.url);
    Ok(Arc::new(the_store))
}

/// 📂 Open whichever data store the config points at.
pub async fn open_source(config: &AppConfig) -> Result<Arc<SourceBackend>> {
    let the_source = match &config.ingest.data_store {
        DataStoreConfig::Local { root } => {
            info!("📂 ingestion files under '{}'", root.display());
            SourceBackend::Local(LocalDirSource::new(root.clone()))
        }
        DataStoreConfig::S3 {
            bucket,
            region,
            endpoint_url,
            force_path_style,
        } => {
            info!("☁️ ingestion files in s3://{}", bucket);
            SourceBackend::S3(
                S3Source::connect(bucket.clone(), region.clone(), endpoint_url.clone(), *force_path_style)
                    .await
                    .context("💀 Couldn't set up the S3 client")?,
            )
        }
    };
    Ok(Arc::new(the_source))
}

/// 📼 The catalog from `ingest.videos_ndjson`, or an empty one when none is configured.
pub async fn load_catalog(config: &AppConfig) -> Result<Arc<VideoCatalog>> {
    let the_catalog = match &config.ingest.videos_ndjson {
        Some(path) => VideoCatalog::load(path).await?,
        None => VideoCatalog::default(),
    };
    Ok(Arc::new(the_catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_pointing_at(url: &str) -> Result<AppConfig> {
        Ok(serde_json::from_value(json!({
            "elasticsearch": { "url": url, "connect_timeout_secs": 1, "request_timeout_secs": 2 }
        }))?)
    }

    #[tokio::test]
    async fn the_one_where_a_live_cluster_lets_us_in() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tagline": "You Know, for Search"})))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_store = connect_store(&config_pointing_at(&the_server.uri())?).await?;
        assert!(matches!(the_store.as_ref(), StoreBackend::Elasticsearch(_)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_answering_stops_startup() -> Result<()> {
        let the_error = connect_store(&config_pointing_at("http://127.0.0.1:1")?)
            .await
            .expect_err("💀 port 1 should not have a cluster on it");
        let the_chain = format!("{the_error:#}");
        assert!(the_chain.contains("startup ping"), "got {the_chain}");
        assert!(the_chain.contains("document store unavailable"), "got {the_chain}");
        Ok(())
    }
}
