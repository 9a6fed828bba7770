//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN. INT. SERVER ROOM, 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. One engineer, alone,
//! stares into the abyss of a RED cluster. The abyss stares back and
//! offers a 429. Somewhere, eleven thousand superchats wait to be indexed.
//!
//! "I'll just re-ingest it," they whispered. "It'll be fast," they said.
//!
//! 🚀 This module is the only place that speaks HTTP to the cluster: `_bulk`,
//! `_search`, `_count`, and HEAD/PUT on the index itself. It does not retry.
//! It does not buffer. It turns transport failures into `StoreError::Unavailable`
//! and non-2xx answers into `StoreError::Rejected`, and lets the caller decide
//! how sad to be about it.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::app_config::ElasticsearchConfig;
use crate::backends::{DocumentStore, SearchHits, SearchRequest, StoredHit};
use crate::bulk::{BulkOutcome, BulkPayload};
use crate::errors::StoreError;

/// 📡 A reqwest client plus the config that says where and as whom.
///
/// Clone-cheap (the client is an `Arc` inside), so one of these is shared by every
/// ingestion worker and every search request.
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchStore {
    /// 🚀 Build the HTTP client. No network traffic happens here; `ping` is for that.
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;
        Ok(Self { client, config })
    }

    // -- 📡 trim_end_matches('/'): one slash of difference, infinite suffering of difference
    fn url(&self, path: &str) -> String {
        let base = self.config.url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }

    /// 🔒 API key wins over basic auth. This is not a democracy.
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📬 Send, then demand a 2xx. The body of a failure comes along for the postmortem.
    async fn send_expecting_success(&self, request: RequestBuilder) -> Result<String, StoreError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(StoreError::rejected(status, body))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponseBody {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

// -- ES 7+ says {"value": n, "relation": "eq"}; ancient clusters say just n. we speak both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Object { value: u64 },
    Bare(u64),
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
}

#[derive(Debug, Deserialize)]
struct CountResponseBody {
    count: u64,
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    /// 📡 "Hello? Is this thing on?" A GET on the root, so a bad URL or a sleeping
    /// cluster fails loudly at startup rather than quietly 50,000 docs later.
    async fn ping(&self) -> Result<(), StoreError> {
        let response = self.authorized(self.client.get(self.url(""))).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("✅ cluster at {} answered the door", self.config.url);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::rejected(status, body))
        }
    }

    /// 📡 POST the rendered NDJSON to `/_bulk`. The index rides in each action line.
    async fn bulk_write(&self, index: &str, payload: BulkPayload) -> Result<BulkOutcome, StoreError> {
        debug!(
            "📡 sending {} docs ({} bytes) to {}/_bulk",
            payload.item_count,
            payload.body.len(),
            index
        );
        // ⚠️ Content-Type is application/x-ndjson, not application/json. VERY important.
        let request = self
            .client
            .post(self.url("_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(payload.body);
        let body = self.send_expecting_success(request).await?;
        let outcome = BulkOutcome::from_response(&body).map_err(|e| StoreError::Decode(format!("{e:#}")))?;
        trace!(
            "🚀 bulk landed: {} ok, {} failed",
            outcome.succeeded,
            outcome.failed
        );
        Ok(outcome)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits, StoreError> {
        let the_body = json!({
            "query": request.query,
            "sort": request.sort,
            "from": request.from,
            "size": request.size,
            "track_total_hits": true,
        });
        trace!("🔎 {}/_search {}", index, the_body);
        let body = self
            .send_expecting_success(self.client.post(self.url(&format!("{index}/_search"))).json(&the_body))
            .await?;
        let the_response: SearchResponseBody = serde_json::from_str(&body)?;
        let total = match the_response.hits.total {
            Some(TotalHits::Object { value }) | Some(TotalHits::Bare(value)) => value,
            None => the_response.hits.hits.len() as u64,
        };
        Ok(SearchHits {
            total,
            hits: the_response
                .hits
                .hits
                .into_iter()
                .map(|hit| StoredHit {
                    id: hit.id,
                    source: hit.source,
                })
                .collect(),
        })
    }

    async fn head_index(&self, index: &str) -> Result<bool, StoreError> {
        let response = self.authorized(self.client.head(self.url(index))).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::rejected(status, String::new())),
        }
    }

    async fn create_index(&self, index: &str, settings: &Value) -> Result<(), StoreError> {
        self.send_expecting_success(self.client.put(self.url(index)).json(settings))
            .await?;
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64, StoreError> {
        let body = self
            .send_expecting_success(self.client.get(self.url(&format!("{index}/_count"))))
            .await?;
        let the_count: CountResponseBody = serde_json::from_str(&body)?;
        Ok(the_count.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkAction, encode_bulk};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ElasticsearchConfig {
        ElasticsearchConfig {
            url: format!("{}/", server.uri()),
            username: None,
            password: None,
            api_key: Some("s3cr3t".into()),
            chat_logs_index: "youtube-chat-logs".into(),
            videos_index: "videos".into(),
            connect_timeout_secs: 2,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn the_one_where_bulk_goes_out_as_ndjson_with_the_api_key() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(header("Authorization", "ApiKey s3cr3t"))
            .and(body_string_contains(r#""_index":"chat""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": false,
                "items": [{"index": {"_id": "a", "status": 201}}]
            })))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_store = ElasticsearchStore::new(config_for(&the_server))?;
        let the_payload = encode_bulk("chat", &[(BulkAction::Index { id: None }, json!({"m": 1}))])?;
        let the_outcome = the_store.bulk_write("chat", the_payload).await?;
        assert!(the_outcome.is_clean());
        assert_eq!(the_outcome.succeeded, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_500_on_bulk_is_a_rejection_not_a_panic() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(500).set_body_string("shard on fire"))
            .mount(&the_server)
            .await;

        let the_store = ElasticsearchStore::new(config_for(&the_server))?;
        let the_payload = encode_bulk("chat", &[(BulkAction::Index { id: None }, json!({}))])?;
        match the_store.bulk_write("chat", the_payload).await {
            Err(StoreError::Rejected { status, body }) => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "shard on fire");
            }
            other => panic!("💀 expected a rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_search_reads_total_and_hits() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/youtube-chat-logs/_search"))
            .and(body_string_contains("track_total_hits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": {
                    "total": {"value": 250, "relation": "eq"},
                    "hits": [{"_id": "x1", "_source": {"message": "hello"}}]
                }
            })))
            .mount(&the_server)
            .await;

        let the_store = ElasticsearchStore::new(config_for(&the_server))?;
        let the_hits = the_store
            .search(
                "youtube-chat-logs",
                &SearchRequest {
                    query: json!({"match_all": {}}),
                    sort: json!([{"datetime": {"order": "desc"}}]),
                    from: 100,
                    size: 100,
                },
            )
            .await?;
        assert_eq!(the_hits.total, 250);
        assert_eq!(the_hits.hits[0].id, "x1");
        assert_eq!(the_hits.hits[0].source["message"], "hello");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_head_index_knows_404_from_failure() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/exists"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&the_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&the_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&the_server)
            .await;

        let the_store = ElasticsearchStore::new(config_for(&the_server))?;
        assert!(the_store.head_index("exists").await?);
        assert!(!the_store.head_index("missing").await?);
        assert!(the_store.head_index("forbidden").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_count_and_create_do_their_one_job() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/_count"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 42})))
            .mount(&the_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/videos"))
            .and(body_string_contains("mappings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_store = ElasticsearchStore::new(config_for(&the_server))?;
        assert_eq!(the_store.count("videos").await?, 42);
        the_store
            .create_index("videos", &json!({"mappings": {"properties": {}}}))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_ping_knows_a_cluster_from_a_bouncer() -> Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("Authorization", "ApiKey s3cr3t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tagline": "You Know, for Search"})))
            .expect(1)
            .mount(&the_server)
            .await;
        ElasticsearchStore::new(config_for(&the_server))?.ping().await?;

        let the_grumpy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("missing authentication credentials"))
            .mount(&the_grumpy_server)
            .await;
        let the_error = ElasticsearchStore::new(config_for(&the_grumpy_server))?
            .ping()
            .await
            .expect_err("💀 a 401 is not a healthy cluster");
        assert!(!the_error.is_unavailable());
        assert!(the_error.to_string().contains("401"), "got {the_error}");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home() -> Result<()> {
        // -- 📡 a port nothing listens on. the request goes out and the void sends back ECONNREFUSED.
        let the_config = ElasticsearchConfig {
            url: "http://127.0.0.1:1".into(),
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            api_key: None,
            chat_logs_index: "c".into(),
            videos_index: "v".into(),
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        };
        let the_store = ElasticsearchStore::new(the_config)?;
        let the_error = the_store.count("c").await.expect_err("💀 nobody should be listening on port 1");
        assert!(the_error.is_unavailable(), "got {the_error:?}");
        Ok(())
    }
}
