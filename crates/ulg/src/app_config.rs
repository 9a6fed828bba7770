//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing.", every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! This is the ONLY module that looks at the process environment. Everything else
//! gets an `&AppConfig` (or a piece of one) handed to it, like a civilized program.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::normalizer::TranscriptAuthor;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// 📡 Where the cluster lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 scheme + host + port. Yes, all of it. No, `localhost` alone is not enough.
    pub url: String,
    /// 🔒 Username for basic auth. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key auth. Wins over basic auth when both are set. Hierarchy.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_logs_index")]
    pub chat_logs_index: String,
    #[serde(default = "default_videos_index")]
    pub videos_index: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_chat_logs_index() -> String {
    "youtube-chat-logs".to_string()
}

fn default_videos_index() -> String {
    "videos".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// ✍️ How chat log documents are written.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// 📥 plain `index`, ES mints the `_id`
    #[default]
    Append,
    /// 🔄 `update` + `doc_as_upsert` keyed by the event id
    Upsert,
}

/// 🗄️ Where ingestion files live. Pending, processed and error are sibling
/// directories (or key prefixes) under this root.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataStoreConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        /// 🧪 for MinIO, LocalStack and other S3 cosplayers
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        DataStoreConfig::Local {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// 🧵 files processed at once. also the cap on concurrent bulk requests.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub data_store: DataStoreConfig,
    /// 📼 the video listing, one JSON object per line; titles come from here
    #[serde(default)]
    pub videos_ndjson: Option<PathBuf>,
    /// 🎙️ directory of `*_fixed.vtt` subtitle files for `convert-vtt`
    #[serde(default)]
    pub subtitles_dir: Option<PathBuf>,
    #[serde(default)]
    pub transcript_author: TranscriptAuthor,
}

fn default_max_workers() -> usize {
    4
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            write_mode: WriteMode::default(),
            data_store: DataStoreConfig::default(),
            videos_ndjson: None,
            subtitles_dir: None,
            transcript_author: TranscriptAuthor::default(),
        }
    }
}

/// 🖼️ Static asset locations the search results point at.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default)]
    pub thumbnail_base_url: String,
    #[serde(default = "default_thumbnail_extension")]
    pub thumbnail_extension: String,
    #[serde(default)]
    pub author_icon_base_url: String,
}

fn default_thumbnail_extension() -> String {
    "webp".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            thumbnail_base_url: String::new(),
            thumbnail_extension: default_thumbnail_extension(),
            author_icon_base_url: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

impl AppConfig {
    /// 🚨 The configuration-fatal checks. Fail here, at startup, not 40k documents in.
    pub fn validate(&self) -> anyhow::Result<()> {
        let the_url = self.elasticsearch.url.trim();
        if the_url.is_empty() {
            bail!("💀 elasticsearch.url is empty. We can't index into the void. We tried. The void has no _bulk endpoint.");
        }
        if !(the_url.starts_with("http://") || the_url.starts_with("https://")) {
            bail!(
                "💀 elasticsearch.url '{}' needs a scheme (http:// or https://). The cluster is not psychic.",
                the_url
            );
        }
        if self.elasticsearch.password.is_some() && self.elasticsearch.username.is_none() {
            bail!("💀 elasticsearch.password is set but elasticsearch.username is not. A password for nobody.");
        }
        if self.ingest.max_workers == 0 {
            bail!("💀 ingest.max_workers is 0. Zero workers process zero files. Forever.");
        }
        if let DataStoreConfig::S3 { bucket, .. } = &self.ingest.data_store {
            if bucket.trim().is_empty() {
                bail!("💀 ingest.data_store.s3.bucket is empty. Buckets need names. Even the sad ones.");
            }
        }
        Ok(())
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`ULG_*`, nested with `__`, so
/// `ULG_ELASTICSEARCH__URL` lands in `elasticsearch.url`) with an optional TOML file.
///   - `config_file_name` is None → env vars only.
///   - `config_file_name` is Some → env vars + TOML file, merged. TOML wins on conflicts.
///
/// 💀 Returns an error if the config is unparseable OR fails validation.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ULG_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    extract_and_validate(config, config_file_name)
}

fn extract_and_validate(config: Figment, config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    // 💬 an error message that TELLS you what went wrong. None of that "error: error" energy.
    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ULG_*). \
             The file exists in our hearts, but apparently not in a shape serde accepts.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ULG_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    let the_config: AppConfig = config.extract().context(context_msg)?;
    the_config
        .validate()
        .context("💀 Configuration parsed, but it describes a system that cannot work")?;
    Ok(the_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 tempfile refused to exist");
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        the_file
    }

    fn from_toml_only(contents: &str) -> anyhow::Result<AppConfig> {
        let the_file = write_test_config(contents);
        extract_and_validate(Figment::new().merge(Toml::file(the_file.path())), Some(the_file.path()))
    }

    #[test]
    fn the_one_where_a_minimal_config_gets_all_the_defaults() -> anyhow::Result<()> {
        let the_config = from_toml_only(
            r#"
            [elasticsearch]
            url = "http://localhost:9200"
            "#,
        )?;

        assert_eq!(the_config.elasticsearch.chat_logs_index, "youtube-chat-logs");
        assert_eq!(the_config.elasticsearch.videos_index, "videos");
        assert_eq!(the_config.ingest.max_workers, 4);
        assert_eq!(the_config.ingest.write_mode, WriteMode::Append);
        assert_eq!(
            the_config.ingest.data_store,
            DataStoreConfig::Local {
                root: PathBuf::from(".")
            }
        );
        assert_eq!(the_config.search.thumbnail_extension, "webp");
        assert_eq!(the_config.server.bind, "0.0.0.0:8000");
        assert_eq!(the_config.ingest.transcript_author, TranscriptAuthor::default());
        Ok(())
    }

    #[test]
    fn the_one_where_the_s3_store_and_upserts_are_chosen() -> anyhow::Result<()> {
        let the_config = from_toml_only(
            r#"
            [elasticsearch]
            url = "https://es.example.com"
            api_key = "c2VjcmV0"

            [ingest]
            max_workers = 2
            write_mode = "upsert"

            [ingest.data_store.s3]
            bucket = "chat-archive"
            endpoint_url = "http://localhost:9000"
            force_path_style = true

            [search]
            thumbnail_base_url = "https://cdn.example.com/thumbnails"
            "#,
        )?;

        assert_eq!(the_config.ingest.max_workers, 2);
        assert_eq!(the_config.ingest.write_mode, WriteMode::Upsert);
        match the_config.ingest.data_store {
            DataStoreConfig::S3 {
                bucket,
                endpoint_url,
                force_path_style,
                region,
            } => {
                assert_eq!(bucket, "chat-archive");
                assert_eq!(endpoint_url.as_deref(), Some("http://localhost:9000"));
                assert!(force_path_style);
                assert_eq!(region, None);
            }
            honestly_who_knows => panic!(
                "💀 Expected an S3 data store, but serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
        Ok(())
    }

    #[test]
    fn the_one_where_a_missing_url_stops_the_show() {
        let the_result = from_toml_only(
            r#"
            [ingest]
            max_workers = 2
            "#,
        );
        assert!(the_result.is_err(), "no elasticsearch section, no startup");
    }

    #[test]
    fn the_one_where_zero_workers_is_configuration_fatal() {
        let the_result = from_toml_only(
            r#"
            [elasticsearch]
            url = "http://localhost:9200"
            [ingest]
            max_workers = 0
            "#,
        );
        let the_message = format!("{:#}", the_result.expect_err("💀 zero workers should be refused"));
        assert!(the_message.contains("max_workers"), "got: {the_message}");
    }

    #[test]
    fn the_one_where_a_schemeless_url_is_refused() {
        assert!(
            from_toml_only(
                r#"
                [elasticsearch]
                url = "localhost:9200"
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn the_one_where_an_empty_bucket_is_refused() {
        assert!(
            from_toml_only(
                r#"
                [elasticsearch]
                url = "http://localhost:9200"
                [ingest.data_store.s3]
                bucket = ""
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn the_one_where_env_vars_alone_are_enough_and_nested_keys_split_on_double_underscore() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ULG_ELASTICSEARCH__URL", "http://es.internal:9200");
            jail.set_env("ULG_ELASTICSEARCH__CHAT_LOGS_INDEX", "chat-v2");
            jail.set_env("ULG_INGEST__MAX_WORKERS", "8");
            jail.set_env("ULG_INGEST__WRITE_MODE", "upsert");
            jail.set_env("ULG_SERVER__BIND", "127.0.0.1:9000");

            let the_config = load_config(None).map_err(|err| format!("{err:#}"))?;
            assert_eq!(the_config.elasticsearch.url, "http://es.internal:9200");
            assert_eq!(the_config.elasticsearch.chat_logs_index, "chat-v2");
            assert_eq!(the_config.ingest.max_workers, 8);
            assert_eq!(the_config.ingest.write_mode, WriteMode::Upsert);
            assert_eq!(the_config.server.bind, "127.0.0.1:9000");
            Ok(())
        });
    }

    #[test]
    fn the_one_where_the_toml_file_outranks_the_environment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ULG_ELASTICSEARCH__URL", "http://from-env:9200");
            jail.set_env("ULG_INGEST__MAX_WORKERS", "8");
            jail.create_file(
                "ulg.toml",
                r#"
                [elasticsearch]
                url = "http://from-toml:9200"
                "#,
            )?;

            let the_config = load_config(Some(Path::new("ulg.toml"))).map_err(|err| format!("{err:#}"))?;
            assert_eq!(the_config.elasticsearch.url, "http://from-toml:9200");
            // -- keys the file doesn't mention still come from the environment
            assert_eq!(the_config.ingest.max_workers, 8);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_a_bad_env_value_is_configuration_fatal() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ULG_ELASTICSEARCH__URL", "http://es.internal:9200");
            jail.set_env("ULG_INGEST__MAX_WORKERS", "0");
            assert!(load_config(None).is_err(), "zero workers from the env is still zero workers");
            Ok(())
        });
    }
}
