//! ☁️ S3 source: the same three-location layout, as key prefixes in a bucket.
//!
//! 🎬 *[a bucket. three prefixes. no directories, because S3 has never had directories,
//! it just lets you believe in them, like a good parent with Santa.]*
//!
//! S3 has no rename, so a relocation is a copy followed by a delete. If the delete fails
//! after the copy succeeded, the file exists in both places; the next run will see it
//! in `chat_logs/` again. At-least-once, with feeling.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{debug, trace};

use crate::backends::{IngestionSource, is_ingestion_file};
use crate::lifecycle::{FileLocation, FileRef};

/// 🔣 Everything but unreserved characters and `/` gets escaped in `x-amz-copy-source`.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Source {
    /// 🚀 Build a client from the usual AWS credential chain (env vars, profile, IAM role, hope).
    ///
    /// `endpoint_url` + `force_path_style` are for S3-compatible stores like MinIO.
    pub async fn connect(
        bucket: String,
        region: Option<String>,
        endpoint_url: Option<String>,
        force_path_style: bool,
    ) -> Result<Self> {
        let mut the_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            the_loader = the_loader.region(aws_sdk_s3::config::Region::new(region));
        }
        let the_aws_config = the_loader.load().await;

        let mut the_builder = aws_sdk_s3::config::Builder::from(&the_aws_config);
        if let Some(url) = endpoint_url {
            the_builder = the_builder.endpoint_url(url);
        }
        if force_path_style {
            the_builder = the_builder.force_path_style(true);
        }
        debug!("☁️ S3 source ready for bucket '{}'", bucket);
        Ok(Self::from_client(aws_sdk_s3::Client::from_conf(the_builder.build()), bucket))
    }

    pub fn from_client(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn key_of(location: FileLocation, name: &str) -> String {
        format!("{}/{}", location.prefix(), name)
    }

    /// 🔗 `bucket/key`, percent-encoded. Subtitle titles bring brackets, spaces and kanji.
    fn copy_source(&self, key: &str) -> String {
        utf8_percent_encode(&format!("{}/{}", self.bucket, key), COPY_SOURCE).to_string()
    }
}

#[async_trait]
impl IngestionSource for S3Source {
    async fn list_pending(&self) -> Result<Vec<FileRef>> {
        let the_prefix = format!("{}/", FileLocation::Pending.prefix());
        let mut the_files = Vec::new();
        let mut the_pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&the_prefix)
            .into_paginator()
            .send();

        while let Some(page) = the_pages.next().await {
            let page = page.with_context(|| {
                format!(
                    "💀 list_objects_v2 failed for s3://{}/{}. The bucket ghosted us. Check: bucket name, region, credentials.",
                    self.bucket, the_prefix
                )
            })?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(name) = key.strip_prefix(&the_prefix) else { continue };
                // -- nested "directories" under pending are not ours to ingest
                if name.is_empty() || name.contains('/') || !is_ingestion_file(name) {
                    trace!("🙈 skipping s3 key '{}'", key);
                    continue;
                }
                the_files.push(FileRef {
                    size_bytes: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    ..FileRef::pending(name)
                });
            }
        }
        the_files.sort();
        Ok(the_files)
    }

    async fn read(&self, file: &FileRef) -> Result<Vec<u8>> {
        let the_key = file.key();
        let the_object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&the_key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 GetObject failed for s3://{}/{}. The digital equivalent of 'we have food at home'. \
                     Check: IAM permissions, bucket policy, KMS key access.",
                    self.bucket, the_key
                )
            })?;
        let the_bytes = the_object
            .body
            .collect()
            .await
            .with_context(|| format!("💀 s3://{}/{} stopped streaming halfway", self.bucket, the_key))?;
        Ok(the_bytes.into_bytes().to_vec())
    }

    async fn write(&self, location: FileLocation, name: &str, contents: Vec<u8>) -> Result<FileRef> {
        let the_key = Self::key_of(location, name);
        let size_bytes = contents.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&the_key)
            .body(ByteStream::from(contents))
            .send()
            .await
            .with_context(|| format!("💀 PutObject failed for s3://{}/{}", self.bucket, the_key))?;
        Ok(FileRef {
            name: name.to_string(),
            location,
            size_bytes,
        })
    }

    async fn exists(&self, location: FileLocation, name: &str) -> Result<bool> {
        let the_key = Self::key_of(location, name);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&the_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(err).with_context(|| format!("💀 HeadObject failed for s3://{}/{}", self.bucket, the_key))
                }
            }
        }
    }

    async fn relocate(&self, file: &FileRef, to: FileLocation) -> Result<FileRef> {
        let from_key = file.key();
        let to_key = Self::key_of(to, &file.name);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(&from_key))
            .key(&to_key)
            .send()
            .await
            .with_context(|| format!("💀 CopyObject {} → {} failed", from_key, to_key))?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&from_key)
            .send()
            .await
            .with_context(|| {
                format!("💀 Copied to {to_key} but couldn't delete {from_key}. It lives in both places now.")
            })?;
        Ok(file.moved_to(to))
    }

    async fn remove(&self, file: &FileRef) -> Result<()> {
        let the_key = file.key();
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&the_key)
            .send()
            .await
            .with_context(|| format!("💀 DeleteObject failed for s3://{}/{}", self.bucket, the_key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUCKET: &str = "ulg-bucket";

    fn source_against(server: &MockServer) -> S3Source {
        let the_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "test-key",
                "test-secret",
                None,
                None,
                "wiremock",
            ))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .build();
        S3Source::from_client(aws_sdk_s3::Client::from_conf(the_config), BUCKET.to_string())
    }

    #[test]
    fn the_one_where_keys_mirror_the_directory_layout() {
        assert_eq!(S3Source::key_of(FileLocation::Pending, "abc.json"), "chat_logs/abc.json");
        assert_eq!(
            S3Source::key_of(FileLocation::Processed, "abc.json"),
            "chat_logs_processed/abc.json"
        );
        assert_eq!(S3Source::key_of(FileLocation::Error, "abc.json"), "chat_logs_error/abc.json");
    }

    #[tokio::test]
    async fn the_one_where_listing_keeps_only_top_level_ingestion_files() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        let the_listing = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>ulg-bucket</Name>
  <Prefix>chat_logs/</Prefix>
  <KeyCount>4</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents><Key>chat_logs/vid2.json</Key><Size>20</Size></Contents>
  <Contents><Key>chat_logs/vid1.ndjson</Key><Size>10</Size></Contents>
  <Contents><Key>chat_logs/nested/vid3.json</Key><Size>30</Size></Contents>
  <Contents><Key>chat_logs/notes.txt</Key><Size>5</Size></Contents>
</ListBucketResult>"#;
        Mock::given(method("GET"))
            .and(path(format!("/{BUCKET}/")))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", "chat_logs/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(the_listing, "application/xml"))
            .mount(&the_server)
            .await;

        let the_files = source_against(&the_server).list_pending().await?;
        let the_names: Vec<&str> = the_files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(the_names, vec!["vid1.ndjson", "vid2.json"]);
        assert_eq!(the_files[0].size_bytes, 10);
        assert!(the_files.iter().all(|f| f.location == FileLocation::Pending));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_reading_returns_the_whole_object() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{BUCKET}/chat_logs/vid1.json")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{\"message\":\"hi\"}\n".to_vec()))
            .mount(&the_server)
            .await;

        let the_bytes = source_against(&the_server).read(&FileRef::pending("vid1.json")).await?;
        assert_eq!(the_bytes, b"{\"message\":\"hi\"}\n");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_relocating_a_kanji_key_sends_an_encoded_copy_source() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(format!("^/{BUCKET}/chat_logs_error/")))
            .and(header(
                "x-amz-copy-source",
                "ulg-bucket/chat_logs/20240101_%5Babc%5D_%E6%97%A5%E6%9C%AC%20%E8%AA%9E_vtt.json",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<?xml version="1.0" encoding="UTF-8"?><CopyObjectResult><ETag>"abc"</ETag></CopyObjectResult>"#,
                "application/xml",
            ))
            .expect(1)
            .mount(&the_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(format!("^/{BUCKET}/chat_logs/")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_file = FileRef::pending("20240101_[abc]_日本 語_vtt.json");
        let the_moved = source_against(&the_server)
            .relocate(&the_file, FileLocation::Error)
            .await?;
        assert_eq!(the_moved.location, FileLocation::Error);
        assert_eq!(the_moved.name, the_file.name);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_copy_never_deletes_the_original() {
        let the_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_raw(
                r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>AccessDenied</Code><Message>nope</Message></Error>"#,
                "application/xml",
            ))
            .mount(&the_server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&the_server)
            .await;

        let the_result = source_against(&the_server)
            .relocate(&FileRef::pending("vid1.json"), FileLocation::Processed)
            .await;
        assert!(the_result.is_err());
    }

    #[tokio::test]
    async fn the_one_where_remove_deletes_the_pending_key() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("/{BUCKET}/chat_logs/vid1.json")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&the_server)
            .await;

        source_against(&the_server).remove(&FileRef::pending("vid1.json")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_exists_tells_missing_from_broken() -> anyhow::Result<()> {
        let the_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(format!("/{BUCKET}/chat_logs/here.json")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&the_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(format!("/{BUCKET}/chat_logs/gone.json")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&the_server)
            .await;

        let the_source = source_against(&the_server);
        assert!(the_source.exists(FileLocation::Pending, "here.json").await?);
        assert!(!the_source.exists(FileLocation::Pending, "gone.json").await?);
        Ok(())
    }

    #[test]
    fn the_one_where_plain_keys_survive_encoding_untouched() {
        let the_source = S3Source::from_client(
            aws_sdk_s3::Client::from_conf(
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                    .region(aws_sdk_s3::config::Region::new("us-east-1"))
                    .build(),
            ),
            BUCKET.to_string(),
        );
        assert_eq!(
            the_source.copy_source("chat_logs/abc-1_x.y~z.json"),
            "ulg-bucket/chat_logs/abc-1_x.y~z.json"
        );
    }
}
