//! 📦 Common data structures: the building blocks of ulg
//!
//! ---
//!
//! 🎬 COLD OPEN. INT. LIVESTREAM ARCHIVE, 3:47 AM
//!
//! 🌩️  The stream ended four hours ago. The chat did not. Somewhere on a disk,
//! eleven thousand superchats, two hundred "first!" messages, and one viewer
//! who typed `:frog:` forty times in a row are waiting to be remembered.
//!
//! ✅ And then: a `ChatEvent` arrives. One shape for every kind of message.
//! Chat, superchat, transcript cue: they all leave the normalizer wearing the
//! same uniform. The search index does not care where you came from. It only
//! cares that your `datetime` sorts.
//!
//! 🦆
//!
//! This module defines the canonical document (`ChatEvent`), the video metadata
//! record (`VideoMetadata`), and the index mappings that make both searchable.
//!
//! ⚠️  Field names here are serialized in camelCase and ARE the stored schema.
//! Renaming one is a reindex, not a refactor.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// 🏷️ What kind of event a document is. Two flavors. Like ice cream, but searchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// 💬 A viewer typed something. Possibly with money attached.
    Chat,
    /// 🎙️ The streamer said something, and a subtitle file caught it.
    Transcript,
}

/// 💴 Money attached to a superchat. Present only when someone actually paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

/// 🎯 The canonical document. Every raw event shape collapses into this one.
///
/// Invariants the normalizer upholds, so nobody downstream has to re-check:
/// - `timestamp_ms` is milliseconds. Never micros. Never "whatever the source sent".
/// - `elapsed_time` has no leading zero on its most significant unit (`1:05`, not `01:05`).
/// - `money` is `None` unless there was real money. No `null` placeholders on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub id: String,
    pub video_id: String,
    #[serde(default)]
    pub video_title: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub elapsed_time: String,
    #[serde(default)]
    pub datetime: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub money: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_background_colour: Option<String>,
}

impl ChatEvent {
    /// 🗺️ Index settings + mappings for the chat log index.
    ///
    /// `datetime` is the display-facing field that search sorts and filters on, so it
    /// is mapped as a real date in the exact format the normalizer renders. A value that
    /// doesn't parse is left out of the field instead of failing the whole document.
    /// `authorName` is text for fuzzy matching with a `.keyword` twin for exact filters.
    pub fn index_settings() -> Value {
        json!({
            "mappings": {
                "properties": {
                    "id": { "type": "keyword" },
                    "videoId": { "type": "keyword" },
                    "videoTitle": { "type": "text" },
                    "type": { "type": "keyword" },
                    "message": { "type": "text" },
                    "timestampMs": { "type": "long" },
                    "elapsedTime": { "type": "keyword" },
                    "datetime": {
                        "type": "date",
                        "format": "yyyy-MM-dd HH:mm:ss",
                        "ignore_malformed": true
                    },
                    "authorName": {
                        "type": "text",
                        "fields": { "keyword": { "type": "keyword" } }
                    },
                    "authorChannelId": { "type": "keyword" },
                    "money": {
                        "properties": {
                            "amount": { "type": "double" },
                            "currency": { "type": "keyword" }
                        }
                    },
                    "bodyBackgroundColour": { "type": "keyword" }
                }
            }
        })
    }
}

/// 📼 One video, as observed from the platform's listing API.
///
/// Created once, then mutated in place by upserts (the thumbnail jobs flip the two
/// lifecycle flags). Never overwritten wholesale. Never deleted. Videos are forever,
/// like tattoos and that one commit you pushed to main.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    // 📎 the listing file doesn't always carry this; the catalog backfills it from `video_url`
    #[serde(rename = "videoId", default)]
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "video_url", default)]
    pub video_url: String,
    /// 🕰️ `YYYYMMDDHHMMSS`, 14 digits, no separators, no mercy.
    #[serde(rename = "publishedAt", default)]
    pub published_at: String,
    #[serde(
        rename = "actualStartTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub actual_start_time: Option<String>,
    // 🐛 the upstream listing script spelled it `thumnail_url` for a while. we forgive. we alias.
    #[serde(rename = "thumbnail_url", alias = "thumnail_url", default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub thumbnail_created: bool,
    #[serde(default)]
    pub thumbnail_uploaded: bool,
}

impl VideoMetadata {
    pub fn index_settings() -> Value {
        json!({
            "mappings": {
                "properties": {
                    "videoId": { "type": "keyword" },
                    "title": { "type": "text" },
                    "video_url": { "type": "keyword" },
                    "publishedAt": { "type": "keyword" },
                    "actualStartTime": { "type": "keyword" },
                    "thumbnail_url": { "type": "keyword" },
                    "thumbnail_created": { "type": "boolean" },
                    "thumbnail_uploaded": { "type": "boolean" }
                }
            }
        })
    }
}

/// 🔎 Pull the video id out of a watch URL: `https://www.youtube.com/watch?v=abc&t=1` → `abc`.
///
/// Returns `None` when there is no `v=` to be found. An absent id is not an error,
/// it is just a URL that was never going to help us.
pub fn extract_video_id(url: &str) -> Option<String> {
    let (_, after) = url.split_once("v=")?;
    let the_id = after.split('&').next().unwrap_or_default();
    if the_id.is_empty() {
        None
    } else {
        Some(the_id.to_string())
    }
}

/// 📁 Work out which video a file belongs to from its name.
///
/// Understands `{id}.json`, `{id}.ndjson`, `{id}_raw.ndjson`, `{id}_vtt.ndjson`,
/// `{id}_vtt.json`, and the subtitle-style `YYYYMMDDHHMMSS_[{id}]_title…` where the id sits in brackets.
pub fn video_id_from_file_name(name: &str) -> Option<String> {
    if let Some(open) = name.find("_[") {
        let after = &name[open + 2..];
        if let Some(close) = after.find(']') {
            let the_id = &after[..close];
            return (!the_id.is_empty()).then(|| the_id.to_string());
        }
    }

    let the_stem = name
        .strip_suffix(".ndjson")
        .or_else(|| name.strip_suffix(".json"))?;
    let the_id = the_stem
        .strip_suffix("_raw")
        .or_else(|| the_stem.strip_suffix("_vtt"))
        .unwrap_or(the_stem);
    (!the_id.is_empty()).then(|| the_id.to_string())
}

/// ⏱️ Render a signed second count as `H:MM:SS` (when there are hours) or `M:SS`.
///
/// The leading unit never gets a leading zero. Negative values keep their `-`,
/// because chat that happens before the stream starts is still chat. Pre-show chat.
/// The waiting room. Everyone saying "waiting" forty times.
pub fn format_elapsed(total_seconds: i64) -> String {
    let the_sign = if total_seconds < 0 { "-" } else { "" };
    let the_magnitude = total_seconds.unsigned_abs();
    let hours = the_magnitude / 3600;
    let minutes = (the_magnitude % 3600) / 60;
    let seconds = the_magnitude % 60;
    if hours > 0 {
        format!("{the_sign}{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{the_sign}{minutes}:{seconds:02}")
    }
}

/// 🔢 Parse `H:MM:SS`, `M:SS` or a bare `S` (optionally with a leading `-`) into seconds.
///
/// `None` for anything else. Empty strings, `1:2:3:4`, `abc`, emotional outbursts.
pub fn parse_elapsed_seconds(text: &str) -> Option<i64> {
    let the_text = text.trim();
    let (negative, the_digits) = match the_text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, the_text),
    };
    if the_digits.is_empty() {
        return None;
    }

    let mut the_parts = Vec::with_capacity(3);
    for part in the_digits.split(':') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        the_parts.push(part.parse::<i64>().ok()?);
    }

    // -- 🧮 checked all the way down. a chat line claiming 10^16 hours is not our crash.
    let the_total = match the_parts.as_slice() {
        [s] => *s,
        [m, s] => m.checked_mul(60)?.checked_add(*s)?,
        [h, m, s] => h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s)?,
        _ => return None,
    };
    Some(if negative { -the_total } else { the_total })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_chat_event_serializes_in_the_stored_schema() -> anyhow::Result<()> {
        let the_event = ChatEvent {
            id: "msg-1".into(),
            video_id: "vid".into(),
            video_title: "Karaoke".into(),
            kind: EventKind::Chat,
            message: "hello".into(),
            timestamp_ms: 1_700_000_000_000,
            elapsed_time: "1:02".into(),
            datetime: "2023-11-15 07:13:20".into(),
            author_name: "viewer".into(),
            author_channel_id: "UC123".into(),
            money: None,
            body_background_colour: None,
        };

        let the_json = serde_json::to_value(&the_event)?;
        assert_eq!(the_json["videoId"], "vid");
        assert_eq!(the_json["type"], "chat");
        assert_eq!(the_json["timestampMs"], 1_700_000_000_000i64);
        assert!(
            the_json.get("money").is_none(),
            "no money means no key at all, not a null"
        );
        assert!(the_json.get("bodyBackgroundColour").is_none());
        Ok(())
    }

    #[test]
    fn the_one_where_the_typo_in_thumnail_url_is_forgiven() -> anyhow::Result<()> {
        let the_line = r#"{"videoId":"abc","title":"t","video_url":"https://www.youtube.com/watch?v=abc","publishedAt":"20240101120000","thumnail_url":"https://i.ytimg.com/x.jpg"}"#;
        let the_video: VideoMetadata = serde_json::from_str(the_line)?;
        assert_eq!(the_video.thumbnail_url, "https://i.ytimg.com/x.jpg");
        assert!(!the_video.thumbnail_created);
        assert_eq!(the_video.actual_start_time, None);
        Ok(())
    }

    #[test]
    fn the_one_where_video_ids_are_extracted_from_urls() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=abc123&t=42"),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(extract_video_id("https://example.com/nothing"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/watch?v="), None);
    }

    #[test]
    fn the_one_where_elapsed_time_drops_its_leading_zero() {
        assert_eq!(format_elapsed(0), "0:00");
        assert_eq!(format_elapsed(65), "1:05");
        assert_eq!(format_elapsed(3_725), "1:02:05");
        assert_eq!(format_elapsed(-133), "-2:13");
    }

    #[test]
    fn the_one_where_clock_strings_become_seconds_or_nothing() {
        assert_eq!(parse_elapsed_seconds("0:05:17"), Some(317));
        assert_eq!(parse_elapsed_seconds("12:34"), Some(754));
        assert_eq!(parse_elapsed_seconds("42"), Some(42));
        assert_eq!(parse_elapsed_seconds("-0:30"), Some(-30));
        assert_eq!(parse_elapsed_seconds(""), None);
        assert_eq!(parse_elapsed_seconds("1:2:3:4"), None);
        assert_eq!(parse_elapsed_seconds("ab:cd"), None);
        assert_eq!(parse_elapsed_seconds("-"), None);
    }

    #[test]
    fn the_one_where_a_ten_quadrillion_hour_stream_is_just_nonsense() {
        assert_eq!(parse_elapsed_seconds("9999999999999999:00:00"), None);
        assert_eq!(parse_elapsed_seconds("-9999999999999999:00:00"), None);
        assert_eq!(parse_elapsed_seconds("999999999999999999:00"), None);
        assert_eq!(parse_elapsed_seconds("9223372036854775807"), Some(i64::MAX));
    }

    #[test]
    fn the_one_where_file_names_give_up_their_video_ids() {
        assert_eq!(video_id_from_file_name("abc123.json").as_deref(), Some("abc123"));
        assert_eq!(video_id_from_file_name("abc123.ndjson").as_deref(), Some("abc123"));
        assert_eq!(video_id_from_file_name("abc123_raw.ndjson").as_deref(), Some("abc123"));
        assert_eq!(video_id_from_file_name("abc123_vtt.ndjson").as_deref(), Some("abc123"));
        assert_eq!(
            video_id_from_file_name("20240101120000_[abc_123]_Karaoke_night_vtt.json").as_deref(),
            Some("abc_123")
        );
        assert_eq!(video_id_from_file_name("notes.txt"), None);
        assert_eq!(video_id_from_file_name(".json"), None);
    }
}
