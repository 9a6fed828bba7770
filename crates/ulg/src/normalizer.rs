//! 🧹 The Record Normalizer: many raw shapes go in, one `ChatEvent` comes out.
//!
//! 🎬 *[a raw line arrives. it has `message_type`, `time_text`, a nested `author`,
//! and a timestamp in MICROSECONDS, like it's trying to impress someone.]*
//!
//! The chat downloader, the superchat feed and the subtitle converter each produce
//! their own dialect of JSON. This module resolves them ONCE, at the ingestion
//! boundary, into a tagged union (`RawEvent`) and then into the canonical document.
//! No I/O. No async. Just a function that takes a line and gives back an
//! `Option`, like a vending machine that sometimes keeps your dollar on purpose.
//!
//! ⚠️ `None` is not an error. Engagement banners ("Welcome to live chat!") are
//! dropped here on purpose and never indexed.
//!
//! 🦆

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::common::{ChatEvent, EventKind, Money, format_elapsed};

/// 🕰️ Display timezone offset. Japan Standard Time. No DST, no drama, no exceptions.
const DISPLAY_OFFSET_SECS: i32 = 9 * 3600;

/// 🚫 Raw `message_type`s that carry no substance: system banners and ticker echoes of
/// superchats we already receive as their own messages.
pub const NON_SUBSTANTIVE_TYPES: &[&str] = &[
    "viewer_engagement_message",
    "ticker_paid_message_item",
    "ticker_paid_sticker_item",
    "ticker_sponsor_item",
];

/// 🎙️ `message_type` tag the subtitle converter stamps on every cue line it writes.
pub const TRANSCRIPT_CUE_TYPE: &str = "transcript_cue";

/// 🎤 Who "says" the transcript lines. Transcripts have no author field of their own,
/// so every cue is attributed to one fixed channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranscriptAuthor {
    pub name: String,
    pub channel_id: String,
}

impl Default for TranscriptAuthor {
    fn default() -> Self {
        Self {
            name: "@Utsuro_himuro".to_string(),
            channel_id: "UC64MV1Dfq3prs9CccXg09rQ".to_string(),
        }
    }
}

/// 💬 A plain chat message, lifted out of its raw JSON and given real types.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageRaw {
    pub message_id: String,
    pub message: String,
    /// 🐌 microseconds since epoch. yes, micro. 0 when the source forgot.
    pub timestamp_us: i64,
    pub time_text: Option<String>,
    pub time_in_seconds: Option<f64>,
    pub author_name: String,
    pub author_channel_id: String,
}

/// 💴 A chat message with money attached. Everything a chat message has, plus receipts.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperchatRaw {
    pub chat: ChatMessageRaw,
    pub money: Money,
    pub body_background_colour: Option<String>,
}

/// 🎙️ One subtitle cue, already anchored to wall-clock time by the converter.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptCueRaw {
    /// ⏱️ offset of the cue from the stream start, in milliseconds
    pub start_offset_ms: i64,
    pub timestamp_us: i64,
    pub message: String,
}

impl TranscriptCueRaw {
    /// 📝 Render the cue as one pending-file line, the same dialect `RawEvent::parse` reads back.
    pub fn to_line(&self) -> String {
        json!({
            "message_type": TRANSCRIPT_CUE_TYPE,
            "start_offset_ms": self.start_offset_ms,
            "timestamp": self.timestamp_us,
            "message": self.message,
        })
        .to_string()
    }
}

/// 🎭 Every raw shape the pipeline understands, resolved once and never re-sniffed.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    ChatMessage(ChatMessageRaw),
    Superchat(SuperchatRaw),
    TranscriptCue(TranscriptCueRaw),
    /// 🚫 system noise; carries its type only so logs can say what got dropped
    Engagement { message_type: String },
}

// -- 📦 the flat on-disk dialect. every field optional because every field has, at some point, been missing.
#[derive(Debug, Default, Deserialize)]
struct RawLine {
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    time_text: Option<String>,
    #[serde(default)]
    time_in_seconds: Option<f64>,
    #[serde(default)]
    author: Option<RawAuthor>,
    #[serde(default)]
    money: Option<RawMoney>,
    #[serde(default)]
    body_background_colour: Option<String>,
    #[serde(default)]
    start_offset_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMoney {
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    currency: String,
}

impl RawEvent {
    /// 🔍 Parse one NDJSON line and decide what it is.
    ///
    /// Errors only when the bytes are not a JSON object at all. A well-formed line of a
    /// type we don't care about comes back as `Engagement`, not as an error.
    pub fn parse(line: &[u8]) -> Result<Self, serde_json::Error> {
        let the_line: RawLine = serde_json::from_slice(line)?;

        if NON_SUBSTANTIVE_TYPES.contains(&the_line.message_type.as_str()) {
            return Ok(RawEvent::Engagement {
                message_type: the_line.message_type,
            });
        }

        if the_line.message_type == TRANSCRIPT_CUE_TYPE {
            return Ok(RawEvent::TranscriptCue(TranscriptCueRaw {
                start_offset_ms: the_line.start_offset_ms.unwrap_or_default(),
                timestamp_us: the_line.timestamp.unwrap_or_default(),
                message: the_line.message.unwrap_or_default(),
            }));
        }

        let the_author = the_line.author.unwrap_or_default();
        let the_chat = ChatMessageRaw {
            message_id: the_line.message_id,
            message: the_line.message.unwrap_or_default(),
            timestamp_us: the_line.timestamp.unwrap_or_default(),
            time_text: the_line.time_text,
            time_in_seconds: the_line.time_in_seconds,
            author_name: the_author.name,
            author_channel_id: the_author.id,
        };

        // 💴 an empty money object is not money. it is a rumour of money.
        match the_line.money {
            Some(money) if money.amount > 0.0 || !money.currency.is_empty() => {
                Ok(RawEvent::Superchat(SuperchatRaw {
                    chat: the_chat,
                    money: Money {
                        amount: money.amount,
                        currency: money.currency,
                    },
                    body_background_colour: the_line
                        .body_background_colour
                        .filter(|colour| !colour.is_empty()),
                }))
            }
            _ => Ok(RawEvent::ChatMessage(the_chat)),
        }
    }
}

/// 🧹 Turns `RawEvent`s into `ChatEvent`s for one video at a time.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    transcript_author: TranscriptAuthor,
}

impl Normalizer {
    pub fn new(transcript_author: TranscriptAuthor) -> Self {
        Self { transcript_author }
    }

    /// 🎯 One raw event in, at most one canonical document out.
    pub fn normalize(&self, raw: RawEvent, video_id: &str, video_title: &str) -> Option<ChatEvent> {
        match raw {
            RawEvent::Engagement { .. } => None,
            RawEvent::ChatMessage(chat) => Some(chat_event(chat, None, None, video_id, video_title)),
            RawEvent::Superchat(superchat) => Some(chat_event(
                superchat.chat,
                Some(superchat.money),
                superchat.body_background_colour,
                video_id,
                video_title,
            )),
            RawEvent::TranscriptCue(cue) => {
                let timestamp_ms = micros_to_millis(cue.timestamp_us);
                let message = resolve_emoji_shortcodes(&cue.message);
                Some(ChatEvent {
                    id: content_id(video_id, cue.start_offset_ms, &message),
                    video_id: video_id.to_string(),
                    video_title: video_title.to_string(),
                    kind: EventKind::Transcript,
                    elapsed_time: format_elapsed(cue.start_offset_ms.div_euclid(1000)),
                    datetime: display_datetime(timestamp_ms),
                    timestamp_ms,
                    message,
                    author_name: self.transcript_author.name.clone(),
                    author_channel_id: self.transcript_author.channel_id.clone(),
                    money: None,
                    body_background_colour: None,
                })
            }
        }
    }
}

/// 🎯 `Normalizer::default().normalize(..)`, for callers that don't care who narrates the transcripts.
pub fn normalize(raw: RawEvent, video_id: &str, video_title: &str) -> Option<ChatEvent> {
    Normalizer::default().normalize(raw, video_id, video_title)
}

fn chat_event(
    chat: ChatMessageRaw,
    money: Option<Money>,
    body_background_colour: Option<String>,
    video_id: &str,
    video_title: &str,
) -> ChatEvent {
    let timestamp_ms = micros_to_millis(chat.timestamp_us);
    let message = resolve_emoji_shortcodes(&chat.message);
    // 🆔 the platform id when it gave us one, a content hash when it didn't
    let id = if chat.message_id.is_empty() {
        content_id(video_id, timestamp_ms, &message)
    } else {
        chat.message_id
    };

    ChatEvent {
        id,
        video_id: video_id.to_string(),
        video_title: video_title.to_string(),
        kind: EventKind::Chat,
        elapsed_time: chat_elapsed(chat.time_in_seconds, chat.time_text.as_deref()),
        datetime: display_datetime(timestamp_ms),
        timestamp_ms,
        message,
        author_name: chat.author_name,
        author_channel_id: chat.author_channel_id,
        money,
        body_background_colour,
    }
}

/// ⏱️ Prefer the numeric offset, fall back to re-rendering the text. `01:05` becomes `1:05`.
/// Text we can't read is kept as-is rather than thrown away.
fn chat_elapsed(time_in_seconds: Option<f64>, time_text: Option<&str>) -> String {
    if let Some(seconds) = time_in_seconds.filter(|s| s.is_finite()) {
        return format_elapsed(seconds.trunc() as i64);
    }
    match time_text {
        Some(text) => match crate::common::parse_elapsed_seconds(text) {
            Some(seconds) => format_elapsed(seconds),
            None => text.to_string(),
        },
        None => String::new(),
    }
}

/// 🔢 µs → ms, rounding half away from zero. Integer math only; f64 starts lying past 2^53.
pub fn micros_to_millis(timestamp_us: i64) -> i64 {
    if timestamp_us >= 0 {
        timestamp_us.saturating_add(500) / 1000
    } else {
        -(timestamp_us.saturating_neg().saturating_add(500) / 1000)
    }
}

/// 🗓️ `YYYY-MM-DD HH:MM:SS` at UTC+9. A zero timestamp renders as the epoch
/// (`1970-01-01 09:00:00`) so the date field always gets something it can parse.
/// Anything chrono refuses to represent renders as empty; the mapping ignores it.
pub fn display_datetime(timestamp_ms: i64) -> String {
    let Some(the_offset) = FixedOffset::east_opt(DISPLAY_OFFSET_SECS) else {
        return String::new();
    };
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(utc) => utc
            .with_timezone(&the_offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => String::new(),
    }
}

/// 🆔 Deterministic id from content: same video + same moment + same words = same id.
/// Re-converting a subtitle file must not mint fresh ids for old cues.
pub fn content_id(video_id: &str, moment: i64, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{video_id}-{moment}-{message}").as_bytes());
    hex::encode(hasher.finalize())
}

/// 😀 Replace `:shortcode:` with its emoji. Unknown shortcodes (channel-custom emotes
/// like `:_kusa:`) are left exactly where they were.
pub fn resolve_emoji_shortcodes(message: &str) -> String {
    if !message.contains(':') {
        return message.to_string();
    }

    let mut the_output = String::with_capacity(message.len());
    let mut the_rest = message;
    while let Some(open) = the_rest.find(':') {
        the_output.push_str(&the_rest[..open]);
        let after_open = &the_rest[open + 1..];
        let resolved = after_open.find(':').and_then(|close| {
            let candidate = &after_open[..close];
            let plausible = !candidate.is_empty()
                && candidate
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'+'));
            if plausible {
                emojis::get_by_shortcode(candidate).map(|emoji| (emoji.as_str(), close))
            } else {
                None
            }
        });
        match resolved {
            Some((emoji, close)) => {
                the_output.push_str(emoji);
                the_rest = &after_open[close + 1..];
            }
            None => {
                // -- 🔄 keep the colon, rescan from right after it; it may open the next shortcode
                the_output.push(':');
                the_rest = after_open;
            }
        }
    }
    the_output.push_str(the_rest);
    the_output
}
