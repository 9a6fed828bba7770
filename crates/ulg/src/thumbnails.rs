//! 🖼️ Thumbnail URL Deriver: every three minutes of stream gets one frame.
//!
//! The frame extractor grabbed one still every 180 seconds and named it
//! `{videoId}_{HHMMSS}.{ext}`. Given a chat line's elapsed time we only need to
//! round DOWN to the nearest bucket and we know which picture was on screen.
//! Roughly. Give or take 179 seconds. It's a thumbnail, not a court transcript.

use crate::common::parse_elapsed_seconds;

/// 📏 One extracted frame per this many seconds of stream.
pub const BUCKET_SECONDS: i64 = 180;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailDeriver {
    base_url: String,
    extension: String,
}

impl ThumbnailDeriver {
    pub fn new(base_url: impl Into<String>, extension: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// 🎯 `(videoId, elapsedTime)` → `{base}/{videoId}_{HHMMSS}.{ext}`, or `""`.
    ///
    /// Empty string for: no video id, an elapsed time we can't parse, and pre-stream
    /// (negative) times, which have no frame to point at.
    pub fn derive(&self, video_id: &str, elapsed_time: &str) -> String {
        if video_id.is_empty() {
            return String::new();
        }
        match parse_elapsed_seconds(elapsed_time) {
            Some(seconds) if seconds >= 0 => format!(
                "{}/{}_{}.{}",
                self.base_url,
                video_id,
                bucket_label(seconds),
                self.extension
            ),
            _ => String::new(),
        }
    }
}

/// ⏱️ Floor to the bucket and render as zero-padded `HHMMSS`. 317s → `000300`.
pub fn bucket_label(seconds: i64) -> String {
    let the_bucket = seconds - seconds.rem_euclid(BUCKET_SECONDS);
    format!(
        "{:02}{:02}{:02}",
        the_bucket / 3600,
        (the_bucket % 3600) / 60,
        the_bucket % 60
    )
}
