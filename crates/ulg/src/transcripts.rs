//! 🎙️ WebVTT subtitles → transcript-cue files in `chat_logs/`.
//!
//! 🎬 *[a directory of `.vtt` files. each one a stream, transcribed by a machine that
//! was doing its best.]*
//!
//! Input files are named `YYYYMMDDHHMMSS_[VIDEOID]_TITLE_fixed.vtt`. Each becomes
//! `YYYYMMDDHHMMSS_[VIDEOID]_TITLE_vtt.json` in the pending location, one cue per line,
//! and from there the normal ingestion run picks it up like any chat log.
//!
//! Cue wall-clock time = stream start + cue offset. Stream start comes from the video
//! catalog's `actualStartTime`; without one, the timestamp in the file name stands in.
//! Both are read as UTC.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::backends::IngestionSource;
use crate::lifecycle::FileLocation;
use crate::normalizer::TranscriptCueRaw;
use crate::videos::VideoCatalog;

const INPUT_SUFFIX: &str = "_fixed.vtt";
const OUTPUT_SUFFIX: &str = "_vtt.json";

/// 🗣️ One cue: where it starts and what was said. Multi-line payloads are joined with spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VttCue {
    pub start_ms: i64,
    pub text: String,
}

/// 📛 What the subtitle file name tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleName {
    /// 🕰️ the leading 14 digits, `YYYYMMDDHHMMSS`
    pub stamp: String,
    pub video_id: String,
    pub output_name: String,
}

/// 🔍 `20240101120000_[abc]_Some Title_fixed.vtt` → stamp, id, output name. `None` for anything else.
pub fn parse_subtitle_name(name: &str) -> Option<SubtitleName> {
    let the_stem = name.strip_suffix(INPUT_SUFFIX)?;
    let (stamp, rest) = the_stem.split_once('_')?;
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = rest.strip_prefix('[')?;
    let (video_id, rest) = rest.split_once(']')?;
    // -- `_TITLE` must follow, and the title can't be empty
    let the_title = rest.strip_prefix('_')?;
    if video_id.is_empty() || the_title.is_empty() {
        return None;
    }
    Some(SubtitleName {
        stamp: stamp.to_string(),
        video_id: video_id.to_string(),
        output_name: format!("{the_stem}{OUTPUT_SUFFIX}"),
    })
}

/// ⏱️ `HH:MM:SS.mmm` or `MM:SS.mmm` → milliseconds. Comma decimals tolerated.
pub fn parse_vtt_time(text: &str) -> Option<i64> {
    let the_parts: Vec<&str> = text.trim().split(':').collect();
    let (hours, minutes, seconds) = match the_parts.as_slice() {
        [h, m, s] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, *s),
        [m, s] => (0, m.parse::<i64>().ok()?, *s),
        _ => return None,
    };
    let (whole, fraction) = seconds.split_once(['.', ',']).unwrap_or((seconds, ""));
    let whole: i64 = whole.parse().ok()?;
    // -- ".5" is 500ms, ".05" is 50ms. pad right, take three.
    let the_millis = if fraction.is_empty() {
        0
    } else {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{fraction:0<3}");
        padded[..3].parse::<i64>().ok()?
    };
    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(whole)?
        .checked_mul(1000)?
        .checked_add(the_millis)
}

/// 📖 Pull every non-empty cue out of a WebVTT document.
///
/// Headers, NOTE blocks and cue identifiers are skipped because they never contain `-->`.
/// A timing line we can't read skips that cue, not the file.
pub fn parse_vtt(contents: &str) -> Vec<VttCue> {
    let mut the_cues = Vec::new();
    let mut the_lines = contents.lines().map(str::trim).peekable();
    while let Some(line) = the_lines.next() {
        let Some((start, _end)) = line.split_once("-->") else {
            continue;
        };
        let the_start = parse_vtt_time(start);

        let mut the_text: Vec<&str> = Vec::new();
        while let Some(next) = the_lines.peek() {
            // -- a blank line ends the cue; a timing line means it ended without one
            if next.is_empty() || next.contains("-->") {
                break;
            }
            the_text.push(next);
            the_lines.next();
        }

        let the_message = the_text.join(" ").trim().to_string();
        match the_start {
            Some(start_ms) if !the_message.is_empty() => the_cues.push(VttCue {
                start_ms,
                text: the_message,
            }),
            None => debug!("🙈 unreadable cue timing '{}'", line),
            _ => {}
        }
    }
    the_cues
}

fn stamp_to_millis(stamp: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|moment| moment.and_utc().timestamp_millis())
}

/// 📊 What a conversion pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub converted: usize,
    pub cues: usize,
    /// ⏭️ output already pending or already ingested
    pub already_done: usize,
    /// 🫥 parsed fine, said nothing
    pub empty: usize,
    /// 📛 not a `*_fixed.vtt` we understand
    pub unrecognised: usize,
}

/// 🚀 Convert every `*_fixed.vtt` in `subtitles_dir` into a pending transcript file.
pub async fn convert_vtt_dir<S: IngestionSource + ?Sized>(
    subtitles_dir: &Path,
    catalog: &VideoCatalog,
    source: &S,
) -> Result<ConversionReport> {
    let mut the_entries = tokio::fs::read_dir(subtitles_dir)
        .await
        .with_context(|| format!("💀 Couldn't open subtitles directory '{}'", subtitles_dir.display()))?;
    let mut the_names = Vec::new();
    while let Some(entry) = the_entries.next_entry().await? {
        let the_name = entry.file_name().to_string_lossy().into_owned();
        if the_name.ends_with(INPUT_SUFFIX) && entry.file_type().await?.is_file() {
            the_names.push(the_name);
        }
    }
    the_names.sort();
    info!("🎙️ {} subtitle files in '{}'", the_names.len(), subtitles_dir.display());

    let mut the_report = ConversionReport::default();
    for name in the_names {
        let Some(the_subtitle) = parse_subtitle_name(&name) else {
            warn!("⚠️ skipping '{}', the name isn't DATE_[ID]_TITLE_fixed.vtt", name);
            the_report.unrecognised += 1;
            continue;
        };
        if source.exists(FileLocation::Pending, &the_subtitle.output_name).await?
            || source.exists(FileLocation::Processed, &the_subtitle.output_name).await?
        {
            debug!("⏭️ '{}' already converted", name);
            the_report.already_done += 1;
            continue;
        }

        let the_path = subtitles_dir.join(&name);
        let the_contents = tokio::fs::read_to_string(&the_path)
            .await
            .with_context(|| format!("💀 Couldn't read '{}'", the_path.display()))?;
        let the_cues = parse_vtt(&the_contents);
        if the_cues.is_empty() {
            warn!("🫥 '{}' has no cues, nothing written", name);
            the_report.empty += 1;
            continue;
        }

        let the_stream_start_ms = catalog
            .get(&the_subtitle.video_id)
            .and_then(|video| video.actual_start_time.as_deref())
            .and_then(stamp_to_millis)
            .or_else(|| stamp_to_millis(&the_subtitle.stamp))
            .unwrap_or(0);

        let mut the_body = String::new();
        for cue in &the_cues {
            let the_line = TranscriptCueRaw {
                start_offset_ms: cue.start_ms,
                timestamp_us: the_stream_start_ms.saturating_add(cue.start_ms).saturating_mul(1000),
                message: cue.text.clone(),
            }
            .to_line();
            the_body.push_str(&the_line);
            the_body.push('\n');
        }
        source
            .write(FileLocation::Pending, &the_subtitle.output_name, the_body.into_bytes())
            .await?;
        debug!("✅ '{}' → '{}' ({} cues)", name, the_subtitle.output_name, the_cues.len());
        the_report.converted += 1;
        the_report.cues += the_cues.len();
    }

    info!(
        "🎙️ conversion done: {} converted ({} cues), {} already done, {} empty, {} unrecognised",
        the_report.converted, the_report.cues, the_report.already_done, the_report.empty, the_report.unrecognised
    );
    Ok(the_report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySource;
    use crate::common::video_id_from_file_name;
    use crate::normalizer::{RawEvent, normalize};

    const SAMPLE: &str = "WEBVTT\nKind: captions\n\n00:00:01.500 --> 00:00:04.000 align:start\nおはよう\nございます\n\n1\n01:02:03.040 --> 01:02:05.000\nlater\n00:00:09.000 --> 00:00:10.000\n\nNOTE nothing to see\n";

    #[test]
    fn the_one_where_cues_are_read_and_joined() {
        let the_cues = parse_vtt(SAMPLE);
        assert_eq!(
            the_cues,
            vec![
                VttCue {
                    start_ms: 1_500,
                    text: "おはよう ございます".into()
                },
                VttCue {
                    start_ms: 3_723_040,
                    text: "later".into()
                },
            ]
        );
    }

    #[test]
    fn the_one_where_vtt_times_parse_both_shapes() {
        assert_eq!(parse_vtt_time("00:00:05.000"), Some(5_000));
        assert_eq!(parse_vtt_time("02:05.5"), Some(125_500));
        assert_eq!(parse_vtt_time("1:00:00,25"), Some(3_600_250));
        assert_eq!(parse_vtt_time("5"), None);
        assert_eq!(parse_vtt_time("aa:bb"), None);
        assert_eq!(parse_vtt_time("9999999999999999:00:00.000"), None);
    }

    #[test]
    fn the_one_where_a_cue_from_the_far_future_is_skipped_not_fatal() {
        let the_vtt = "WEBVTT\n\n9999999999999999:00:00.000 --> 9999999999999999:00:01.000\nnever\n\n00:00:02.000 --> 00:00:03.000\nnow\n";
        let the_cues = parse_vtt(the_vtt);
        assert_eq!(
            the_cues,
            vec![VttCue {
                start_ms: 2_000,
                text: "now".into()
            }]
        );
    }

    #[test]
    fn the_one_where_subtitle_names_are_picky() {
        let the_name = parse_subtitle_name("20240101120000_[abc_123]_My_Stream_fixed.vtt")
            .expect("💀 should parse");
        assert_eq!(the_name.stamp, "20240101120000");
        assert_eq!(the_name.video_id, "abc_123");
        assert_eq!(the_name.output_name, "20240101120000_[abc_123]_My_Stream_vtt.json");
        assert_eq!(video_id_from_file_name(&the_name.output_name).as_deref(), Some("abc_123"));

        assert!(parse_subtitle_name("2024_[abc]_t_fixed.vtt").is_none());
        assert!(parse_subtitle_name("20240101120000_abc_t_fixed.vtt").is_none());
        assert!(parse_subtitle_name("20240101120000_[abc]_t.vtt").is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_directory_becomes_pending_transcripts() -> Result<()> {
        let the_dir = tempfile::tempdir()?;
        tokio::fs::write(the_dir.path().join("20240101000000_[vid1]_Morning_fixed.vtt"), SAMPLE).await?;
        tokio::fs::write(the_dir.path().join("20240101000000_[vid2]_Silent_fixed.vtt"), "WEBVTT\n\n").await?;
        tokio::fs::write(the_dir.path().join("notes_fixed.vtt"), SAMPLE).await?;

        let (the_catalog, _) = VideoCatalog::from_ndjson(
            br#"{"video_url":"https://www.youtube.com/watch?v=vid1","title":"Morning","actualStartTime":"20240101000010"}"#,
        );
        let the_source = InMemorySource::new();

        let the_report = convert_vtt_dir(the_dir.path(), &the_catalog, &the_source).await?;
        assert_eq!(the_report.converted, 1);
        assert_eq!(the_report.cues, 2);
        assert_eq!(the_report.empty, 1);
        assert_eq!(the_report.unrecognised, 1);

        let the_pending = the_source.list_pending().await?;
        assert_eq!(the_pending.len(), 1);
        let the_bytes = the_source.read(&the_pending[0]).await?;
        let the_first_line = the_bytes.split(|b| *b == b'\n').next().unwrap_or_default();
        let the_event = normalize(RawEvent::parse(the_first_line)?, "vid1", "Morning").expect("💀 a cue is substantive");
        // -- 🕰️ actualStartTime 00:00:10 UTC + 1.5s = 09:00:11 JST
        assert_eq!(the_event.timestamp_ms, 1_704_067_211_500);
        assert_eq!(the_event.datetime, "2024-01-01 09:00:11");
        assert_eq!(the_event.elapsed_time, "0:01");

        // -- ⏭️ second pass finds the output already pending
        let the_rerun = convert_vtt_dir(the_dir.path(), &the_catalog, &the_source).await?;
        assert_eq!(the_rerun.converted, 0);
        assert_eq!(the_rerun.already_done, 1);
        Ok(())
    }
}
