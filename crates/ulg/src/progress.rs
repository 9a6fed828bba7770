//! 📊 progress.rs: "Are we there yet?", asked once per finished file.
//!
//! 🚀 The ingestion run counts files, documents and bytes as workers report back, and
//! paints them into a progress bar whose message is a comfy-table. Rates use a short
//! sliding window so one giant chat log doesn't make the numbers look like a seismograph.
//!
//! ⚠️ Watching the bar will not make Elasticsearch faster. We've tried. 🦆

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte. not a megabyte. I will die on this hill.
const MIB: u64 = 1024 * 1024;

const RATE_WINDOW: Duration = Duration::from_secs(5);

fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

struct Rates {
    docs_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Counts what the collector hears from the workers and draws it.
///
/// Hidden mode keeps all the counting but draws nothing, for tests and for runs where
/// stderr is a log file that doesn't deserve ANSI art.
pub(crate) struct IngestProgress {
    total_files: u64,
    total_size: u64,
    files_done: u64,
    files_failed: u64,
    total_bytes: u64,
    total_docs: u64,
    progress_bar: ProgressBar,
    /// 🔄 (when, bytes, docs) samples for the sliding window
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for IngestProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("IngestProgress")
            .field("total_files", &self.total_files)
            .field("files_done", &self.files_done)
            .field("files_failed", &self.files_failed)
            .field("total_bytes", &self.total_bytes)
            .field("total_docs", &self.total_docs)
            .finish()
    }
}

impl IngestProgress {
    /// 🚀 `total_size` may be 0 when the listing didn't report sizes; percent then
    /// tracks files instead of bytes.
    pub(crate) fn new(total_files: u64, total_size: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(total_files)
        } else {
            ProgressBar::hidden()
        };
        let the_style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(the_style);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        // -- 🔄 seed t=0 so nobody divides by zero like an animal
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            total_files,
            total_size,
            files_done: 0,
            files_failed: 0,
            total_bytes: 0,
            total_docs: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 One file finished, one way or the other.
    pub(crate) fn file_done(&mut self, bytes: u64, docs: u64, failed: bool) {
        self.files_done += 1;
        if failed {
            self.files_failed += 1;
        }
        self.total_bytes += bytes;
        self.total_docs += docs;

        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.files_done);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW && self.rate_samples.len() > 1 {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.total_bytes, self.total_docs));

        if let Some(&(oldest_time, oldest_bytes, oldest_docs)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes);
                let docs_delta = self.total_docs.saturating_sub(oldest_docs);
                return Rates {
                    docs_per_sec: docs_delta as f64 / elapsed,
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB as f64,
                };
            }
        }
        Rates {
            docs_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    fn percent(&self) -> f64 {
        if self.total_size > 0 {
            (self.total_bytes as f64 / self.total_size as f64) * 100.0
        } else if self.total_files > 0 {
            (self.files_done as f64 / self.total_files as f64) * 100.0
        } else {
            0.0
        }
    }

    /// 🎨 Layout:
    /// ```text
    ///   <docs/s>      <total docs>
    ///   <MiB/s>       <bytes progress>
    ///   <failed>      <files done / total>
    ///   <elapsed>     <remaining>
    /// ```
    fn render(&self, rates: Rates) {
        let percent = self.percent();
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0.0 {
            // 🔮 linear extrapolation. assumes the future looks like the past. it won't.
            let remaining_secs = elapsed.as_secs_f64() / (percent / 100.0) - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format_duration(Duration::from_secs_f64(remaining_secs))
            } else {
                "--:--".to_string()
            }
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(rates.docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Docs", format_number(self.total_docs))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {}", format_bytes(self.total_bytes), format_bytes(self.total_size)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} failed", self.files_failed)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {} files ({:.1}%)", self.files_done, self.total_files, percent))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar.set_message(format!("ingesting chat logs\n{}", table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_durations_only_show_hours_when_it_hurts() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_hidden_progress_still_counts() {
        let mut the_progress = IngestProgress::new(3, 0, false);
        the_progress.file_done(100, 10, false);
        the_progress.file_done(50, 0, true);
        assert_eq!(the_progress.files_done, 2);
        assert_eq!(the_progress.total_docs, 10);
        assert_eq!(the_progress.files_failed, 1);
        assert!((the_progress.percent() - 66.666).abs() < 0.1);
        the_progress.finish();
    }
}
