//! 📊 progress.rs — "Are we there yet?" — a pipeline that never arrives, asked anyway.
//!
//! 🚀 Counters for everything the consumer loop sees, a spinner that shows them while
//! the process runs, and a table so comfy it has lumbar support for when it stops.
//!
//! The spinner draws to stderr and hides itself when stderr is not a terminal,
//! so journald and docker logs are spared.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::batch::FlushOutcome;

/// 🔢 Formats a number with commas. "1000000 docs" → "1,000,000 docs".
fn format_number(n: u64) -> String {
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

/// ⏱️ HH:MM:SS, because uptime is measured in days around here.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    )
}

/// 📋 What the consumer loop has been up to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Every message pulled off the queue.
    pub messages_seen: u64,
    pub decoded: u64,
    /// Decode failures.
    pub dropped: u64,
    /// Documents in bulk calls that went through (rejections included).
    pub indexed: u64,
    /// Documents the store turned away.
    pub rejected: u64,
    /// Documents lost to failed bulk calls.
    pub lost: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

impl IngestStats {
    pub fn record_flush(&mut self, outcome: &FlushOutcome) {
        match outcome {
            FlushOutcome::Empty => {}
            FlushOutcome::Written { documents } => {
                self.flushes += 1;
                self.indexed += *documents as u64;
            }
            FlushOutcome::PartiallyRejected { documents, rejected, .. } => {
                self.flushes += 1;
                self.indexed += *documents as u64;
                self.rejected += *rejected as u64;
            }
            FlushOutcome::Failed { documents, .. } => {
                self.failed_flushes += 1;
                self.lost += *documents as u64;
            }
        }
    }
}

/// 🌀 A live spinner with the running totals.
pub struct ProgressTicker {
    bar: ProgressBar,
    started: Instant,
}

impl ProgressTicker {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.yellow} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(250));
        Self {
            bar,
            started: Instant::now(),
        }
    }

    pub fn update(&self, stats: &IngestStats) {
        let elapsed = self.started.elapsed().as_secs_f64().max(1.0);
        self.bar.set_message(format!(
            "🍯 {} seen · {} indexed · {} dropped · {:.1} msg/s",
            format_number(stats.messages_seen),
            format_number(stats.indexed),
            format_number(stats.dropped),
            stats.messages_seen as f64 / elapsed,
        ));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ProgressTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🔧 ProgressBar does not do Debug. It's a whole thing.
        f.debug_struct("ProgressTicker")
            .field("started", &self.started)
            .finish()
    }
}

/// 🍽️ The end-of-run summary.
pub fn render_summary(stats: &IngestStats, sessions: u64, uptime: Duration) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["🍯 hfx", "total"]);

    let rows = [
        ("uptime", format_duration(uptime)),
        ("feed sessions", format_number(sessions)),
        ("messages seen", format_number(stats.messages_seen)),
        ("decoded", format_number(stats.decoded)),
        ("dropped (decode)", format_number(stats.dropped)),
        ("bulk flushes", format_number(stats.flushes)),
        ("failed flushes", format_number(stats.failed_flushes)),
        ("documents indexed", format_number(stats.indexed)),
        ("documents rejected", format_number(stats.rejected)),
        ("documents lost", format_number(stats.lost)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
