//! ASCII chart rendering over aggregation outputs
//!
//! Every chart writes to a generic [`std::io::Write`], so callers can
//! target stdout, a file, or an in-memory buffer. The realtime monitor
//! redraws a small dashboard on a background thread until stopped.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::info;

use crate::analysis::MemoryStats;
use crate::domain::format_bytes;
use crate::store::EventStore;

// Bar widths per chart, chosen so each row fits a classic 100-column
// terminal with its labels.
const FUNCTION_BAR_WIDTH: usize = 50;
const HISTOGRAM_BAR_WIDTH: usize = 40;
const TIMELINE_BAR_WIDTH: usize = 40;
const HOTSPOT_BAR_WIDTH: usize = 45;
const STACK_BAR_WIDTH: usize = 30;
const FILE_BAR_WIDTH: usize = 40;

fn bar(value: u64, max: u64, width: usize) -> String {
    let filled = if max == 0 {
        0
    } else {
        ((value as f64 / max as f64) * width as f64) as usize
    };
    let filled = filled.min(width);
    let mut out = String::with_capacity(width * 3);
    for _ in 0..filled {
        out.push('█');
    }
    for _ in filled..width {
        out.push(' ');
    }
    out
}

fn truncated(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn chart_header<W: Write>(writer: &mut W, title: &str) -> io::Result<()> {
    writeln!(writer, "\n========================================")?;
    writeln!(writer, "  {title}")?;
    writeln!(writer, "========================================\n")
}

fn format_timestamp(ns: u64) -> String {
    format!("{:.1}s", ns as f64 / 1e9)
}

// Chart rows show only the last frame of the key.
fn simplify_stack(stack_key: &str) -> &str {
    match stack_key.rfind(" <- ") {
        Some(at) => &stack_key[at + 4..],
        None => stack_key,
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Horizontal bars of per-function `total_allocated`, largest first.
pub fn draw_function_chart<W: Write>(
    stats: &MemoryStats,
    limit: usize,
    writer: &mut W,
) -> io::Result<()> {
    let functions = stats.get_function_stats(limit);
    if functions.is_empty() {
        return writeln!(writer, "No allocation data available.");
    }

    let max_size = functions[0].total_allocated;
    chart_header(writer, "Function Memory Allocation Chart")?;
    for func in &functions {
        writeln!(
            writer,
            "{:<25} |{}| {}",
            truncated(&func.function_name, 24),
            bar(func.total_allocated, max_size, FUNCTION_BAR_WIDTH),
            format_bytes(func.total_allocated)
        )?;
    }
    writeln!(writer)
}

/// Histogram of allocation counts over the fixed size buckets.
pub fn draw_size_histogram<W: Write>(stats: &MemoryStats, writer: &mut W) -> io::Result<()> {
    let buckets = stats.get_size_distribution_stats();
    if buckets.is_empty() {
        return writeln!(writer, "No size distribution data available.");
    }

    let max_count = buckets.iter().map(|b| b.count).max().unwrap_or(0);
    chart_header(writer, "Size Distribution Histogram")?;
    for bucket in &buckets {
        let upper = if bucket.max_size == u64::MAX {
            "inf".to_string()
        } else {
            format_bytes(bucket.max_size)
        };
        let label = format!("{}-{}", format_bytes(bucket.min_size), upper);
        writeln!(
            writer,
            "{:<20} |{}| {} allocs",
            truncated(&label, 20),
            bar(bucket.count, max_count, HISTOGRAM_BAR_WIDTH),
            bucket.count
        )?;
    }
    writeln!(writer)
}

/// Live memory over time, binned by `bucket_ns`.
pub fn draw_timeline<W: Write>(
    store: &EventStore,
    bucket_ns: u64,
    writer: &mut W,
) -> io::Result<()> {
    let timeline = store.get_allocation_timeline(bucket_ns);
    if timeline.is_empty() {
        return writeln!(writer, "No timeline data available.");
    }

    let max_usage = timeline.iter().map(|p| p.memory_usage).max().unwrap_or(0);
    chart_header(writer, "Memory Usage Timeline")?;
    for point in &timeline {
        writeln!(
            writer,
            "{:>12} |{}| {}",
            format_timestamp(point.timestamp),
            bar(point.memory_usage, max_usage, TIMELINE_BAR_WIDTH),
            format_bytes(point.memory_usage)
        )?;
    }
    writeln!(writer, "\nPeak usage: {}\n", format_bytes(max_usage))
}

/// Ranked functions by `total_allocated`.
pub fn draw_hotspots_chart<W: Write>(
    stats: &MemoryStats,
    limit: usize,
    writer: &mut W,
) -> io::Result<()> {
    let hotspots = stats.get_memory_hotspots(limit);
    if hotspots.is_empty() {
        return writeln!(writer, "No hotspot data available.");
    }

    let max_size = hotspots[0].1;
    chart_header(writer, "Memory Hotspots")?;
    for (rank, (function, size)) in hotspots.iter().enumerate() {
        writeln!(
            writer,
            "{:>2}. {:<22} |{}| {}",
            rank + 1,
            truncated(function, 21),
            bar(*size, max_size, HOTSPOT_BAR_WIDTH),
            format_bytes(*size)
        )?;
    }
    writeln!(writer)
}

/// Most frequent call stacks, one row per stack key showing its
/// outermost frame.
pub fn draw_call_stack_chart<W: Write>(
    stats: &MemoryStats,
    limit: usize,
    writer: &mut W,
) -> io::Result<()> {
    let mut stacks: Vec<(String, u64)> = stats.get_call_stack_stats().into_iter().collect();
    if stacks.is_empty() {
        return writeln!(writer, "No call stack data available.");
    }
    stacks.sort_unstable_by(|a, b| b.1.cmp(&a.1));
    if limit > 0 {
        stacks.truncate(limit);
    }

    let max_count = stacks[0].1;
    chart_header(writer, "Top Call Stacks by Frequency")?;
    for (rank, (stack, count)) in stacks.iter().enumerate() {
        writeln!(
            writer,
            "{:>3}. {:<30} |{}| {}",
            rank + 1,
            truncated(simplify_stack(stack), 30),
            bar(*count, max_count, STACK_BAR_WIDTH),
            count
        )?;
    }
    writeln!(writer)
}

/// Horizontal bars of per-file `total_allocated`, largest first.
pub fn draw_file_chart<W: Write>(
    stats: &MemoryStats,
    limit: usize,
    writer: &mut W,
) -> io::Result<()> {
    let files = stats.get_file_stats(limit);
    if files.is_empty() {
        return writeln!(writer, "No file allocation data available.");
    }

    let max_size = files[0].total_allocated;
    chart_header(writer, "File Memory Allocation Chart")?;
    for file in &files {
        writeln!(
            writer,
            "{:<28} |{}| {}",
            truncated(file_name(&file.file_path), 27),
            bar(file.total_allocated, max_size, FILE_BAR_WIDTH),
            format_bytes(file.total_allocated)
        )?;
    }
    writeln!(writer)
}

fn draw_dashboard<W: Write>(stats: &MemoryStats, writer: &mut W) -> io::Result<()> {
    chart_header(writer, "Realtime Memory Monitor")?;
    writeln!(writer, "{}", stats.summary_text())?;
    draw_hotspots_chart(stats, 5, writer)?;
    draw_size_histogram(stats, writer)
}

/// Render a chart into a `String` using any of the writer-based drawers.
pub fn render_to_string<F>(draw: F) -> String
where
    F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
{
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = draw(&mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Background thread redrawing the stats dashboard to stdout until
/// stopped (or dropped).
pub struct RealtimeMonitor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RealtimeMonitor {
    /// Spawn the monitor, refreshing every `refresh_interval`.
    #[must_use]
    pub fn start(stats: Arc<MemoryStats>, refresh_interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                let mut stdout = io::stdout();
                // ANSI clear screen + home.
                let _ = write!(stdout, "\x1b[2J\x1b[H");
                let _ = draw_dashboard(&stats, &mut stdout);
                let _ = stdout.flush();
                thread::sleep(refresh_interval);
            }
        });
        info!("realtime monitor started");
        Self { running, handle: Some(handle) }
    }

    /// Stop the monitor and join its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.running.swap(false, Ordering::Relaxed) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            info!("realtime monitor stopped");
        }
    }
}

impl Drop for RealtimeMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
