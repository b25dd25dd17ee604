//! # heapscope demo binary
//!
//! Runs a synthetic workload under capture, feeds the store and the
//! aggregator, renders every chart, exports the JSON documents and prints
//! the text report plus the leak list. The workload mixes short-lived
//! buffers, string churn, multi-threaded allocation and one deliberate
//! leak so each report section has something to show.

use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use heapscope::capture::{Capture, TraceAllocator};
use heapscope::chart::{
    draw_call_stack_chart, draw_file_chart, draw_function_chart, draw_hotspots_chart,
    draw_size_histogram, draw_timeline, RealtimeMonitor,
};
use heapscope::cli::Args;
use heapscope::{export, logging, EventStore, MemoryStats};

#[global_allocator]
static ALLOC: TraceAllocator = TraceAllocator::system();

fn fill_vectors() {
    let data: Vec<i32> = (0..100).collect();
    let mut text = Vec::with_capacity(1024);
    text.extend_from_slice(&[0u8; 1024]);
    black_box((&data, &text));
}

fn build_string_table() {
    let mut table = Vec::with_capacity(64);
    for i in 0..64 {
        table.push(format!("row {i} with some payload to move off the stack"));
    }
    let large: Vec<u8> = Vec::with_capacity(4096);
    black_box((&table, &large));
    thread::sleep(Duration::from_millis(10));
}

fn tiny_boxes() {
    let answer = Box::new(42u64);
    black_box(&answer);
    thread::sleep(Duration::from_millis(5));
}

fn churn_small_blocks() {
    for _ in 0..100 {
        let block = Box::new(7i32);
        black_box(&block);
    }
    for _ in 0..10 {
        let buf: Vec<u8> = Vec::with_capacity(256);
        black_box(&buf);
    }
}

fn leak_block() {
    // Deliberate leak so the leak report has content.
    let leaked: &'static mut [u8] = Box::leak(vec![0u8; 200].into_boxed_slice());
    black_box(&leaked);

    let released: Vec<f64> = Vec::with_capacity(100);
    black_box(&released);
}

fn worker_churn(id: usize) {
    for _ in 0..5 {
        let data: Vec<i32> = Vec::with_capacity(100 + id * 10);
        black_box(&data);
        thread::sleep(Duration::from_millis(5));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_level, args.log_file.as_deref())?;

    let store = EventStore::initialize(&args.data_dir)?;
    let stats = Arc::new(MemoryStats::new());

    let capture = match Capture::initialize() {
        Ok(capture) => capture,
        Err(err) => {
            warn!("allocator hook resolution failed ({err}); relying on the global allocator wrapper");
            Capture::global().context("capture session was not published")?
        }
    };

    // The dashboard is driven live from the allocation callback; the
    // aggregator is reset and refed from the final snapshot afterwards so
    // the report also reflects deallocations.
    let monitor = if args.realtime {
        let live_stats = Arc::clone(&stats);
        capture.set_allocation_callback(move |event| live_stats.add(event));
        Some(RealtimeMonitor::start(Arc::clone(&stats), Duration::from_millis(500)))
    } else {
        None
    };

    info!("starting workload under capture");
    capture.start();

    for _ in 0..3 {
        fill_vectors();
        build_string_table();
        tiny_boxes();
        churn_small_blocks();
        leak_block();
    }

    let workers: Vec<_> = (0..4).map(|id| thread::spawn(move || worker_churn(id))).collect();
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    capture.stop();

    if let Some(monitor) = monitor {
        monitor.stop();
        capture.clear_allocation_callback();
        stats.reset();
    }

    let events = capture.get_allocations();
    info!("captured {} allocation events", events.len());

    store.add_batch(events.clone());
    stats.add_batch(&events);

    let mut stdout = std::io::stdout();
    draw_function_chart(&stats, args.limit, &mut stdout)?;
    draw_size_histogram(&stats, &mut stdout)?;
    draw_hotspots_chart(&stats, args.limit, &mut stdout)?;
    draw_file_chart(&stats, args.limit, &mut stdout)?;
    draw_call_stack_chart(&stats, args.limit, &mut stdout)?;
    draw_timeline(&store, args.timeline_bucket_ns, &mut stdout)?;

    if let Some(path) = &args.export {
        store.export_json(path)?;
    }
    let timeline = store.get_allocation_timeline(args.timeline_bucket_ns);
    export::write_timeline_file(&args.data_dir.join("timeline.json"), &timeline)?;
    export::write_summary_file(&args.data_dir.join("summary.json"), &store.summary())?;

    println!("{}", stats.generate_report());

    let leaks = store.get_leaks();
    println!("Found {} potential memory leaks.", leaks.len());
    for (rank, leak) in leaks.iter().take(5).enumerate() {
        println!(
            "  {}. {} @ {}:{} ({} bytes)",
            rank + 1,
            leak.function,
            leak.file,
            leak.line,
            leak.size
        );
    }

    capture.shutdown();
    stats.reset();
    store.shutdown()?;

    println!(
        "\nDone. Allocation data persisted under {}.",
        args.data_dir.display()
    );
    Ok(())
}
