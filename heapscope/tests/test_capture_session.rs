//! Multi-threaded determinism of the capture session, driven through the
//! public recorder API with synthetic addresses so the expected counts
//! are exact.

use std::collections::HashSet;
use std::thread;

use heapscope::{Capture, MemoryStats};

const THREADS: u64 = 4;
const PAIRS_PER_THREAD: u64 = 1_000;

#[test]
fn test_four_threads_of_alloc_free_pairs() {
    let capture = match Capture::initialize() {
        Ok(capture) => capture,
        Err(_) => Capture::global().expect("session published even when hooks fail"),
    };
    capture.clear();
    capture.start();

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            thread::spawn(move || {
                let function = format!("worker_{t}");
                for i in 0..PAIRS_PER_THREAD {
                    let address = (t + 1) << 32 | (i + 1) << 4;
                    Capture::global()
                        .expect("session available")
                        .record_allocation(address, 64, Some(&function), None, 0);
                    Capture::global().expect("session available").record_deallocation(address);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    // A zero-sized allocation is still an event.
    capture.record_allocation(0xF00D, 0, Some("zero"), None, 0);

    capture.stop();

    let events = capture.get_allocations();
    let paired: Vec<_> = events.iter().filter(|e| e.function.starts_with("worker_")).collect();
    assert_eq!(paired.len(), (THREADS * PAIRS_PER_THREAD) as usize);
    assert!(paired.iter().all(|e| e.is_freed()));

    // No address may appear twice as live, and per-thread timestamps are
    // nondecreasing in buffer order.
    let mut live_addresses = HashSet::new();
    for event in &events {
        if !event.is_freed() {
            assert!(live_addresses.insert(event.address), "address live twice");
        }
    }
    for t in 0..THREADS {
        let function = format!("worker_{t}");
        let stamps: Vec<u64> = events
            .iter()
            .filter(|e| e.function == function)
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(stamps.len(), PAIRS_PER_THREAD as usize);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "timestamps regressed on {function}");
    }

    // Aggregator view: everything allocated was freed again.
    let stats = MemoryStats::new();
    stats.add_batch(&events);
    assert_eq!(stats.total_allocations(), THREADS * PAIRS_PER_THREAD + 1);
    let current_total: u64 =
        stats.get_function_stats(0).iter().map(|f| f.current_allocated).sum();
    assert_eq!(current_total, 0);

    let zero = events.iter().find(|e| e.function == "zero").expect("zero-size event recorded");
    assert_eq!(zero.size, 0);

    capture.shutdown();
}
