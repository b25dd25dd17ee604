//! End-to-end scenarios over the store and the aggregator using
//! synthetic event batches, the way an embedding program feeds them
//! after a capture session.

use heapscope::domain::FREED_ADDRESS;
use heapscope::{AllocationEvent, EventStore, MemoryStats};

fn event(ts: u64, addr: u64, size: u64, function: &str) -> AllocationEvent {
    AllocationEvent {
        timestamp: ts,
        address: addr,
        size,
        function: function.to_string(),
        file: "unknown".to_string(),
        line: 0,
        thread_id: 1,
        stack_trace: vec![function.to_string()],
    }
}

#[test]
fn test_single_alloc_free_scenario() {
    // One 64-byte allocation in `f`, later freed: the snapshot carries the
    // freed marker on the original entry.
    let store = EventStore::new();
    let stats = MemoryStats::new();

    let mut freed = event(100, 0x1000, 64, "f");
    freed.address = FREED_ADDRESS;
    store.add(freed.clone());
    stats.add(&freed);

    assert!(store.get_leaks().is_empty());
    assert_eq!(store.query_by_function("f").total_count, 0);

    let f = stats.get_function("f").expect("stats for f");
    assert_eq!(f.allocation_count, 1);
    assert_eq!(f.total_allocated, 64);
    assert_eq!(f.current_allocated, 0);
    assert_eq!(f.peak_allocated, 64);
    assert!((f.avg_size - 64.0).abs() < f64::EPSILON);
}

#[test]
fn test_pure_leak_scenario() {
    let store = EventStore::new();
    let stats = MemoryStats::new();

    let leak = event(100, 0x2000, 200, "g");
    store.add(leak.clone());
    stats.add(&leak);

    let leaks = store.get_leaks();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].size, 200);
    assert_eq!(stats.get_function("g").unwrap().current_allocated, 200);
}

#[test]
fn test_capacity_eviction_keeps_aggregator_totals() {
    let store = EventStore::new();
    let stats = MemoryStats::new();
    store.set_max_allocations(3);

    for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        let e = event(i as u64, 0x100 + i as u64, 10, name);
        store.add(e.clone());
        stats.add(&e);
    }

    // Store retains the newest three; the aggregator still saw all five.
    assert_eq!(store.len(), 3);
    assert_eq!(store.query_by_function("a").total_count, 0);
    assert_eq!(store.query_by_function("e").total_count, 1);
    assert_eq!(stats.total_allocations(), 5);
}

#[test]
fn test_summary_shape() {
    let store = EventStore::initialize(scratch_dir("summary")).expect("init store");
    store.add(event(1, 0x1, 16, "f"));
    store.add(event(2, 0x2, 16, "f"));

    let summary = store.summary();
    assert_eq!(summary["total_allocations"], 2);
    assert_eq!(summary["unique_functions"], 1);
    assert!(summary["data_dir"].as_str().unwrap().contains("summary"));
    assert_eq!(summary["by_function"]["f"]["count"], 2);
    assert_eq!(summary["by_function"]["f"]["total_size"], 32);
}

#[test]
fn test_shutdown_persists_and_reimport_matches() {
    let dir = scratch_dir("persist");
    let store = EventStore::initialize(&dir).expect("init store");
    store.add(event(1, 0x10, 100, "f"));
    store.add(event(2, FREED_ADDRESS, 50, "g"));
    let before = store.snapshot();

    store.shutdown().expect("shutdown persists");
    assert!(store.is_empty());

    let restored = EventStore::new();
    restored.import_json(dir.join("allocations.json")).expect("import");
    assert_eq!(restored.snapshot(), before);
    assert_eq!(restored.query_by_function("f").total_count, 1);
}

fn scratch_dir(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("heapscope-test-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
