//! Round-trip laws for the JSON persistence layer.

use heapscope::domain::FREED_ADDRESS;
use heapscope::{export, AllocationEvent, EventStore, MemoryStats};

fn sample_batch() -> Vec<AllocationEvent> {
    vec![
        AllocationEvent {
            timestamp: 1_000,
            address: 0x10,
            size: 64,
            function: "alpha".to_string(),
            file: "src/alpha.rs".to_string(),
            line: 12,
            thread_id: 1,
            stack_trace: vec!["alpha".to_string(), "main".to_string()],
        },
        AllocationEvent {
            timestamp: 2_000,
            address: FREED_ADDRESS,
            size: 256,
            function: "beta".to_string(),
            file: "unknown".to_string(),
            line: 0,
            thread_id: 2,
            stack_trace: vec!["beta".to_string()],
        },
        AllocationEvent {
            timestamp: 3_000,
            address: 0x30,
            size: 0,
            function: "gamma".to_string(),
            file: "unknown".to_string(),
            line: 0,
            thread_id: 1,
            stack_trace: vec![],
        },
    ]
}

#[test]
fn test_export_import_into_empty_store_is_identical() {
    let store = EventStore::new();
    store.add_batch(sample_batch());

    let mut buffer = Vec::new();
    export::write_events(&mut buffer, &store.snapshot()).expect("export");

    let restored = EventStore::new();
    restored.add_batch(export::read_events(buffer.as_slice()).expect("import"));

    assert_eq!(store.snapshot(), restored.snapshot());
    // Indexed views agree too, not just the raw log.
    assert_eq!(
        store.query_by_function("alpha").total_size,
        restored.query_by_function("alpha").total_size
    );
    assert_eq!(store.get_leaks(), restored.get_leaks());
    assert_eq!(store.get_allocation_timeline(1_000), restored.get_allocation_timeline(1_000));
}

#[test]
fn test_clear_and_reingest_reproduces_aggregator_outputs() {
    let batch = sample_batch();

    let stats = MemoryStats::new();
    stats.add_batch(&batch);
    let functions_before = stats.get_function_stats(0);
    let buckets_before = stats.get_size_distribution_stats();
    let total_before = stats.total_memory_allocated();

    let mut buffer = Vec::new();
    export::write_events(&mut buffer, &batch).expect("export");
    let reloaded = export::read_events(buffer.as_slice()).expect("import");

    stats.reset();
    stats.add_batch(&reloaded);

    assert_eq!(stats.total_memory_allocated(), total_before);
    assert_eq!(stats.get_size_distribution_stats(), buckets_before);

    let mut names_before: Vec<_> =
        functions_before.iter().map(|f| (f.function_name.clone(), f.total_allocated)).collect();
    let mut names_after: Vec<_> = stats
        .get_function_stats(0)
        .iter()
        .map(|f| (f.function_name.clone(), f.total_allocated))
        .collect();
    names_before.sort();
    names_after.sort();
    assert_eq!(names_before, names_after);
}

#[test]
fn test_zero_sized_allocation_round_trips() {
    let batch = sample_batch();
    let mut buffer = Vec::new();
    export::write_events(&mut buffer, &batch).expect("export");
    let restored = export::read_events(buffer.as_slice()).expect("import");

    let zero = restored.iter().find(|e| e.function == "gamma").expect("gamma present");
    assert_eq!(zero.size, 0);
    assert_eq!(zero.address, 0x30);
}
