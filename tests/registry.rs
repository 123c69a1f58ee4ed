//! Counter and attribution semantics through the public API, with the
//! side-table scheme injected rather than installed globally (a global
//! allocator cannot be swapped per-test).

use std::alloc::{Layout, System};

use heaptag::{Registry, TracingAlloc, MAX_REGION_NAME};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn unnamed_then_named_scenario() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);

    let first = unsafe { tracing.allocate(Layout::from_size_align(64, 8).unwrap()) };
    assert_eq!(registry.total_allocated(), 64);
    assert_eq!(registry.currently_allocated(), 64);

    registry.push_name("Net");
    let second = unsafe { tracing.allocate(Layout::from_size_align(32, 8).unwrap()) };
    registry.pop_name();
    assert_eq!(registry.total_allocated(), 96);
    assert_eq!(registry.currently_allocated(), 96);

    unsafe { tracing.release(first, Layout::from_size_align(64, 8).unwrap()) };
    assert_eq!(registry.total_deallocated(), 64);
    assert_eq!(registry.currently_allocated(), 32);

    let blocks = registry.blocks();
    assert_eq!(blocks.len(), 1);
    let block = &blocks[&(second as usize)];
    assert_eq!(block.name(), Some("Net"));
    assert_eq!(block.size(), 32);

    unsafe { tracing.release(second, Layout::from_size_align(32, 8).unwrap()) };
}

#[test]
fn region_brackets_attribute_only_inside() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);
    let layout = Layout::from_size_align(16, 8).unwrap();

    registry.push_name("Region");
    let a = unsafe { tracing.allocate(layout) };
    registry.pop_name();
    let b = unsafe { tracing.allocate(layout) };

    let blocks = registry.blocks();
    assert_eq!(blocks[&(a as usize)].name(), Some("Region"));
    assert_eq!(blocks[&(b as usize)].name(), None);

    unsafe {
        tracing.release(a, layout);
        tracing.release(b, layout);
    }
}

#[test]
fn oversized_name_leaves_active_name_unchanged() {
    init_logging();
    let registry = Registry::new();
    registry.push_name("keep");
    registry.push_name(&"x".repeat(MAX_REGION_NAME));
    assert_eq!(registry.active_name().unwrap().as_str(), "keep");

    // An exactly-at-capacity name is rejected too
    registry.push_name(&"y".repeat(MAX_REGION_NAME));
    assert_eq!(registry.active_name().unwrap().as_str(), "keep");

    registry.clear_names();
    assert!(registry.active_name().is_none());
}

#[test]
fn releasing_a_foreign_address_changes_nothing() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);
    let layout = Layout::from_size_align(48, 8).unwrap();

    let ptr = unsafe { tracing.allocate(layout) };
    let before = registry.stats();
    registry.register_deallocation(0xdead_beef);
    assert_eq!(registry.stats(), before);

    unsafe { tracing.release(ptr, layout) };
}

#[test]
fn teardown_freezes_all_five_counters() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);
    let layout = Layout::from_size_align(32, 8).unwrap();

    let ptr = unsafe { tracing.allocate(layout) };
    let before = registry.stats();

    registry.begin_teardown();
    unsafe { tracing.release(ptr, layout) };
    assert_eq!(registry.stats(), before);
}

#[test]
fn currently_allocated_is_sum_of_live_sizes() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);
    let mut rng = StdRng::seed_from_u64(0x1744);

    let mut live: Vec<(*mut u8, Layout)> = Vec::new();
    let mut live_bytes = 0usize;
    let mut total = 0usize;
    for _ in 0..200 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..=4096);
            let layout = Layout::from_size_align(size, 8).unwrap();
            let ptr = unsafe { tracing.allocate(layout) };
            assert!(!ptr.is_null());
            live.push((ptr, layout));
            live_bytes += size;
            total += size;
        } else {
            let (ptr, layout) = live.swap_remove(rng.gen_range(0..live.len()));
            unsafe { tracing.release(ptr, layout) };
            live_bytes -= layout.size();
        }
        assert_eq!(registry.currently_allocated(), live_bytes);
        assert_eq!(
            registry.currently_allocated(),
            registry.total_allocated() - registry.total_deallocated()
        );
    }
    assert_eq!(registry.total_allocated(), total);
    assert_eq!(registry.blocks().len(), live.len());

    for (ptr, layout) in live {
        unsafe { tracing.release(ptr, layout) };
    }
    assert_eq!(registry.currently_allocated(), 0);
    assert!(registry.blocks().is_empty());
}

#[test]
fn leak_report_serializes_live_blocks() {
    init_logging();
    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);
    let layout = Layout::from_size_align(128, 8).unwrap();

    registry.push_name("Assets");
    let leaked = unsafe { tracing.allocate(layout) };
    registry.pop_name();

    let report = registry.leak_report();
    assert_eq!(report.stats.currently_allocated, 128);
    assert_eq!(report.blocks.len(), 1);

    let json = serde_json::to_value(&report).unwrap();
    let blocks = json["blocks"].as_object().unwrap();
    let entry = blocks.values().next().unwrap();
    assert_eq!(entry["size"], 128);
    assert_eq!(entry["name"], "Assets");

    unsafe { tracing.release(leaked, layout) };
}
