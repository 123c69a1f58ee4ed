//! Deliberately leak a named block and dump the registry's report as JSON.

use std::alloc::{Layout, System};

use heaptag::{Registry, TracingAlloc};

fn main() {
    env_logger::init();

    let registry = Registry::new();
    let tracing = TracingAlloc::with_registry(System, &registry);

    registry.push_name("Net");
    let leaked = unsafe { tracing.allocate(Layout::from_size_align(32, 8).unwrap()) };
    registry.pop_name();

    let freed = unsafe { tracing.allocate(Layout::from_size_align(64, 8).unwrap()) };
    unsafe { tracing.release(freed, Layout::from_size_align(64, 8).unwrap()) };

    // `leaked` is never released; the report below is the symptom
    assert!(!leaked.is_null());
    println!(
        "{}",
        serde_json::to_string_pretty(&registry.leak_report()).expect("report serializes")
    );
}
