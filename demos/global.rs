//! The side-table scheme installed process-wide. Lives here rather than in
//! tests/ because a global allocator cannot be swapped per-test.

use std::alloc::System;

use heaptag::{global, TracingAlloc};

#[global_allocator]
static GLOBAL: TracingAlloc<'static> = TracingAlloc::new(System);

fn main() {
    env_logger::init();

    global().push_name("Startup");
    let held: Vec<u64> = (0..512).collect();
    global().pop_name();

    let stats = global().stats();
    println!(
        "allocated {} bytes so far, {} currently live",
        stats.total_allocated, stats.currently_allocated
    );
    for (addr, block) in global().blocks() {
        println!(
            "{addr:#x}: {:>6} bytes  region={}",
            block.size(),
            block.name().unwrap_or("-"),
        );
    }

    drop(held);
    println!("after drop: {} bytes live", global().currently_allocated());
}
