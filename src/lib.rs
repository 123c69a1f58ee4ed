//! Heap allocation tracking with named-region attribution.
//!
//! A [`Registry`] keeps cumulative byte counters and a map of every live,
//! tracked allocation to its [`Block`] metadata (size, region name, call
//! site). Allocations are attributed to regions by manual bracketing:
//!
//! ```
//! use heaptag::Registry;
//!
//! let registry = Registry::new();
//! registry.push_name("Physics");
//! // ...allocations made here are tagged "Physics"...
//! registry.pop_name();
//! ```
//!
//! Two mutually exclusive interception schemes feed a registry:
//!
//! - [`TracingAlloc`] wraps any `GlobalAlloc` and keeps all metadata in the
//!   registry's side table; the returned pointers are untouched.
//! - [`HeaderAlloc`] wraps the raw `malloc`/`free` primitive and embeds a
//!   signature + size (+ name) header before each returned pointer,
//!   recovering everything from memory layout on release.
//!
//! Route every allocation through exactly one of the two. A nonempty
//! [`Registry::blocks`] map at measurement time is your leak.

pub mod alloc;
pub mod serialize;
pub mod util;

pub use alloc::block::{Block, Label, MAX_REGION_NAME, MAX_SOURCE_FILE};
pub use alloc::header::{HeaderAlloc, LibcHeap, RawAllocator};
pub use alloc::registry::{global, LeakReport, Registry, Stats};
pub use alloc::tracing::TracingAlloc;
pub use alloc::NullRelease;
