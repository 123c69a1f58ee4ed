//! The allocation registry: cumulative counters, the live address -> [`Block`]
//! map, and the name stack that tags new allocations.
//!
//! A [`Registry`] is an ordinary value -- own one and hand `&Registry` to the
//! interception scheme of your choice. [`global()`] exists for the common case
//! of a single process-wide registry, but nothing in the crate requires it.
//!
//! Every mutating operation is guarded by one internal mutex, so a registry
//! can be shared across threads. The teardown flag is deliberately *outside*
//! the mutex: once teardown begins, deallocation registration must become a
//! no-op even if the map's own invariants are already suspect.

use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};

use ahash::RandomState;
use hashbrown::HashMap;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::block::{Block, Label, MAX_REGION_NAME};
use super::names::NameStack;

/// The five cumulative byte counters. `currently_allocated` always equals
/// `total_allocated - total_deallocated`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_allocated: usize,
    pub total_deallocated: usize,
    pub currently_allocated: usize,
    pub last_allocated: usize,
    pub last_deallocated: usize,
}

impl Stats {
    fn on_alloc(&mut self, size: usize) {
        self.total_allocated += size;
        self.currently_allocated += size;
        self.last_allocated = size;
    }

    fn on_dealloc(&mut self, size: usize) {
        self.total_deallocated += size;
        self.currently_allocated -= size;
        self.last_deallocated = size;
    }
}

struct Inner {
    stats: Stats,
    blocks: HashMap<usize, Block, RandomState>,
    names: NameStack,
}

/// Process- or scope-wide allocation tracking state.
pub struct Registry {
    inner: Mutex<Inner>,
    tearing_down: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: Stats::default(),
                blocks: HashMap::with_hasher(RandomState::new()),
                names: NameStack::new(),
            }),
            tearing_down: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock just means some thread panicked mid-update; the
        // counters are still more useful than a second panic here.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful allocation of `size` payload bytes at `addr`,
    /// tagging the new [`Block`] with the active region name and, when
    /// given, the call site.
    ///
    /// `addr` should be the pointer the underlying allocator just returned;
    /// an existing entry at the same address is overwritten.
    pub fn register_allocation(&self, addr: usize, size: usize, site: Option<&Location<'_>>) {
        let mut inner = self.lock();
        inner.stats.on_alloc(size);

        let name = inner.names.active().copied().unwrap_or_default();
        // An oversized path is dropped in full rather than truncated
        let file = site
            .and_then(|loc| Label::new(loc.file()))
            .unwrap_or_default();
        let line = site.map_or(0, |loc| loc.line());

        inner.blocks.insert(addr, Block::new(size, name, file, line));
    }

    /// Record the release of the allocation at `addr`. An address that was
    /// never registered (or was already released) is silently ignored, and
    /// once teardown has begun this is a no-op.
    pub fn register_deallocation(&self, addr: usize) {
        if self.tearing_down.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.lock();
        if let Some(block) = inner.blocks.remove(&addr) {
            inner.stats.on_dealloc(block.size());
        }
    }

    /// Bump the counters for an allocation tracked without a side-table
    /// entry (the header encoding scheme keeps its metadata in-band).
    pub fn record_alloc(&self, size: usize) {
        self.lock().stats.on_alloc(size);
    }

    /// Counterpart of [`record_alloc`](Self::record_alloc). No-op once
    /// teardown has begun.
    pub fn record_dealloc(&self, size: usize) {
        if self.tearing_down.load(Ordering::Acquire) {
            return;
        }
        self.lock().stats.on_dealloc(size);
    }

    /// Push a region name; allocations made while it is on top of the stack
    /// are attributed to it. A name with `len() >= MAX_REGION_NAME` is
    /// rejected and the previously active name (if any) stays in effect.
    pub fn push_name(&self, name: &str) {
        let pushed = self.lock().names.push(name);
        if !pushed {
            warn!(
                "rejected region name of {} bytes (capacity {})",
                name.len(),
                MAX_REGION_NAME
            );
        }
    }

    /// Pop the most recent region name. No-op on an empty stack.
    pub fn pop_name(&self) {
        self.lock().names.pop();
    }

    /// Drain the name stack entirely.
    pub fn clear_names(&self) {
        self.lock().names.clear();
    }

    /// The region name new allocations are currently attributed to.
    pub fn active_name(&self) -> Option<Label<MAX_REGION_NAME>> {
        self.lock().names.active().copied()
    }

    pub fn stats(&self) -> Stats {
        self.lock().stats
    }

    pub fn total_allocated(&self) -> usize {
        self.lock().stats.total_allocated
    }

    pub fn total_deallocated(&self) -> usize {
        self.lock().stats.total_deallocated
    }

    pub fn currently_allocated(&self) -> usize {
        self.lock().stats.currently_allocated
    }

    pub fn last_allocated(&self) -> usize {
        self.lock().stats.last_allocated
    }

    pub fn last_deallocated(&self) -> usize {
        self.lock().stats.last_deallocated
    }

    /// Snapshot of the live address -> [`Block`] map. Ordered by address so
    /// dumps are deterministic.
    pub fn blocks(&self) -> BTreeMap<usize, Block> {
        self.lock()
            .blocks
            .iter()
            .map(|(&addr, &block)| (addr, block))
            .collect()
    }

    /// Counters plus every block still live -- a nonempty block map at
    /// measurement time is the leak this crate exists to surface.
    pub fn leak_report(&self) -> LeakReport {
        let inner = self.lock();
        LeakReport {
            stats: inner.stats,
            blocks: inner
                .blocks
                .iter()
                .map(|(&addr, &block)| (addr, block))
                .collect(),
        }
    }

    /// Freeze deallocation registration. Called automatically on drop; call
    /// it earlier if the registry may outlive the code releasing into it.
    /// Idempotent, and never unset.
    pub fn begin_teardown(&self) {
        if !self.tearing_down.swap(true, Ordering::AcqRel) {
            debug!("registry teardown; {} blocks live", self.lock().blocks.len());
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.begin_teardown();
    }
}

/// Everything needed to diagnose a leak offline, serializable as-is.
#[derive(Clone, Debug, Serialize)]
pub struct LeakReport {
    pub stats: Stats,
    pub blocks: BTreeMap<usize, Block>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry used by schemes constructed without an
/// explicitly injected one. Lives until process exit; never dropped, so its
/// teardown flag only matters if you call `begin_teardown()` yourself.
pub fn global() -> &'static Registry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_register_pairs() {
        let registry = Registry::new();
        registry.register_allocation(0x1000, 64, None);
        registry.register_allocation(0x2000, 32, None);
        assert_eq!(registry.total_allocated(), 96);
        assert_eq!(registry.currently_allocated(), 96);
        assert_eq!(registry.last_allocated(), 32);

        registry.register_deallocation(0x1000);
        assert_eq!(registry.total_deallocated(), 64);
        assert_eq!(registry.currently_allocated(), 32);
        assert_eq!(registry.last_deallocated(), 64);
        assert_eq!(registry.blocks().len(), 1);
    }

    #[test]
    fn unknown_address_is_ignored() {
        let registry = Registry::new();
        registry.register_allocation(0x1000, 64, None);
        let before = registry.stats();
        registry.register_deallocation(0xdead);
        assert_eq!(registry.stats(), before);
    }

    #[test]
    fn teardown_freezes_counters() {
        let registry = Registry::new();
        registry.register_allocation(0x1000, 64, None);
        let before = registry.stats();
        registry.begin_teardown();
        registry.register_deallocation(0x1000);
        assert_eq!(registry.stats(), before);
        registry.record_dealloc(64);
        assert_eq!(registry.stats(), before);
    }

    #[test]
    fn active_name_tags_blocks() {
        let registry = Registry::new();
        registry.push_name("Physics");
        registry.register_allocation(0x1000, 16, None);
        registry.pop_name();
        registry.register_allocation(0x2000, 16, None);

        let blocks = registry.blocks();
        assert_eq!(blocks[&0x1000].name(), Some("Physics"));
        assert_eq!(blocks[&0x2000].name(), None);
    }

    #[test]
    fn call_site_is_recorded() {
        let registry = Registry::new();
        registry.register_allocation(0x1000, 8, Some(Location::caller()));
        let blocks = registry.blocks();
        assert_eq!(blocks[&0x1000].source_file(), Some(file!()));
        assert!(blocks[&0x1000].line() > 0);
    }
}
