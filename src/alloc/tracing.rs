//! The side-table interception scheme: a wrapper around any [`GlobalAlloc`]
//! that registers every allocation and release with a [`Registry`].
//!
//! No header bytes are added -- the pointer handed to the caller is exactly
//! the pointer the inner allocator produced, and all metadata lives in the
//! registry's block map. Install it process-wide with `#[global_allocator]`,
//! or keep one local and call [`allocate`](TracingAlloc::allocate) /
//! [`release`](TracingAlloc::release) directly to capture call sites.
//!
//! Mutually exclusive with the header scheme in [`super::header`]: route
//! every allocation through exactly one of the two.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::panic::Location;

use crate::util::hint::cold;

use super::registry::{global, Registry};
use super::NullRelease;

thread_local! {
    static IN_REGISTRY: Cell<bool> = const { Cell::new(false) };
}

/// Held while this thread is inside the registry. The registry's own map
/// mutations allocate through the same global allocator; without this token
/// those inner allocations would re-enter tracking and deadlock on the
/// registry mutex.
struct ReentryToken;

impl ReentryToken {
    fn enter() -> Option<Self> {
        IN_REGISTRY
            .try_with(|flag| {
                if flag.get() {
                    None
                } else {
                    flag.set(true);
                    Some(ReentryToken)
                }
            })
            // TLS already torn down: allocate untracked rather than abort
            .unwrap_or(None)
    }
}

impl Drop for ReentryToken {
    fn drop(&mut self) {
        let _ = IN_REGISTRY.try_with(|flag| flag.set(false));
    }
}

/// A tracking wrapper over an inner allocator.
pub struct TracingAlloc<'r, A = System> {
    inner: A,
    registry: Option<&'r Registry>,
    null_release: NullRelease,
}

impl<A> TracingAlloc<'static, A> {
    /// Track through the process-wide [`global()`] registry. `const`, so it
    /// can back a `#[global_allocator]` static.
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            registry: None,
            null_release: NullRelease::Ignore,
        }
    }
}

impl<'r, A> TracingAlloc<'r, A> {
    /// Track through an explicitly owned registry instead of the global one.
    pub const fn with_registry(inner: A, registry: &'r Registry) -> Self {
        Self {
            inner,
            registry: Some(registry),
            null_release: NullRelease::Ignore,
        }
    }

    /// Set the policy for [`release`](Self::release) of a null pointer.
    pub const fn null_release(mut self, policy: NullRelease) -> Self {
        self.null_release = policy;
        self
    }

    pub fn registry(&self) -> &Registry {
        match self.registry {
            Some(registry) => registry,
            None => global(),
        }
    }
}

impl<'r, A> TracingAlloc<'r, A>
where
    A: GlobalAlloc,
{
    /// Allocate and register, attributing the block to this call site.
    ///
    /// A failed inner allocation is returned unchanged (null) and never
    /// registered -- tracking must not mask an allocation failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::alloc`].
    #[track_caller]
    pub unsafe fn allocate(&self, layout: Layout) -> *mut u8 {
        let site = Location::caller();
        let ptr = unsafe { self.inner.alloc(layout) };
        if ptr.is_null() {
            return cold(|| ptr);
        }
        if let Some(_token) = ReentryToken::enter() {
            self.registry()
                .register_allocation(ptr as usize, layout.size(), Some(site));
        }
        ptr
    }

    /// Release through the inner allocator, then unregister.
    ///
    /// A null `ptr` is handled per the configured [`NullRelease`] policy:
    /// silently ignored, or raised as a panic (catchable with
    /// `catch_unwind`).
    ///
    /// # Safety
    ///
    /// If `ptr` is non-null, the same contract as [`GlobalAlloc::dealloc`].
    pub unsafe fn release(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            match self.null_release {
                NullRelease::Ignore => return,
                NullRelease::Fault => panic!("attempted to release a null pointer"),
            }
        }
        unsafe { self.inner.dealloc(ptr, layout) };
        if let Some(_token) = ReentryToken::enter() {
            self.registry().register_deallocation(ptr as usize);
        }
    }
}

unsafe impl<'r, A> GlobalAlloc for TracingAlloc<'r, A>
where
    A: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if ptr.is_null() {
            return cold(|| ptr);
        }
        // No call site here: `GlobalAlloc` carries none. Use `allocate()`
        // for attributed allocations.
        if let Some(_token) = ReentryToken::enter() {
            self.registry()
                .register_allocation(ptr as usize, layout.size(), None);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // `GlobalAlloc` guarantees a non-null `ptr`, so the null-release
        // policy never applies on this path.
        unsafe { self.inner.dealloc(ptr, layout) };
        if let Some(_token) = ReentryToken::enter() {
            self.registry().register_deallocation(ptr as usize);
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if ptr.is_null() {
            return cold(|| ptr);
        }
        if let Some(_token) = ReentryToken::enter() {
            self.registry()
                .register_allocation(ptr as usize, layout.size(), None);
        }
        ptr
    }
}
