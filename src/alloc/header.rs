//! The header-encoding interception scheme: wraps the raw `malloc`/`free`
//! primitive and keeps its metadata in-band, in a header written directly
//! before the pointer handed to the caller. No side table is consulted on
//! release -- everything is recovered from memory layout alone, which also
//! catches allocations made transitively by code a [`GlobalAlloc`] wrapper
//! would never see.
//!
//! Two header variants exist, distinguished by a 64-bit signature at a
//! fixed, variant-specific offset from the user pointer:
//!
//! ```plaintext
//! unnamed                        named
//! +-----------+ base             +-----------+ base
//! | signature | 8                | signature | 8
//! | size      | 8                | size      | 8
//! +-----------+ user ptr         | name      | MAX_REGION_NAME
//! | payload   |                  +-----------+ user ptr
//! .           .                  | payload   |
//! ```
//!
//! `size` is the *total* block size, header included. Release dispatches on
//! the signatures in a fixed order (unnamed offset first, then named, then
//! native forward); a misclassification here would free a corrupted base
//! address, so the dispatch function is kept standalone and exhaustively
//! tested.
//!
//! [`GlobalAlloc`]: std::alloc::GlobalAlloc

use std::ffi::c_void;
use std::mem;
use std::ptr;

use bytemuck::{Pod, Zeroable};

use crate::util::hint::cold;

use super::block::MAX_REGION_NAME;
use super::registry::{global, Registry};
use super::NullRelease;

/// Marks a block allocated with no active region name. Only the low 16 bits
/// differ between the two variants; the wide shared prefix makes an
/// accidental match against foreign heap bytes negligible.
pub const UNNAMED_SIGNATURE: u64 = 0x68656170_0000FCFC;

/// Marks a block carrying an inline region name.
pub const NAMED_SIGNATURE: u64 = 0x68656170_0000FCFD;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct UnnamedHeader {
    signature: u64,
    /// Total block size, header included.
    size: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct NamedHeader {
    signature: u64,
    /// Total block size, header included.
    size: u64,
    /// Active region name, zero-padded.
    name: [u8; MAX_REGION_NAME],
}

/// Bytes between the block base and the user pointer, per variant. The
/// signature therefore sits at `ptr - UNNAMED_OVERHEAD` or
/// `ptr - NAMED_OVERHEAD`, and nowhere else.
pub const UNNAMED_OVERHEAD: usize = mem::size_of::<UnnamedHeader>();
pub const NAMED_OVERHEAD: usize = mem::size_of::<NamedHeader>();

const _: () = assert!(UNNAMED_OVERHEAD == 16);
const _: () = assert!(NAMED_OVERHEAD == UNNAMED_OVERHEAD + MAX_REGION_NAME);
const _: () = assert!(mem::offset_of!(UnnamedHeader, signature) == 0);
const _: () = assert!(mem::offset_of!(NamedHeader, signature) == 0);
const _: () = assert!(mem::offset_of!(NamedHeader, name) == UNNAMED_OVERHEAD);

/// The raw allocation primitive underneath the header scheme. The seam
/// exists so tests can substitute an instrumented stand-in for the real
/// heap and observe exactly which base addresses get released.
pub trait RawAllocator {
    /// Allocate `size` bytes, returning null on failure.
    fn raw_alloc(&self, size: usize) -> *mut u8;

    /// Release a block at the exact base address `raw_alloc` returned.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `raw_alloc` on this allocator (or, for the
    /// native-forward path, from whatever allocator backs it) and must not
    /// be released twice.
    unsafe fn raw_free(&self, ptr: *mut u8);
}

impl<R> RawAllocator for &R
where
    R: RawAllocator + ?Sized,
{
    fn raw_alloc(&self, size: usize) -> *mut u8 {
        (**self).raw_alloc(size)
    }

    unsafe fn raw_free(&self, ptr: *mut u8) {
        unsafe { (**self).raw_free(ptr) }
    }
}

/// The real heap, via `libc::malloc` / `libc::free`.
pub struct LibcHeap;

impl RawAllocator for LibcHeap {
    fn raw_alloc(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions
        unsafe { libc::malloc(size) as *mut u8 }
    }

    unsafe fn raw_free(&self, ptr: *mut u8) {
        unsafe { libc::free(ptr as *mut c_void) }
    }
}

/// Which release path a pointer dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FreeClass {
    Unnamed,
    Named,
    /// Neither signature matched: the block never passed through this
    /// scheme, forward it to the raw allocator untouched.
    Native,
}

/// The three-way signature dispatch. Checks the unnamed offset first and
/// short-circuits, so an unnamed block is classified without ever reading
/// past its own header.
///
/// # Safety
///
/// The `UNNAMED_OVERHEAD` bytes before `ptr` must be readable; if they do
/// not hold [`UNNAMED_SIGNATURE`], the `NAMED_OVERHEAD` bytes before `ptr`
/// must be readable too. Both hold for any block this scheme allocated.
unsafe fn classify(ptr: *const u8) -> FreeClass {
    let unnamed_sig = unsafe { (ptr.sub(UNNAMED_OVERHEAD) as *const u64).read_unaligned() };
    if unnamed_sig == UNNAMED_SIGNATURE {
        return FreeClass::Unnamed;
    }
    let named_sig = unsafe { (ptr.sub(NAMED_OVERHEAD) as *const u64).read_unaligned() };
    if named_sig == NAMED_SIGNATURE {
        FreeClass::Named
    } else {
        FreeClass::Native
    }
}

/// The header-encoding allocator.
pub struct HeaderAlloc<'r, R = LibcHeap> {
    raw: R,
    registry: Option<&'r Registry>,
    null_release: NullRelease,
}

impl<R> HeaderAlloc<'static, R> {
    /// Count against the process-wide [`global()`] registry.
    pub const fn new(raw: R) -> Self {
        Self {
            raw,
            registry: None,
            null_release: NullRelease::Ignore,
        }
    }
}

impl<'r, R> HeaderAlloc<'r, R> {
    /// Count against an explicitly owned registry instead.
    pub const fn with_registry(raw: R, registry: &'r Registry) -> Self {
        Self {
            raw,
            registry: Some(registry),
            null_release: NullRelease::Ignore,
        }
    }

    /// Set the policy for [`free`](Self::free) of a null pointer.
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

impl<'r, R> HeaderAlloc<'r, R>
where
    R: RawAllocator,
{
    /// Allocate `payload` usable bytes, prefixed by a header the caller
    /// never sees. The registry's counters are bumped by `payload` (never
    /// by the header overhead); the variant is picked by whether a region
    /// name is active at call time.
    ///
    /// Returns null, with nothing recorded, if the raw allocation fails.
    pub fn alloc(&self, payload: usize) -> *mut u8 {
        let ptr = match self.registry().active_name() {
            Some(name) => {
                let total = payload + NAMED_OVERHEAD;
                let base = self.raw.raw_alloc(total);
                if base.is_null() {
                    return cold(|| base);
                }
                let mut header = NamedHeader {
                    signature: NAMED_SIGNATURE,
                    size: total as u64,
                    name: [0; MAX_REGION_NAME],
                };
                name.copy_padded(&mut header.name);
                // SAFETY: the block is `total >= NAMED_OVERHEAD` bytes
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytemuck::bytes_of(&header).as_ptr(),
                        base,
                        NAMED_OVERHEAD,
                    );
                    base.add(NAMED_OVERHEAD)
                }
            }
            None => {
                let total = payload + UNNAMED_OVERHEAD;
                let base = self.raw.raw_alloc(total);
                if base.is_null() {
                    return cold(|| base);
                }
                let header = UnnamedHeader {
                    signature: UNNAMED_SIGNATURE,
                    size: total as u64,
                };
                // SAFETY: the block is `total >= UNNAMED_OVERHEAD` bytes
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytemuck::bytes_of(&header).as_ptr(),
                        base,
                        UNNAMED_OVERHEAD,
                    );
                    base.add(UNNAMED_OVERHEAD)
                }
            }
        };
        self.registry().record_alloc(payload);
        ptr
    }

    /// Release a pointer. Blocks this scheme allocated are released at
    /// their recomputed base address and counted; anything else is
    /// forwarded to the raw allocator exactly as given, with no counter
    /// update. Exactly one underlying release happens either way.
    ///
    /// A null `ptr` is handled per the configured [`NullRelease`] policy.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, a pointer returned by [`alloc`](Self::alloc) on
    /// this allocator, or a base pointer from the raw allocator with
    /// [`NAMED_OVERHEAD`] readable bytes before it. Never release the same
    /// pointer twice.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            match self.null_release {
                NullRelease::Ignore => return,
                NullRelease::Fault => panic!("attempted to free a null pointer"),
            }
        }
        // SAFETY: caller guarantees the bytes before `ptr` per above
        match unsafe { classify(ptr) } {
            FreeClass::Unnamed => {
                let header =
                    unsafe { (ptr.sub(UNNAMED_OVERHEAD) as *const UnnamedHeader).read_unaligned() };
                self.registry()
                    .record_dealloc(header.size as usize - UNNAMED_OVERHEAD);
                unsafe { self.raw.raw_free(ptr.sub(UNNAMED_OVERHEAD)) };
            }
            FreeClass::Named => {
                let header =
                    unsafe { (ptr.sub(NAMED_OVERHEAD) as *const NamedHeader).read_unaligned() };
                self.registry()
                    .record_dealloc(header.size as usize - NAMED_OVERHEAD);
                unsafe { self.raw.raw_free(ptr.sub(NAMED_OVERHEAD)) };
            }
            FreeClass::Native => unsafe { self.raw.raw_free(ptr) },
        }
    }
}
