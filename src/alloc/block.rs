//! Per-allocation metadata and the fixed-capacity labels it is made of.
//!
//! A [`Block`] is the side-table record for one live allocation. Labels are
//! stored inline so that building a `Block` never touches the allocator --
//! the registry runs inside allocation paths, where a `String` would recurse.

use std::fmt;

/// Capacity of a region name, in bytes. Uniform across the side-table and
/// header encoding schemes; a push of a name with `len() >= MAX_REGION_NAME`
/// is rejected, so a stored name always fits.
pub const MAX_REGION_NAME: usize = 32;

/// Capacity of a recorded source-file path, in bytes. An oversized path is
/// omitted in full, never truncated.
pub const MAX_SOURCE_FILE: usize = 128;

/// An inline, fixed-capacity UTF-8 string. Copyable, allocation-free.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Label<const N: usize> {
    buf: [u8; N],
    len: u8,
}

impl<const N: usize> Label<N> {
    pub const fn empty() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Store `s` inline, or `None` if `s.len() >= N`.
    pub fn new(s: &str) -> Option<Self> {
        if s.len() >= N {
            return None;
        }
        let mut buf = [0u8; N];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Some(Self {
            buf,
            len: s.len() as u8,
        })
    }

    /// Store `s` inline, truncating on a char boundary to fit.
    pub fn truncated(s: &str) -> Self {
        let mut end = s.len().min(N - 1);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        // Just asserted `end` lands on a boundary
        Self::new(&s[..end]).expect("truncated to fit")
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: `buf[..len]` is only ever copied whole from a `&str`, on a
        // char boundary, so it is valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len as usize]) }
    }

    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the label into `out`, zero-filling the tail. `out` must be at
    /// least `self.len()` bytes.
    pub fn copy_padded(&self, out: &mut [u8]) {
        out.fill(0);
        out[..self.len()].copy_from_slice(&self.buf[..self.len()]);
    }
}

impl<const N: usize> Default for Label<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Debug for Label<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for Label<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one live, tracked allocation.
///
/// `size` is exactly the payload size requested at registration time -- it
/// never includes header bytes added by an encoding scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    size: usize,
    #[serde(with = "crate::serialize::inline_str")]
    name: Label<MAX_REGION_NAME>,
    #[serde(with = "crate::serialize::inline_str")]
    file: Label<MAX_SOURCE_FILE>,
    line: u32,
}

impl Block {
    pub(crate) fn new(
        size: usize,
        name: Label<MAX_REGION_NAME>,
        file: Label<MAX_SOURCE_FILE>,
        line: u32,
    ) -> Self {
        Self {
            size,
            name,
            file,
            line,
        }
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// The region name active when this block was allocated, if any.
    pub fn name(&self) -> Option<&str> {
        (!self.name.is_empty()).then(|| self.name.as_str())
    }

    /// The source file of the allocation call site, if it was captured and
    /// fit within [`MAX_SOURCE_FILE`].
    pub fn source_file(&self) -> Option<&str> {
        (!self.file.is_empty()).then(|| self.file.as_str())
    }

    pub const fn line(&self) -> u32 {
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_rejects_at_capacity() {
        assert!(Label::<4>::new("abcd").is_none());
        assert!(Label::<4>::new("abc").is_some());
    }

    #[test]
    fn truncated_respects_char_boundaries() {
        // 'é' is two bytes; capacity 3 leaves room for 2, which splits it
        let label = Label::<3>::truncated("aéb");
        assert_eq!(label.as_str(), "a");

        let label = Label::<4>::truncated("aéb");
        assert_eq!(label.as_str(), "aé");

        let label = Label::<8>::truncated("aéb");
        assert_eq!(label.as_str(), "aéb");
    }

    #[test]
    fn copy_padded_zero_fills() {
        let label = Label::<8>::new("ab").unwrap();
        let mut out = [0xffu8; 8];
        label.copy_padded(&mut out);
        assert_eq!(&out, b"ab\0\0\0\0\0\0");
    }
}
