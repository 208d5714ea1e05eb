//! Position-independent offset ke dalam shared segment
//!
//! Layout 64 bit: `(owner_rank << 32) | byte_offset`. Setiap proses me-map
//! segment milik rank lain di base address yang berbeda, jadi yang disimpan di
//! shared memory selalu offset ini, tidak pernah pointer.

use std::fmt;

/// Offset relatif ke base segment milik `rank()`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RelativeOffset(i64);

/// Sentinel "tidak ada node": akhir chain, atau queue kosong.
///
/// Decode ke rank `u32::MAX`, yang tidak pernah menjadi rank valid.
pub const FREE: RelativeOffset = RelativeOffset(-2);

/// Rank terbesar yang boleh memiliki segment.
pub const MAX_RANK: u32 = u32::MAX - 1;

impl RelativeOffset {
    #[inline(always)]
    pub const fn new(rank: u32, offset: u32) -> Self {
        Self((((rank as u64) << 32) | offset as u64) as i64)
    }

    #[inline(always)]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline(always)]
    pub const fn rank(self) -> u32 {
        ((self.0 as u64) >> 32) as u32
    }

    /// Byte offset di dalam segment milik `rank()`
    #[inline(always)]
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    #[inline(always)]
    pub const fn is_free(self) -> bool {
        self.0 == FREE.0
    }
}

impl fmt::Debug for RelativeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_free() {
            f.write_str("FREE")
        } else {
            write!(f, "{}:{:#x}", self.rank(), self.offset())
        }
    }
}

impl fmt::Display for RelativeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
