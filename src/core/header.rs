//! Fragment header: node intrusive di depan setiap message fragment
//!
//! Header dimiliki allocator. Queue hanya meminjamnya selama header berada
//! di dalam chain, lalu mengembalikannya ke pemanggil lewat `Fifo::read`.

use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU32, AtomicU8, Ordering};

use super::offset::{RelativeOffset, FREE};

/// Fragment sudah selesai diproses penerima dan dikembalikan ke pemiliknya.
pub const FLAG_COMPLETE: u8 = 0x01;

/// Ukuran header; payload dimulai tepat setelahnya.
pub const HEADER_SIZE: usize = std::mem::size_of::<FragmentHeader>();

/// Header di shared memory.
///
/// Semua field atomic karena header dibaca dan ditulis dari proses lain.
/// Metadata memakai `Relaxed`; urutan visibilitas dijamin oleh fence di
/// `Fifo::write` dan `Fifo::read`.
#[repr(C, align(8))]
pub struct FragmentHeader {
    next: AtomicI64,
    len: AtomicU32,
    seq: AtomicU16,
    tag: AtomicU8,
    flags: AtomicU8,
}

const _: () = assert!(HEADER_SIZE == 16);

impl FragmentHeader {
    /// Header baru yang belum ada di chain mana pun.
    pub const fn new() -> Self {
        Self {
            next: AtomicI64::new(FREE.raw()),
            len: AtomicU32::new(0),
            seq: AtomicU16::new(0),
            tag: AtomicU8::new(0),
            flags: AtomicU8::new(0),
        }
    }

    /// Link ke node berikutnya, atau [`FREE`] untuk akhir chain.
    #[inline(always)]
    pub fn next(&self) -> RelativeOffset {
        RelativeOffset::from_raw(self.next.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub(crate) fn set_next(&self, next: RelativeOffset) {
        self.next.store(next.raw(), Ordering::Release);
    }

    /// Tandai header sebagai calon tail baru sebelum di-enqueue.
    #[inline(always)]
    pub(crate) fn mark_tail(&self) {
        self.next.store(FREE.raw(), Ordering::Relaxed);
    }

    /// Bersihkan link dan metadata sebelum header dipakai ulang.
    pub fn reset(&self) {
        self.next.store(FREE.raw(), Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.seq.store(0, Ordering::Relaxed);
        self.tag.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
    }

    /// Panjang payload yang valid dalam bytes
    #[inline]
    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn set_len(&self, len: u32) {
        self.len.store(len, Ordering::Relaxed);
    }

    #[inline]
    pub fn seq(&self) -> u16 {
        self.seq.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_seq(&self, seq: u16) {
        self.seq.store(seq, Ordering::Relaxed);
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        self.tag.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_tag(&self, tag: u8) {
        self.tag.store(tag, Ordering::Relaxed);
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_flags(&self, flags: u8) {
        self.flags.store(flags, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.flags() & FLAG_COMPLETE != 0
    }
}

impl Default for FragmentHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FragmentHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentHeader")
            .field("next", &self.next())
            .field("len", &self.len())
            .field("seq", &self.seq())
            .field("tag", &self.tag())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_is_unlinked() {
        let hdr = FragmentHeader::new();
        assert!(hdr.next().is_free());
        assert!(hdr.is_empty());
        assert!(!hdr.is_complete());
    }

    #[test]
    fn test_reset_clears_link_and_metadata() {
        let hdr = FragmentHeader::new();
        hdr.set_next(RelativeOffset::new(0, 512));
        hdr.set_len(40);
        hdr.set_seq(9);
        hdr.set_tag(2);
        hdr.set_flags(FLAG_COMPLETE);

        hdr.reset();

        assert!(hdr.next().is_free());
        assert_eq!(hdr.len(), 0);
        assert_eq!(hdr.seq(), 0);
        assert_eq!(hdr.tag(), 0);
        assert_eq!(hdr.flags(), 0);
    }
}
