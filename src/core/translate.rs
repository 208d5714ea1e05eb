//! Address translation antara alamat lokal dan [`RelativeOffset`]
//!
//! Setiap proses punya satu `SegmentTable`: rank -> base address tempat
//! segment rank itu di-map di proses ini. Table tidak memiliki memory;
//! lifetime `'m` meminjam mapping yang di-attach.

use std::marker::PhantomData;
use std::mem::align_of;
use std::ptr::NonNull;

use super::endpoint::Endpoint;
use super::fifo::{Fifo, FIFO_SIZE};
use super::header::{FragmentHeader, HEADER_SIZE};
use super::offset::{RelativeOffset, MAX_RANK};
use super::segment::{ShmSegment, FIFO_OFFSET};
use crate::config::MAX_SEGMENT_SIZE;
use crate::error::TranslateError;
use crate::trace::debug;

#[derive(Debug, Clone, Copy)]
struct SegmentView {
    base: NonNull<u8>,
    len: usize,
}

impl SegmentView {
    #[inline(always)]
    fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline(always)]
    fn contains(&self, addr: usize, size: usize) -> bool {
        let base = self.addr();
        addr >= base
            && addr
                .checked_add(size)
                .map_or(false, |end| end <= base + self.len)
    }
}

/// Peta rank -> mapping lokal untuk satu proses.
///
/// Disimpan terurut per rank (sparse), jadi rank besar tidak memakan memory.
pub struct SegmentTable<'m> {
    local_rank: u32,
    segments: Vec<(u32, SegmentView)>,
    _mappings: PhantomData<&'m [u8]>,
}

// SAFETY: table hanya menyimpan base address mapping yang dipinjam selama 'm.
// Semua akses ke memory di baliknya lewat atomics di FragmentHeader / Fifo.
unsafe impl Send for SegmentTable<'_> {}
unsafe impl Sync for SegmentTable<'_> {}

impl<'m> SegmentTable<'m> {
    pub fn new(local_rank: u32) -> Self {
        Self {
            local_rank,
            segments: Vec::new(),
            _mappings: PhantomData,
        }
    }

    #[inline]
    pub fn local_rank(&self) -> u32 {
        self.local_rank
    }

    /// Daftarkan segment (milik sendiri atau peer) di base lokalnya.
    pub fn attach(&mut self, segment: &'m ShmSegment) {
        // SAFETY: ShmSegment menjamin base..base+len tetap ter-map selama 'm
        unsafe { self.attach_raw(segment.rank(), segment.base(), segment.len()) }
    }

    /// Daftarkan mapping yang dibuat di luar crate ini.
    ///
    /// # Safety
    /// `base..base+len` harus tetap ter-map, readable dan writable selama
    /// `'m`, dan `base` harus aligned ke 128 bytes bila fifo di dalamnya
    /// akan di-resolve.
    ///
    /// # Panics
    /// Panic jika `rank > MAX_RANK` atau `len > MAX_SEGMENT_SIZE`.
    pub unsafe fn attach_raw(&mut self, rank: u32, base: NonNull<u8>, len: usize) {
        assert!(rank <= MAX_RANK, "rank {rank} collides with the FREE sentinel");
        assert!(
            len <= MAX_SEGMENT_SIZE,
            "segment of {len} bytes exceeds the relative offset range"
        );

        let view = SegmentView { base, len };
        match self.segments.binary_search_by_key(&rank, |(r, _)| *r) {
            Ok(idx) => self.segments[idx].1 = view,
            Err(idx) => self.segments.insert(idx, (rank, view)),
        }

        debug!(
            local_rank = self.local_rank,
            rank,
            base = ?base,
            len,
            "segment attached"
        );
    }

    pub fn is_attached(&self, rank: u32) -> bool {
        self.view(rank).is_ok()
    }

    #[inline(always)]
    fn view(&self, rank: u32) -> Result<SegmentView, TranslateError> {
        self.segments
            .binary_search_by_key(&rank, |(r, _)| *r)
            .map(|idx| self.segments[idx].1)
            .map_err(|_| TranslateError::UnknownRank { rank })
    }

    /// Offset -> alamat lokal.
    #[inline]
    pub fn relative_to_virtual(&self, offset: RelativeOffset) -> Result<NonNull<u8>, TranslateError> {
        if offset.is_free() {
            return Err(TranslateError::Free);
        }

        let rank = offset.rank();
        let view = self.view(rank)?;
        let off = offset.offset() as usize;

        if off >= view.len {
            return Err(TranslateError::OutOfRange {
                rank,
                addr: view.addr().wrapping_add(off),
            });
        }

        // SAFETY: off < len, jadi pointer tetap di dalam mapping
        Ok(unsafe { NonNull::new_unchecked(view.base.as_ptr().add(off)) })
    }

    /// Alamat di segment lokal -> offset yang bisa dibaca semua peer.
    #[inline]
    pub fn virtual_to_relative(&self, addr: *const u8) -> Result<RelativeOffset, TranslateError> {
        self.virtual_to_relative_for_peer(self.local_rank, addr)
    }

    /// Alamat di mapping lokal dari segment milik `peer` -> offset dengan
    /// rank `peer`, sehingga peer membacanya sebagai offset di segment-nya
    /// sendiri.
    #[inline]
    pub fn virtual_to_relative_for_peer(
        &self,
        peer: u32,
        addr: *const u8,
    ) -> Result<RelativeOffset, TranslateError> {
        let view = self.view(peer)?;
        let addr = addr as usize;

        if !view.contains(addr, 1) {
            return Err(TranslateError::OutOfRange { rank: peer, addr });
        }

        Ok(RelativeOffset::new(peer, (addr - view.addr()) as u32))
    }

    /// Resolve offset menjadi header yang dipinjam selama `'m`.
    #[inline]
    pub fn header(&self, offset: RelativeOffset) -> Result<&'m FragmentHeader, TranslateError> {
        let ptr = self.relative_to_virtual(offset)?;
        let view = self.view(offset.rank())?;

        if ptr.as_ptr() as usize % align_of::<FragmentHeader>() != 0 {
            return Err(TranslateError::Misaligned { offset });
        }
        if !view.contains(ptr.as_ptr() as usize, HEADER_SIZE) {
            return Err(TranslateError::OutOfRange {
                rank: offset.rank(),
                addr: ptr.as_ptr() as usize,
            });
        }

        // SAFETY: aligned, seluruh header di dalam mapping yang hidup selama 'm,
        // dan semua field FragmentHeader valid untuk bit pattern apa pun
        Ok(unsafe { &*(ptr.as_ptr() as *const FragmentHeader) })
    }

    /// Offset header di segment lokal.
    pub fn header_offset(&self, hdr: &FragmentHeader) -> Result<RelativeOffset, TranslateError> {
        self.virtual_to_relative(hdr as *const FragmentHeader as *const u8)
    }

    /// Offset header yang berada di segment milik `peer`.
    pub fn header_offset_for_peer(
        &self,
        peer: u32,
        hdr: &FragmentHeader,
    ) -> Result<RelativeOffset, TranslateError> {
        self.virtual_to_relative_for_peer(peer, hdr as *const FragmentHeader as *const u8)
    }

    /// Receive fifo milik `rank`, pada offset tetap di segment-nya.
    pub fn fifo(&self, rank: u32) -> Result<&'m Fifo, TranslateError> {
        let view = self.view(rank)?;

        if view.len < FIFO_OFFSET + FIFO_SIZE {
            return Err(TranslateError::OutOfRange {
                rank,
                addr: view.addr() + FIFO_OFFSET,
            });
        }
        if view.addr() % align_of::<Fifo>() != 0 {
            return Err(TranslateError::Misaligned {
                offset: RelativeOffset::new(rank, FIFO_OFFSET as u32),
            });
        }

        // SAFETY: bounds dan alignment sudah dicek; Fifo hanya berisi atomics
        Ok(unsafe { &*(view.base.as_ptr().add(FIFO_OFFSET) as *const Fifo) })
    }

    pub fn endpoint(&self, rank: u32) -> Result<Endpoint<'m>, TranslateError> {
        Ok(Endpoint::new(rank, self.fifo(rank)?))
    }

    /// Payload bytes setelah header, sepanjang `hdr.len()`.
    ///
    /// Isi payload hanya stabil selama pemanggil memegang fragment tersebut.
    pub fn payload(&self, hdr: &FragmentHeader) -> Result<&'m [u8], TranslateError> {
        let addr = hdr as *const FragmentHeader as usize;
        let (rank, view) = self
            .segments
            .iter()
            .find(|(_, view)| view.contains(addr, HEADER_SIZE))
            .copied()
            .ok_or(TranslateError::OutOfRange {
                rank: self.local_rank,
                addr,
            })?;

        let start = addr + HEADER_SIZE;
        let len = hdr.len() as usize;
        if !view.contains(start, len) {
            return Err(TranslateError::OutOfRange { rank, addr: start });
        }

        // SAFETY: range sudah dicek di dalam mapping yang hidup selama 'm
        Ok(unsafe {
            std::slice::from_raw_parts(view.base.as_ptr().add(start - view.addr()), len)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(len: usize) -> Vec<FragmentHeader> {
        (0..len).map(|_| FragmentHeader::new()).collect()
    }

    fn attach<'a>(table: &mut SegmentTable<'a>, rank: u32, headers: &'a mut [FragmentHeader]) {
        let len = std::mem::size_of_val(headers);
        let base = NonNull::new(headers.as_mut_ptr() as *mut u8).unwrap();
        unsafe { table.attach_raw(rank, base, len) };
    }

    #[test]
    fn test_local_round_trip() {
        let mut headers = arena(8);
        let base = headers.as_ptr() as usize;
        let mut table = SegmentTable::new(0);
        attach(&mut table, 0, &mut headers);

        let addr = (base + 3 * HEADER_SIZE) as *const u8;
        let off = table.virtual_to_relative(addr).unwrap();
        assert_eq!(off, RelativeOffset::new(0, 48));
        assert_eq!(table.relative_to_virtual(off).unwrap().as_ptr() as *const u8, addr);
    }

    #[test]
    fn test_out_of_range_and_unknown_rank() {
        let mut headers = arena(4);
        let mut table = SegmentTable::new(0);
        attach(&mut table, 0, &mut headers);

        let outside = RelativeOffset::new(0, 4 * HEADER_SIZE as u32);
        assert!(matches!(
            table.relative_to_virtual(outside),
            Err(TranslateError::OutOfRange { rank: 0, .. })
        ));
        assert_eq!(
            table.relative_to_virtual(RelativeOffset::new(7, 0)),
            Err(TranslateError::UnknownRank { rank: 7 })
        );
        assert_eq!(
            table.relative_to_virtual(crate::core::FREE),
            Err(TranslateError::Free)
        );

        let stray = FragmentHeader::new();
        assert!(table.header_offset(&stray).is_err());
    }

    #[test]
    fn test_header_rejects_misaligned_offset() {
        let mut headers = arena(4);
        let mut table = SegmentTable::new(0);
        attach(&mut table, 0, &mut headers);

        let off = RelativeOffset::new(0, 5);
        assert_eq!(table.header(off).unwrap_err(), TranslateError::Misaligned { offset: off });
    }

    #[test]
    fn test_high_rank_is_sparse() {
        let mut low = arena(4);
        let mut high = arena(4);
        let mut table = SegmentTable::new(0);
        attach(&mut table, MAX_RANK, &mut high);
        attach(&mut table, 0, &mut low);

        assert_eq!(table.local_rank(), 0);
        assert!(table.is_attached(MAX_RANK));
        assert!(table.is_attached(0));
        assert!(!table.is_attached(MAX_RANK / 2));

        let off = RelativeOffset::new(MAX_RANK, 2 * HEADER_SIZE as u32);
        let hdr = table.header(off).unwrap();
        assert_eq!(table.header_offset_for_peer(MAX_RANK, hdr).unwrap(), off);
    }

    #[test]
    fn test_payload_error_names_owning_rank() {
        let mut own = arena(2);
        let mut peer = arena(2);
        let mut table = SegmentTable::new(0);
        attach(&mut table, 0, &mut own);
        attach(&mut table, 5, &mut peer);

        let hdr = table.header(RelativeOffset::new(5, 0)).unwrap();
        hdr.set_len(4);
        assert_eq!(table.payload(hdr).unwrap().len(), 4);

        hdr.set_len(1000);
        assert!(matches!(
            table.payload(hdr),
            Err(TranslateError::OutOfRange { rank: 5, .. })
        ));
    }

    #[test]
    fn test_peer_translation_matches_peer_view() {
        // Segment rank 1 di-map dua kali: view rank 0 dan view rank 1 sendiri.
        let mut owner_view = arena(8);
        let owner_base = owner_view.as_ptr() as usize;
        let mut local = SegmentTable::new(0);
        attach(&mut local, 1, &mut owner_view);

        let addr = (owner_base + 5 * HEADER_SIZE) as *const u8;
        let off = local.virtual_to_relative_for_peer(1, addr).unwrap();
        assert_eq!(off.rank(), 1);

        let mut peer_view = arena(8);
        let peer_base = peer_view.as_ptr() as usize;
        let mut peer = SegmentTable::new(1);
        attach(&mut peer, 1, &mut peer_view);

        let resolved = peer.relative_to_virtual(off).unwrap().as_ptr() as usize;
        assert_eq!(resolved - peer_base, 5 * HEADER_SIZE);
    }
}
