//! Menulis fragment ke receive fifo milik peer

use super::fifo::Fifo;
use super::header::FragmentHeader;
use super::translate::SegmentTable;
use crate::error::TranslateError;

/// Handle lokal ke receive fifo milik `peer_rank`, sebagaimana di-map di
/// proses ini.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'m> {
    peer_rank: u32,
    fifo: &'m Fifo,
}

impl<'m> Endpoint<'m> {
    pub fn new(peer_rank: u32, fifo: &'m Fifo) -> Self {
        Self { peer_rank, fifo }
    }

    #[inline]
    pub fn peer_rank(&self) -> u32 {
        self.peer_rank
    }

    #[inline]
    pub fn fifo(&self) -> &'m Fifo {
        self.fifo
    }
}

/// Kirim fragment dari segment lokal ke fifo `ep`.
///
/// Offset di-encode dengan rank lokal, jadi peer me-resolve-nya lewat
/// mapping segment kita di proses peer. Gagal tanpa menyentuh queue jika
/// `hdr` tidak berada di segment lokal.
#[inline]
pub fn write_to_endpoint(
    table: &SegmentTable<'_>,
    hdr: &FragmentHeader,
    ep: &Endpoint<'_>,
) -> Result<(), TranslateError> {
    let offset = table.header_offset(hdr)?;
    hdr.mark_tail();
    ep.fifo.write(table, offset);
    Ok(())
}

/// Kembalikan fragment milik peer ke fifo peer itu sendiri.
///
/// `hdr` harus berada di segment milik `ep.peer_rank()` (fragment yang
/// sebelumnya diterima dari peer tersebut). Offset di-encode dengan rank peer
/// sehingga peer membacanya sebagai fragment di segment-nya sendiri.
#[inline]
pub fn write_to_endpoint_remote(
    table: &SegmentTable<'_>,
    hdr: &FragmentHeader,
    ep: &Endpoint<'_>,
) -> Result<(), TranslateError> {
    let offset = table.header_offset_for_peer(ep.peer_rank, hdr)?;
    hdr.mark_tail();
    ep.fifo.write(table, offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RelativeOffset, HEADER_SIZE};
    use std::ptr::NonNull;

    fn attach<'a>(table: &mut SegmentTable<'a>, rank: u32, headers: &'a mut [FragmentHeader]) {
        let len = std::mem::size_of_val(headers);
        let base = NonNull::new(headers.as_mut_ptr() as *mut u8).unwrap();
        unsafe { table.attach_raw(rank, base, len) };
    }

    #[test]
    fn test_write_to_endpoint_encodes_local_rank() {
        let mut own: Vec<FragmentHeader> = (0..4).map(|_| FragmentHeader::new()).collect();
        let mut table = SegmentTable::new(2);
        attach(&mut table, 2, &mut own);

        let fifo = Fifo::new();
        let ep = Endpoint::new(9, &fifo);

        let hdr = table.header(RelativeOffset::new(2, HEADER_SIZE as u32)).unwrap();
        hdr.set_next(RelativeOffset::new(2, 0));
        write_to_endpoint(&table, hdr, &ep).unwrap();

        assert_eq!(fifo.tail(), RelativeOffset::new(2, HEADER_SIZE as u32));
        assert!(hdr.next().is_free());
    }

    #[test]
    fn test_write_to_endpoint_remote_encodes_peer_rank() {
        let mut peer: Vec<FragmentHeader> = (0..4).map(|_| FragmentHeader::new()).collect();
        let mut table = SegmentTable::new(0);
        attach(&mut table, 3, &mut peer);

        let fifo = Fifo::new();
        let ep = Endpoint::new(3, &fifo);

        let hdr = table.header(RelativeOffset::new(3, 2 * HEADER_SIZE as u32)).unwrap();
        write_to_endpoint_remote(&table, hdr, &ep).unwrap();

        assert_eq!(fifo.head(), RelativeOffset::new(3, 2 * HEADER_SIZE as u32));
    }

    #[test]
    fn test_foreign_header_leaves_queue_untouched() {
        let mut own: Vec<FragmentHeader> = (0..2).map(|_| FragmentHeader::new()).collect();
        let mut table = SegmentTable::new(0);
        attach(&mut table, 0, &mut own);

        let fifo = Fifo::new();
        let ep = Endpoint::new(1, &fifo);
        let stray = FragmentHeader::new();

        assert!(matches!(
            write_to_endpoint(&table, &stray, &ep),
            Err(TranslateError::OutOfRange { .. })
        ));
        assert!(matches!(
            write_to_endpoint_remote(&table, &stray, &ep),
            Err(TranslateError::UnknownRank { rank: 1 })
        ));
        assert!(fifo.is_empty());
    }
}
