//! Free list fragment milik satu rank
//!
//! Pool ini lokal di proses pemilik segment dan tidak di-share. Fifo tidak
//! pernah memanggilnya: fragment dialokasikan di sini, berpindah lewat queue,
//! lalu dikembalikan ke sini oleh pemiliknya.

use super::header::{FragmentHeader, HEADER_SIZE};
use super::segment::ShmSegment;
use crate::error::PoolError;

pub struct FragmentPool<'m> {
    segment: &'m ShmSegment,
    free: Vec<u32>,
    in_use: Vec<bool>,
}

impl<'m> FragmentPool<'m> {
    /// Semua fragment slot di `segment` mulai dalam keadaan bebas.
    pub fn new(segment: &'m ShmSegment) -> Self {
        let count = segment.fragment_count();
        Self {
            segment,
            // dibalik supaya allocate() mulai dari slot 0
            free: (0..count as u32).rev().collect(),
            in_use: vec![false; count],
        }
    }

    /// Ambil fragment bebas, atau `None` jika pool habis.
    ///
    /// Header di-reset: `next = FREE`, metadata nol.
    #[inline]
    pub fn allocate(&mut self) -> Option<&'m FragmentHeader> {
        let index = self.free.pop()? as usize;
        self.in_use[index] = true;

        let segment: &'m ShmSegment = self.segment;
        let hdr = segment.fragment(index)?;
        hdr.reset();
        Some(hdr)
    }

    /// Kembalikan fragment ke pool.
    pub fn release(&mut self, hdr: &FragmentHeader) -> Result<(), PoolError> {
        let index = self
            .segment
            .fragment_index(hdr)
            .ok_or(PoolError::Foreign {
                rank: self.segment.rank(),
            })?;

        if !self.in_use[index] {
            return Err(PoolError::DoubleRelease { index });
        }

        self.in_use[index] = false;
        self.free.push(index as u32);
        Ok(())
    }

    /// Jumlah fragment yang masih bebas
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Kapasitas payload per fragment
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.segment.fragment_size() - HEADER_SIZE
    }

    /// Salin `data` ke payload fragment dan set `len`.
    ///
    /// Returns jumlah bytes yang disalin (dipotong ke kapasitas payload).
    pub fn fill(&self, hdr: &FragmentHeader, data: &[u8]) -> Result<usize, PoolError> {
        let index = self
            .segment
            .fragment_index(hdr)
            .ok_or(PoolError::Foreign {
                rank: self.segment.rank(),
            })?;

        let len = data.len().min(self.payload_capacity());

        // SAFETY: payload berada di dalam slot `index`, dan pemanggil
        // memegang fragment ini (belum di-enqueue)
        unsafe {
            let dst = self.segment.fragment_ptr(index).add(HEADER_SIZE);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, len);
        }

        hdr.set_len(len as u32);
        Ok(len)
    }
}
