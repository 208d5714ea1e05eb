//! Error types untuk translasi alamat dan setup segment
//!
//! Hot path (`Fifo::read` / `Fifo::write`) tidak pernah mengembalikan error:
//! queue kosong adalah `None`, dan pelanggaran invariant langsung fatal.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::RelativeOffset;

/// Gagal menerjemahkan antara alamat lokal dan [`RelativeOffset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// Sentinel FREE bukan alamat.
    #[error("cannot translate the FREE sentinel")]
    Free,
    /// Rank tidak punya segment yang di-attach di proses ini.
    #[error("no segment attached for rank {rank}")]
    UnknownRank { rank: u32 },
    /// Alamat atau offset berada di luar segment yang di-map.
    #[error("address {addr:#x} is outside the segment of rank {rank}")]
    OutOfRange { rank: u32, addr: usize },
    /// Offset header tidak sesuai alignment `FragmentHeader`.
    #[error("offset {offset} is not aligned for a fragment header")]
    Misaligned { offset: RelativeOffset },
}

/// Kesalahan pemakaian [`FragmentPool`](crate::core::FragmentPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("fragment does not belong to the pool of rank {rank}")]
    Foreign { rank: u32 },
    #[error("fragment {index} released twice")]
    DoubleRelease { index: usize },
}

/// Contextual errors saat membuat, membuka, atau me-map segment.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("{op} failed for `{}`: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("segment `{}` has bad magic {found:#018x}", .path.display())]
    BadMagic { path: PathBuf, found: u64 },
    #[error("segment `{}` version mismatch: expected {expected}, found {found}", .path.display())]
    VersionMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
    #[error("segment `{}` too small: need {required} bytes, found {found}", .path.display())]
    TooSmall {
        path: PathBuf,
        required: usize,
        found: usize,
    },
    #[error("invalid segment config: {0}")]
    InvalidConfig(&'static str),
}

impl SegmentError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
