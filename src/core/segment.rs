//! Shared Segment berbasis mmap
//!
//! Satu segment per rank. Segment di-map oleh pemiliknya dan oleh setiap peer,
//! masing-masing di base address sendiri.
//!
//! Layout:
//! - `0..128`   : `SegmentHeader` (magic, version, rank, ukuran)
//! - `128..256` : receive [`Fifo`] milik rank ini
//! - `256..`    : fragment slots, masing-masing `fragment_size` bytes

use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use super::fifo::Fifo;
use super::header::FragmentHeader;
use super::offset::MAX_RANK;
use crate::config::SegmentConfig;
use crate::error::SegmentError;
use crate::trace::{debug, info};

/// Header untuk segment - menyimpan metadata
#[repr(C, align(128))]
#[derive(Clone, Copy)]
struct SegmentHeader {
    magic: u64,          // Magic number untuk validasi
    version: u32,        // Versi format
    rank: u32,           // Pemilik segment
    len: u64,            // Total ukuran segment dalam bytes
    fragment_size: u32,  // Ukuran satu fragment slot
    fragment_count: u32, // Jumlah fragment slot
}

const MAGIC: u64 = 0x5348_4D46_4946_4F31; // "SHMFIFO1" in hex
const VERSION: u32 = 1;

/// Offset tetap receive fifo di dalam setiap segment.
pub const FIFO_OFFSET: usize = 128;
/// Offset fragment slot pertama.
pub const FRAGMENTS_OFFSET: usize = 256;

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == FIFO_OFFSET);

/// Mmap-backed segment milik satu rank
pub struct ShmSegment {
    mmap: MmapMut,
    base: NonNull<u8>,
    file: File,
    path: PathBuf,
    header: SegmentHeader,
}

// SAFETY: base menunjuk ke mapping milik `mmap` yang ikut pindah bersama
// struct ini; memory shared hanya diakses lewat atomics.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Membuat segment baru untuk `rank` di `path` (file di-truncate).
    pub fn create<P: AsRef<Path>>(
        path: P,
        rank: u32,
        config: &SegmentConfig,
    ) -> Result<Self, SegmentError> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| SegmentError::io("open", path, e))?;

        Self::init_file(file, path.to_path_buf(), rank, config)
    }

    /// Segment anonim berbasis `memfd_create`, untuk proses yang saling
    /// mewarisi file descriptor.
    #[cfg(target_os = "linux")]
    pub fn anonymous(rank: u32, config: &SegmentConfig) -> Result<Self, SegmentError> {
        use std::ffi::CString;
        use std::os::unix::io::FromRawFd;

        let label = format!("shm-fifo-{rank}");
        let path = PathBuf::from(format!("memfd:{label}"));
        let name = CString::new(label)
            .map_err(|_| SegmentError::InvalidConfig("memfd name contains a NUL byte"))?;

        // SAFETY: name adalah C string valid
        let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(SegmentError::io(
                "memfd_create",
                path,
                std::io::Error::last_os_error(),
            ));
        }

        // SAFETY: fd baru saja dibuat dan belum dimiliki siapa pun
        let file = unsafe { File::from_raw_fd(fd) };
        Self::init_file(file, path, rank, config)
    }

    fn init_file(
        file: File,
        path: PathBuf,
        rank: u32,
        config: &SegmentConfig,
    ) -> Result<Self, SegmentError> {
        config.validate()?;
        if rank > MAX_RANK {
            return Err(SegmentError::InvalidConfig("rank collides with the FREE sentinel"));
        }

        file.set_len(config.size as u64)
            .map_err(|e| SegmentError::io("set_len", &path, e))?;

        // SAFETY: file dibuka read/write dan ukurannya sudah di-set
        let mut mmap = unsafe { MmapOptions::new().len(config.size).map_mut(&file) }
            .map_err(|e| SegmentError::io("mmap", &path, e))?;

        let header = SegmentHeader {
            magic: MAGIC,
            version: VERSION,
            rank,
            len: config.size as u64,
            fragment_size: config.fragment_size as u32,
            fragment_count: config.fragment_count() as u32,
        };

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or(SegmentError::InvalidConfig("mmap returned a null base"))?;

        // SAFETY: header berada di awal mapping, mapping page-aligned
        unsafe { std::ptr::write(base.as_ptr() as *mut SegmentHeader, header) };

        let segment = Self {
            mmap,
            base,
            file,
            path,
            header,
        };
        segment.fifo().init();

        info!(
            rank,
            path = %segment.path.display(),
            len = config.size,
            fragments = header.fragment_count,
            "segment created"
        );

        Ok(segment)
    }

    /// Membuka segment yang sudah ada, memvalidasi header-nya.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SegmentError> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SegmentError::io("open", path, e))?;

        Self::map_existing(file, path.to_path_buf())
    }

    /// Map ulang backing file yang sama di address baru.
    ///
    /// Dipakai untuk mensimulasikan peer yang me-map segment ini di base
    /// berbeda, tanpa proses kedua.
    pub fn remap(&self) -> Result<Self, SegmentError> {
        let file = self
            .file
            .try_clone()
            .map_err(|e| SegmentError::io("dup", &self.path, e))?;

        Self::map_existing(file, self.path.clone())
    }

    fn map_existing(file: File, path: PathBuf) -> Result<Self, SegmentError> {
        let found = file
            .metadata()
            .map_err(|e| SegmentError::io("stat", &path, e))?
            .len() as usize;

        if found < FRAGMENTS_OFFSET {
            return Err(SegmentError::TooSmall {
                path,
                required: FRAGMENTS_OFFSET,
                found,
            });
        }

        // SAFETY: file dibuka read/write; ukuran sudah dicek
        let mut mmap = unsafe { MmapOptions::new().len(found).map_mut(&file) }
            .map_err(|e| SegmentError::io("mmap", &path, e))?;

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or(SegmentError::InvalidConfig("mmap returned a null base"))?;

        // SAFETY: mapping minimal FRAGMENTS_OFFSET bytes dan page-aligned
        let header = unsafe { std::ptr::read(base.as_ptr() as *const SegmentHeader) };

        if header.magic != MAGIC {
            return Err(SegmentError::BadMagic {
                path,
                found: header.magic,
            });
        }
        if header.version != VERSION {
            return Err(SegmentError::VersionMismatch {
                path,
                expected: VERSION,
                found: header.version,
            });
        }

        // Field lain ikut dipercaya oleh fragment() / fragment_index() dan
        // SegmentTable, jadi harus lolos validasi yang sama dengan create()
        if header.rank > MAX_RANK {
            return Err(SegmentError::InvalidConfig("rank collides with the FREE sentinel"));
        }
        SegmentConfig {
            size: header.len as usize,
            fragment_size: header.fragment_size as usize,
        }
        .validate()?;

        let required = FRAGMENTS_OFFSET
            + header.fragment_size as usize * header.fragment_count as usize;
        if (header.len as usize) < required || found < header.len as usize {
            return Err(SegmentError::TooSmall {
                path,
                required: required.max(header.len as usize),
                found,
            });
        }

        debug!(
            rank = header.rank,
            path = %path.display(),
            base = ?base,
            "segment mapped"
        );

        Ok(Self {
            mmap,
            base,
            file,
            path,
            header,
        })
    }

    #[inline]
    pub fn rank(&self) -> u32 {
        self.header.rank
    }

    /// Ukuran segment sesuai header
    #[inline]
    pub fn len(&self) -> usize {
        self.header.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address mapping ini di proses sekarang.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn fragment_size(&self) -> usize {
        self.header.fragment_size as usize
    }

    #[inline]
    pub fn fragment_count(&self) -> usize {
        self.header.fragment_count as usize
    }

    /// Receive fifo milik rank ini.
    #[inline]
    pub fn fifo(&self) -> &Fifo {
        // SAFETY: FIFO_OFFSET 128-aligned di mapping page-aligned, dan
        // segment selalu lebih besar dari FRAGMENTS_OFFSET
        unsafe { &*(self.base.as_ptr().add(FIFO_OFFSET) as *const Fifo) }
    }

    /// Fragment slot ke-`index`, atau `None` di luar range.
    #[inline]
    pub fn fragment(&self, index: usize) -> Option<&FragmentHeader> {
        if index >= self.fragment_count() {
            return None;
        }
        // SAFETY: index < fragment_count, slot aligned karena fragment_size
        // kelipatan alignment header
        Some(unsafe { &*(self.fragment_ptr(index) as *const FragmentHeader) })
    }

    /// Pointer awal fragment slot; hanya valid untuk `index < fragment_count`.
    #[inline]
    pub(crate) fn fragment_ptr(&self, index: usize) -> *mut u8 {
        self.base
            .as_ptr()
            .wrapping_add(FRAGMENTS_OFFSET + index * self.fragment_size())
    }

    /// Index slot untuk header yang berada di segment ini.
    pub(crate) fn fragment_index(&self, hdr: &FragmentHeader) -> Option<usize> {
        let addr = hdr as *const FragmentHeader as usize;
        let start = self.base.as_ptr() as usize + FRAGMENTS_OFFSET;
        if addr < start {
            return None;
        }

        let delta = addr - start;
        let index = delta / self.fragment_size();
        if delta % self.fragment_size() != 0 || index >= self.fragment_count() {
            return None;
        }
        Some(index)
    }

    /// Flush mapping ke backing file.
    pub fn flush(&self) -> Result<(), SegmentError> {
        self.mmap
            .flush()
            .map_err(|e| SegmentError::io("msync", &self.path, e))
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("rank", &self.rank())
            .field("path", &self.path)
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}
