//! Lock-Free Multi-Producer Single-Consumer FIFO di Shared Memory
//!
//! Queue berupa linked list intrusive dari [`FragmentHeader`]. Link `next`,
//! `head` dan `tail` semuanya [`RelativeOffset`], sehingga setiap proses bisa
//! memakai queue yang sama walaupun segment di-map di base berbeda.
//!
//! Sinkronisasi:
//! - Producer diserialisasi oleh `swap` pada `tail`. Hanya producer yang
//!   mendapat `prev` dari swap boleh menulis `prev.next`.
//! - Consumer tunggal meng-klaim head dengan `swap(head, FREE)`. Kalau node
//!   yang diklaim terlihat sebagai node terakhir, `compare_exchange` pada
//!   `tail` memutuskan apakah queue benar-benar kosong atau ada producer yang
//!   sedang menyambung link.
//!
//! Tidak ada Mutex, tidak ada alokasi, tidak ada syscall.

use std::hint;
use std::sync::atomic::{fence, AtomicI64, Ordering};

use crossbeam_utils::Backoff;

use super::header::FragmentHeader;
use super::offset::{RelativeOffset, FREE};
use super::translate::SegmentTable;
use crate::config::SpinPolicy;
use crate::trace::{error, trace};

/// Ukuran `Fifo` di shared memory: satu cache line penuh (128 bytes untuk
/// prefetcher pasangan line di x86-64).
pub const FIFO_SIZE: usize = 128;

/// Head dan tail queue, di-padding agar menempati cache line sendiri.
#[repr(C, align(128))]
pub struct Fifo {
    head: AtomicI64,
    tail: AtomicI64,
}

const _: () = assert!(std::mem::size_of::<Fifo>() == FIFO_SIZE);

impl Fifo {
    /// Queue kosong (FREE/FREE). Untuk queue di shared memory pakai [`Fifo::init`].
    pub const fn new() -> Self {
        Self {
            head: AtomicI64::new(FREE.raw()),
            tail: AtomicI64::new(FREE.raw()),
        }
    }

    /// Set `head = tail = FREE`.
    ///
    /// Harus dipanggil sekali, sebelum queue diumumkan ke producer atau
    /// consumer mana pun.
    pub fn init(&self) {
        self.head.store(FREE.raw(), Ordering::Relaxed);
        self.tail.store(FREE.raw(), Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Snapshot `head`, hanya untuk diagnostik.
    pub fn head(&self) -> RelativeOffset {
        RelativeOffset::from_raw(self.head.load(Ordering::Acquire))
    }

    /// Snapshot `tail`, hanya untuk diagnostik.
    pub fn tail(&self) -> RelativeOffset {
        RelativeOffset::from_raw(self.tail.load(Ordering::Acquire))
    }

    /// `true` jika `head == tail == FREE` saat dibaca.
    pub fn is_empty(&self) -> bool {
        self.head().is_free() && self.tail().is_free()
    }

    /// Enqueue node pada `value` (Producer side).
    ///
    /// `next` milik node harus sudah FREE sebelum dipanggil; lihat
    /// [`write_to_endpoint`](super::write_to_endpoint). Lock-free, tidak pernah
    /// blocking.
    ///
    /// # Panics
    /// Panic jika `value` adalah FREE, node yang sama di-enqueue dua kali
    /// berturut-turut, atau tail sebelumnya tidak bisa di-resolve. Semua itu
    /// berarti shared memory sudah korup.
    #[inline]
    pub fn write(&self, table: &SegmentTable<'_>, value: RelativeOffset) {
        if value.is_free() {
            corrupted("FREE sentinel enqueued", value);
        }

        // next = FREE milik node harus terlihat sebelum node bisa dicapai
        fence(Ordering::Release);
        let prev = RelativeOffset::from_raw(self.tail.swap(value.raw(), Ordering::AcqRel));
        fence(Ordering::Acquire);

        if prev == value {
            corrupted("node enqueued while already the tail", value);
        }

        if !prev.is_free() {
            // Hanya kita yang memegang `prev` hasil swap
            match table.header(prev) {
                Ok(hdr) => hdr.set_next(value),
                Err(_) => corrupted("previous tail does not resolve", prev),
            }
        } else {
            self.head.store(value.raw(), Ordering::Release);
        }

        fence(Ordering::Release);
    }

    /// Dequeue head (Consumer side) dengan [`SpinPolicy`] default.
    ///
    /// Returns `None` jika belum ada node yang siap. Itu bukan error: poll lagi.
    #[inline]
    pub fn read<'m>(&self, table: &SegmentTable<'m>) -> Option<&'m FragmentHeader> {
        self.read_with(table, SpinPolicy::default())
    }

    /// Dequeue head dengan cara tunggu tertentu.
    ///
    /// Hanya boleh ada satu consumer per queue; ini tidak dicek. Header yang
    /// dikembalikan sudah lepas dari chain dan menjadi milik pemanggil.
    ///
    /// # Panics
    /// Panic jika head tidak bisa di-resolve atau node menunjuk ke dirinya
    /// sendiri.
    pub fn read_with<'m>(
        &self,
        table: &SegmentTable<'m>,
        spin: SpinPolicy,
    ) -> Option<&'m FragmentHeader> {
        fence(Ordering::Acquire);

        let value = RelativeOffset::from_raw(self.head.swap(FREE.raw(), Ordering::AcqRel));
        if value.is_free() {
            // Kosong, atau producer pertama belum selesai mempublish head
            return None;
        }

        let hdr = match table.header(value) {
            Ok(hdr) => hdr,
            Err(_) => corrupted("head does not resolve", value),
        };

        let next = hdr.next();
        if next == value {
            corrupted("self-loop", value);
        }

        if next.is_free() {
            fence(Ordering::Acquire);

            if self
                .tail
                .compare_exchange(value.raw(), FREE.raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Producer sudah memindah tail melewati node ini tapi belum
                // menulis hdr.next
                trace!(node = %value, "waiting for producer to link next");
                let next = wait_for_link(hdr, spin);
                self.head.store(next.raw(), Ordering::Release);
            }
        } else {
            self.head.store(next.raw(), Ordering::Release);
        }

        fence(Ordering::Release);

        Some(hdr)
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fifo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fifo")
            .field("head", &self.head())
            .field("tail", &self.tail())
            .finish()
    }
}

#[inline]
fn wait_for_link(hdr: &FragmentHeader, spin: SpinPolicy) -> RelativeOffset {
    match spin {
        SpinPolicy::Busy => loop {
            let next = hdr.next();
            if !next.is_free() {
                return next;
            }
            fence(Ordering::Acquire);
            hint::spin_loop();
        },
        SpinPolicy::Backoff => {
            let backoff = Backoff::new();
            loop {
                let next = hdr.next();
                if !next.is_free() {
                    return next;
                }
                fence(Ordering::Acquire);
                backoff.snooze();
            }
        }
    }
}

#[cold]
#[inline(never)]
fn corrupted(what: &'static str, offset: RelativeOffset) -> ! {
    error!(%offset, what, "shared fifo corrupted");
    panic!("shared fifo corrupted: {what} at {offset}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HEADER_SIZE;
    use std::ptr::NonNull;

    struct Arena {
        headers: Vec<FragmentHeader>,
    }

    impl Arena {
        fn new(len: usize) -> Self {
            Self {
                headers: (0..len).map(|_| FragmentHeader::new()).collect(),
            }
        }

        fn table(&mut self) -> SegmentTable<'_> {
            let len = self.headers.len() * HEADER_SIZE;
            let base = NonNull::new(self.headers.as_mut_ptr() as *mut u8).unwrap();
            let mut table = SegmentTable::new(0);
            unsafe { table.attach_raw(0, base, len) };
            table
        }
    }

    fn offset(i: usize) -> RelativeOffset {
        RelativeOffset::new(0, (i * HEADER_SIZE) as u32)
    }

    fn push(fifo: &Fifo, table: &SegmentTable<'_>, i: usize) {
        table.header(offset(i)).unwrap().mark_tail();
        fifo.write(table, offset(i));
    }

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<Fifo>(), 128);
        assert_eq!(std::mem::align_of::<Fifo>(), 128);
    }

    #[test]
    fn test_init_resets_to_free() {
        let mut arena = Arena::new(4);
        let table = arena.table();
        let fifo = Fifo::new();

        push(&fifo, &table, 1);
        assert!(!fifo.is_empty());

        fifo.init();
        assert!(fifo.head().is_free());
        assert!(fifo.tail().is_free());
    }

    #[test]
    fn test_single_node_round_trip() {
        let mut arena = Arena::new(8);
        let table = arena.table();
        let fifo = Fifo::new();
        fifo.init();

        push(&fifo, &table, 5);
        assert_eq!(fifo.head(), offset(5));
        assert_eq!(fifo.tail(), offset(5));

        let hdr = fifo.read(&table).unwrap();
        assert_eq!(table.header_offset(hdr).unwrap(), offset(5));

        assert!(fifo.read(&table).is_none());
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let mut arena = Arena::new(64);
        let table = arena.table();
        let fifo = Fifo::new();

        for i in 0..64 {
            push(&fifo, &table, i);
        }
        for i in 0..64 {
            let hdr = fifo.read(&table).unwrap();
            assert_eq!(table.header_offset(hdr).unwrap(), offset(i));
        }
        assert!(fifo.read(&table).is_none());
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_empty_read_is_idempotent() {
        let mut arena = Arena::new(1);
        let table = arena.table();
        let fifo = Fifo::new();

        for _ in 0..100 {
            assert!(fifo.read(&table).is_none());
            assert!(fifo.is_empty());
        }
    }

    #[test]
    fn test_interleaved_write_read_reuses_nodes() {
        let mut arena = Arena::new(4);
        let table = arena.table();
        let fifo = Fifo::new();

        for round in 0..10 {
            push(&fifo, &table, round % 4);
            push(&fifo, &table, (round + 1) % 4);

            let a = fifo.read(&table).unwrap();
            assert_eq!(table.header_offset(a).unwrap(), offset(round % 4));
            let b = fifo.read(&table).unwrap();
            assert_eq!(table.header_offset(b).unwrap(), offset((round + 1) % 4));

            assert!(fifo.read(&table).is_none());
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_links_never_self_loop() {
        let mut arena = Arena::new(16);
        let table = arena.table();
        let fifo = Fifo::new();

        for i in 0..16 {
            push(&fifo, &table, i);
        }
        for i in 0..16 {
            let hdr = table.header(offset(i)).unwrap();
            assert_ne!(hdr.next(), offset(i));
        }
    }

    #[test]
    fn test_backoff_policy_drains() {
        let mut arena = Arena::new(8);
        let table = arena.table();
        let fifo = Fifo::new();

        for i in 0..8 {
            push(&fifo, &table, i);
        }
        for i in 0..8 {
            let hdr = fifo.read_with(&table, SpinPolicy::Backoff).unwrap();
            assert_eq!(table.header_offset(hdr).unwrap(), offset(i));
        }
        assert!(fifo.read_with(&table, SpinPolicy::Backoff).is_none());
    }

    #[test]
    #[should_panic(expected = "self-loop")]
    fn test_self_loop_is_fatal() {
        let mut arena = Arena::new(2);
        let table = arena.table();
        let fifo = Fifo::new();

        push(&fifo, &table, 0);
        table.header(offset(0)).unwrap().set_next(offset(0));
        let _ = fifo.read(&table);
    }

    #[test]
    #[should_panic(expected = "FREE sentinel")]
    fn test_enqueue_free_is_fatal() {
        let mut arena = Arena::new(1);
        let table = arena.table();
        Fifo::new().write(&table, FREE);
    }
}
