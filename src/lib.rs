//! shm-fifo - Lock-Free Shared-Memory Fifo
//!
//! Arsitektur:
//! - Satu segment per rank, di-map oleh semua peer di base masing-masing
//! - Receive fifo tiap rank berada di offset tetap di dalam segment-nya
//! - Producer mana pun bisa enqueue fragment; hanya pemilik yang dequeue
//!
//! ```no_run
//! use shm_fifo::config::SegmentConfig;
//! use shm_fifo::core::{write_to_endpoint, FragmentPool, SegmentTable, ShmSegment};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SegmentConfig::default();
//! let sender = ShmSegment::create("/dev/shm/rank0", 0, &config)?;
//! let receiver = ShmSegment::create("/dev/shm/rank1", 1, &config)?;
//!
//! let mut table = SegmentTable::new(0);
//! table.attach(&sender);
//! table.attach(&receiver);
//!
//! let mut pool = FragmentPool::new(&sender);
//! let frag = pool.allocate().ok_or("pool exhausted")?;
//! pool.fill(frag, b"ping")?;
//! write_to_endpoint(&table, frag, &table.endpoint(1)?)?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_pointer_width = "64"))]
compile_error!("shm-fifo encodes relative offsets in 64-bit words");

pub mod config;
pub mod core;
pub mod error;
pub mod trace;

pub use config::{FifoConfig, SegmentConfig, SpinPolicy};
pub use error::{PoolError, SegmentError, TranslateError};
