//! Core module: Lock-Free MPSC Fifo di atas shared segment
//!
//! Prinsip desain:
//! - Position-independent: link disimpan sebagai offset relatif, bukan pointer
//! - Lock-Free: hanya swap / compare-exchange dan fence, tidak ada Mutex
//! - No-Allocation: queue tidak pernah memiliki atau mengalokasikan node

mod endpoint;
mod fifo;
mod header;
mod offset;
mod pool;
mod segment;
mod translate;

pub use endpoint::{write_to_endpoint, write_to_endpoint_remote, Endpoint};
pub use fifo::{Fifo, FIFO_SIZE};
pub use header::{FragmentHeader, FLAG_COMPLETE, HEADER_SIZE};
pub use offset::{RelativeOffset, FREE, MAX_RANK};
pub use pool::FragmentPool;
pub use segment::{ShmSegment, FIFO_OFFSET, FRAGMENTS_OFFSET};
pub use translate::SegmentTable;
