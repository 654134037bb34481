//! # tierfs - Fixed-Chunk Tiered Storage Engine
//!
//! `tierfs` is the storage layer of a memory-resident file system. File bytes
//! live in fixed-size chunks drawn from a fast in-memory pool and, once that
//! pool runs dry, from a slower spillover file or block device.
//!
//! - **Fixed power-of-two chunks**: the unit of allocation and tier placement
//! - **Two tiers**: memory pool first, spillover device second
//! - **LIFO free lists**: one per tier, locked per call
//! - **Segmented I/O**: reads and writes straddling chunks and tiers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierfs::{StoreConfig, TierStore, Result};
//!
//! # fn main() -> Result<()> {
//! let config = StoreConfig::memory_only(12, 256).with_spillover("/tmp/tierfs.spill", 1024);
//! let store = TierStore::open(config)?;
//!
//! let mut meta = store.new_file();
//! store.extend(1, &mut meta, 10_000)?;
//! store.write(1, &meta, 0, b"Hello, World!")?;
//!
//! let mut out = [0u8; 13];
//! store.read(1, &meta, 0, &mut out)?;
//! assert_eq!(&out, b"Hello, World!");
//!
//! store.shrink(1, &mut meta, 0)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Physical Layout
//!
//! ```text
//! physical id:  0 .. M-1            M .. M+S-1
//!              ┌──────────────────┬─────────────────────────┐
//!              │   memory pool    │    spillover device     │
//!              │ base + id*chunk  │ (id - M)*chunk on disk  │
//!              └──────────────────┴─────────────────────────┘
//! ```
//!
//! `M = max_memory_chunks`, `S = max_spill_chunks`. Nothing survives a
//! restart; the spillover device is scratch space.
//!
//! ## Concurrency
//!
//! The store is `Send + Sync` and may be shared across threads. Operations on
//! different files run concurrently; operations on one file must be
//! serialised by the caller, or routed through [`LockedFile`].

pub mod allocator;
pub mod chunk;
pub mod config;
pub mod error;
pub mod file;
pub mod freelist;
pub mod storage;
pub mod store;

pub use allocator::{AllocatorStats, ChunkAllocator, TierPolicy};
pub use chunk::{ChunkDescriptor, ChunkLocation, FileId, FileMeta, PhysicalChunk};
pub use config::{ChunkGeometry, SpillReclaim, StoreConfig};
pub use error::{ErrorClass, Result, StoreError, Tier};
pub use file::LockedFile;
pub use freelist::{IdAllocator, LockedIdStack};
pub use storage::{ChunkStorage, MemoryPool, SpillDevice};
pub use store::{FixedChunkStore, Segment, Segments, TierStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
