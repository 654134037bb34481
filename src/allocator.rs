//! Chunk allocation manager
//!
//! Chooses the backing tier for each new logical chunk of a file and keeps the
//! per-file descriptor table in step with the shared free-id stacks.
//!
//! Tier policy:
//! - memory pool first, when enabled
//! - spillover device once the pool is exhausted (or when memory is disabled)
//! - container tier is never served
//!
//! The memory pop and the spillover pop are separate critical sections. Under
//! contention two threads may interleave between them, so which file gets
//! which tier is not deterministic. No id is ever handed out twice.

use crate::chunk::{ChunkDescriptor, ChunkLocation, FileId, FileMeta};
use crate::config::{ChunkGeometry, SpillReclaim, StoreConfig};
use crate::error::{Result, StoreError, Tier};
use crate::freelist::{IdAllocator, LockedIdStack};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which tiers may hand out chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub memory: bool,
    pub spillover: bool,
    pub container: bool,
}

impl TierPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        TierPolicy {
            memory: config.use_memory,
            spillover: config.use_spillover,
            container: config.use_container,
        }
    }
}

/// Free/total chunk counts per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    pub memory_total: usize,
    pub memory_free: usize,
    pub spill_total: usize,
    pub spill_free: usize,
    /// Spillover ids dropped under [`SpillReclaim::Leak`]
    pub spill_leaked: u64,
}

impl AllocatorStats {
    pub fn memory_used(&self) -> usize {
        self.memory_total - self.memory_free
    }

    pub fn spill_used(&self) -> usize {
        self.spill_total - self.spill_free
    }
}

/// Allocates and frees chunks on behalf of files
pub struct ChunkAllocator {
    geometry: ChunkGeometry,
    policy: TierPolicy,
    reclaim: SpillReclaim,
    memory_ids: Arc<dyn IdAllocator>,
    spill_ids: Arc<dyn IdAllocator>,
    spill_leaked: std::sync::atomic::AtomicU64,
}

impl ChunkAllocator {
    /// Allocator over caller-supplied free-id stacks
    ///
    /// `spill_ids` hands out spill-local ids (`0..max_spill_chunks`).
    pub fn new(
        geometry: ChunkGeometry,
        policy: TierPolicy,
        reclaim: SpillReclaim,
        memory_ids: Arc<dyn IdAllocator>,
        spill_ids: Arc<dyn IdAllocator>,
    ) -> Self {
        ChunkAllocator {
            geometry,
            policy,
            reclaim,
            memory_ids,
            spill_ids,
            spill_leaked: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Allocator with fresh stacks sized from the configuration
    pub fn from_config(config: &StoreConfig) -> Self {
        let geometry = config.geometry();
        let memory_ids: Arc<dyn IdAllocator> = if config.use_memory {
            Arc::new(LockedIdStack::new(geometry.max_memory_chunks))
        } else {
            Arc::new(LockedIdStack::empty())
        };
        let spill_ids: Arc<dyn IdAllocator> = if config.use_spillover {
            Arc::new(LockedIdStack::new(geometry.max_spill_chunks))
        } else {
            Arc::new(LockedIdStack::empty())
        };

        Self::new(
            geometry,
            TierPolicy::from_config(config),
            config.spill_reclaim,
            memory_ids,
            spill_ids,
        )
    }

    pub fn policy(&self) -> TierPolicy {
        self.policy
    }

    /// Allocate logical chunk `chunk` of a file
    ///
    /// Chunks are only ever appended: `chunk` must equal the file's current
    /// chunk count. The count itself is left for the caller to bump.
    pub fn allocate(&self, file_id: FileId, meta: &mut FileMeta, chunk: u64) -> Result<()> {
        if chunk != meta.chunk_count() {
            return Err(StoreError::NonTailAllocation {
                requested: chunk,
                chunk_count: meta.chunk_count(),
            });
        }

        if self.policy.memory {
            if let Some(id) = self.memory_ids.pop() {
                *meta.slot_mut(chunk) = ChunkDescriptor::memory(id);
                debug!(file_id, chunk, physical_id = id, "allocated memory chunk");
                return Ok(());
            }

            if !self.policy.spillover {
                warn!(file_id, chunk, "memory pool exhausted, spillover disabled");
                return Err(StoreError::NoSpace { tier: Tier::Memory });
            }

            debug!(file_id, chunk, "memory pool exhausted, using spillover device");
        }

        if self.policy.spillover {
            let local = match self.spill_ids.pop() {
                Some(local) => local,
                None => {
                    warn!(file_id, chunk, "spillover device out of space");
                    return Err(StoreError::NoSpace {
                        tier: Tier::Spillover,
                    });
                }
            };

            let id = local + self.geometry.spill_base();
            *meta.slot_mut(chunk) = ChunkDescriptor::spillover(id);
            debug!(file_id, chunk, physical_id = id, "allocated spillover chunk");
            return Ok(());
        }

        if self.policy.container {
            debug!(file_id, chunk, "chunks not stored in containers");
            return Err(StoreError::ContainerUnsupported);
        }

        meta.slot_mut(chunk).location = ChunkLocation::Unset;
        Err(StoreError::UnsupportedTier)
    }

    /// Release logical chunk `chunk` of a file
    ///
    /// Fails without touching either free list when the descriptor is not a
    /// live chunk of a served tier.
    pub fn free(&self, file_id: FileId, meta: &mut FileMeta, chunk: u64) -> Result<()> {
        let descriptor = meta.slot(chunk);
        debug!(
            file_id,
            chunk,
            physical_id = descriptor.physical_id,
            location = ?descriptor.location,
            "free chunk"
        );

        match descriptor.location {
            ChunkLocation::MemoryPool => {
                if !self.geometry.is_memory_id(descriptor.physical_id) {
                    return Err(self.mismatch(&descriptor));
                }
                self.memory_ids.push(descriptor.physical_id);
            }
            ChunkLocation::SpilloverDevice => {
                if !self.geometry.is_spill_id(descriptor.physical_id) {
                    return Err(self.mismatch(&descriptor));
                }
                let local = descriptor.physical_id - self.geometry.spill_base();
                match self.reclaim {
                    SpillReclaim::Recycle => self.spill_ids.push(local),
                    SpillReclaim::Leak => {
                        self.spill_leaked
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        warn!(file_id, chunk, local, "spillover chunk not reclaimed");
                    }
                }
            }
            ChunkLocation::Container => {
                debug!(file_id, chunk, "chunks not stored in containers");
                return Err(StoreError::ContainerUnsupported);
            }
            ChunkLocation::Unset => {
                warn!(file_id, chunk, "free of unallocated chunk");
                return Err(StoreError::AlreadyFree { chunk });
            }
        }

        *meta.slot_mut(chunk) = ChunkDescriptor::UNSET;
        Ok(())
    }

    fn mismatch(&self, descriptor: &ChunkDescriptor) -> StoreError {
        warn!(
            physical_id = descriptor.physical_id,
            location = ?descriptor.location,
            "chunk id outside its tier"
        );
        StoreError::LocationMismatch {
            location: descriptor.location,
            physical_id: descriptor.physical_id,
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            memory_total: self.memory_ids.capacity(),
            memory_free: self.memory_ids.available(),
            spill_total: self.spill_ids.capacity(),
            spill_free: self.spill_ids.available(),
            spill_leaked: self
                .spill_leaked
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ChunkAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkAllocator")
            .field("geometry", &self.geometry)
            .field("policy", &self.policy)
            .field("reclaim", &self.reclaim)
            .field("stats", &self.stats())
            .finish()
    }
}
