//! Chunk descriptors and per-file chunk maps
//!
//! A descriptor records where one logical chunk of a file lives. Physical ids
//! share a single number line: `[0, M)` is the memory pool and `[M, M + S)` is
//! the spillover device, where `M = max_memory_chunks`. Spillover ids are
//! always stored with the `M` offset applied; [`ChunkDescriptor::resolve`] is
//! the one place that strips it.

use crate::config::ChunkGeometry;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Identifier of an open file, supplied by the caller
pub type FileId = u32;

/// Backing tier of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChunkLocation {
    #[default]
    Unset,
    MemoryPool,
    SpilloverDevice,
    /// Reserved; never served
    Container,
}

/// Location and physical id of one logical chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub location: ChunkLocation,
    pub physical_id: u64,
}

/// A descriptor after tier dispatch, holding the tier-local index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalChunk {
    Memory { index: u64 },
    Spill { index: u64 },
}

impl ChunkDescriptor {
    pub const UNSET: ChunkDescriptor = ChunkDescriptor {
        location: ChunkLocation::Unset,
        physical_id: 0,
    };

    pub fn memory(id: u64) -> Self {
        ChunkDescriptor {
            location: ChunkLocation::MemoryPool,
            physical_id: id,
        }
    }

    /// `id` must already carry the `max_memory_chunks` offset
    pub fn spillover(id: u64) -> Self {
        ChunkDescriptor {
            location: ChunkLocation::SpilloverDevice,
            physical_id: id,
        }
    }

    pub fn is_allocated(&self) -> bool {
        matches!(
            self.location,
            ChunkLocation::MemoryPool | ChunkLocation::SpilloverDevice
        )
    }

    /// Dispatch to a tier, checking that the id lies in that tier's range
    pub fn resolve(&self, geometry: &ChunkGeometry) -> Result<PhysicalChunk> {
        match self.location {
            ChunkLocation::MemoryPool if geometry.is_memory_id(self.physical_id) => {
                Ok(PhysicalChunk::Memory {
                    index: self.physical_id,
                })
            }
            ChunkLocation::SpilloverDevice if geometry.is_spill_id(self.physical_id) => {
                Ok(PhysicalChunk::Spill {
                    index: self.physical_id - geometry.spill_base(),
                })
            }
            ChunkLocation::MemoryPool | ChunkLocation::SpilloverDevice => {
                Err(StoreError::LocationMismatch {
                    location: self.location,
                    physical_id: self.physical_id,
                })
            }
            ChunkLocation::Container => Err(StoreError::ContainerUnsupported),
            ChunkLocation::Unset => Err(StoreError::AlreadyFree {
                chunk: self.physical_id,
            }),
        }
    }
}

/// Chunk map of one file
///
/// `descriptors[..chunk_count]` are live; anything past `chunk_count` is
/// `Unset` and never consulted. Not synchronised: the owner of a file id must
/// serialise calls against it (see [`crate::file::LockedFile`]).
///
/// A chunk map owns its chunks, so it cannot be copied:
///
/// ```compile_fail
/// let meta = tierfs::FileMeta::new();
/// let copy = meta.clone();
/// ```
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FileMeta {
    chunk_count: u64,
    descriptors: Vec<ChunkDescriptor>,
}

impl FileMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the descriptor table
    pub fn with_capacity(chunks: usize) -> Self {
        FileMeta {
            chunk_count: 0,
            descriptors: Vec::with_capacity(chunks),
        }
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Live descriptors in logical order
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        let live = (self.chunk_count as usize).min(self.descriptors.len());
        &self.descriptors[..live]
    }

    /// Descriptor of a live logical chunk
    pub fn descriptor(&self, chunk: u64) -> Result<&ChunkDescriptor> {
        let out_of_range = StoreError::ChunkOutOfRange {
            chunk,
            chunk_count: self.chunk_count,
        };
        if chunk >= self.chunk_count {
            return Err(out_of_range);
        }
        self.descriptors.get(chunk as usize).ok_or(out_of_range)
    }

    /// Slot for a logical chunk, growing the table with `Unset` entries
    pub(crate) fn slot_mut(&mut self, chunk: u64) -> &mut ChunkDescriptor {
        let idx = chunk as usize;
        if idx >= self.descriptors.len() {
            self.descriptors.resize(idx + 1, ChunkDescriptor::UNSET);
        }
        &mut self.descriptors[idx]
    }

    pub(crate) fn slot(&self, chunk: u64) -> ChunkDescriptor {
        self.descriptors
            .get(chunk as usize)
            .copied()
            .unwrap_or(ChunkDescriptor::UNSET)
    }

    pub(crate) fn increment_count(&mut self) {
        self.chunk_count += 1;
    }

    pub(crate) fn decrement_count(&mut self) {
        self.chunk_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ChunkGeometry {
        ChunkGeometry::new(2, 2, 2)
    }

    #[test]
    fn test_resolve_memory() {
        let d = ChunkDescriptor::memory(1);
        assert_eq!(
            d.resolve(&geometry()).unwrap(),
            PhysicalChunk::Memory { index: 1 }
        );
    }

    #[test]
    fn test_resolve_spill_strips_offset() {
        let d = ChunkDescriptor::spillover(3);
        assert_eq!(
            d.resolve(&geometry()).unwrap(),
            PhysicalChunk::Spill { index: 1 }
        );
    }

    #[test]
    fn test_resolve_rejects_wrong_range() {
        // Spill id stored without the memory offset
        let d = ChunkDescriptor::spillover(0);
        assert!(matches!(
            d.resolve(&geometry()),
            Err(StoreError::LocationMismatch { .. })
        ));

        let d = ChunkDescriptor::memory(2);
        assert!(d.resolve(&geometry()).is_err());

        let d = ChunkDescriptor::spillover(4);
        assert!(d.resolve(&geometry()).is_err());
    }

    #[test]
    fn test_resolve_unset_and_container() {
        assert!(matches!(
            ChunkDescriptor::UNSET.resolve(&geometry()),
            Err(StoreError::AlreadyFree { .. })
        ));

        let d = ChunkDescriptor {
            location: ChunkLocation::Container,
            physical_id: 0,
        };
        assert!(matches!(
            d.resolve(&geometry()),
            Err(StoreError::ContainerUnsupported)
        ));
    }

    #[test]
    fn test_file_meta_lookup() {
        let mut meta = FileMeta::new();
        assert!(meta.descriptor(0).is_err());

        *meta.slot_mut(0) = ChunkDescriptor::memory(0);
        meta.increment_count();

        assert_eq!(meta.chunk_count(), 1);
        assert_eq!(*meta.descriptor(0).unwrap(), ChunkDescriptor::memory(0));
        assert!(matches!(
            meta.descriptor(1),
            Err(StoreError::ChunkOutOfRange {
                chunk: 1,
                chunk_count: 1
            })
        ));
        assert_eq!(meta.slot(5), ChunkDescriptor::UNSET);
    }

    #[test]
    fn test_count_beyond_table_is_out_of_range() {
        let meta = FileMeta {
            chunk_count: 3,
            descriptors: Vec::new(),
        };

        assert!(meta.chunks().is_empty());
        assert!(matches!(
            meta.descriptor(0),
            Err(StoreError::ChunkOutOfRange {
                chunk: 0,
                chunk_count: 3
            })
        ));
    }
}
