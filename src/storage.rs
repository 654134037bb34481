//! Physical chunk storage
//!
//! Two tiers sliced into `chunk_size` pieces:
//! - the memory pool, one contiguous mapping (anonymous or file/shm backed)
//! - the spillover device, a file or block device accessed with positioned I/O
//!
//! Chunk N of a tier occupies bytes `[N * chunk_size, (N + 1) * chunk_size)`.

use crate::chunk::{ChunkDescriptor, PhysicalChunk};
use crate::config::{ChunkGeometry, StoreConfig};
use crate::error::{Result, StoreError, Tier};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// In-memory chunk pool
pub struct MemoryPool {
    map: MmapMut,
    /// Start of `map`; captured once so copies only need `&self`
    base: *mut u8,
    len: usize,
    path: Option<PathBuf>,
}

// The mapping is owned by the pool and outlives every copy through `base`.
// Distinct chunks are disjoint ranges, and a single chunk belongs to a single
// file whose operations are serialised by its owner.
unsafe impl Send for MemoryPool {}
unsafe impl Sync for MemoryPool {}

impl MemoryPool {
    /// Private anonymous mapping of `len` bytes
    pub fn anonymous(len: usize) -> Result<Self> {
        let mut map = MmapOptions::new().len(len).map_anon()?;
        let base = map.as_mut_ptr();
        Ok(MemoryPool {
            map,
            base,
            len,
            path: None,
        })
    }

    /// Shared mapping of a file, grown to `len` bytes if shorter
    ///
    /// Pointing this at a file under `/dev/shm` gives a pool that other
    /// processes can attach to.
    pub fn open<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.metadata()?.len() < len as u64 {
            file.set_len(len as u64)?;
        }

        // Safety: the file is opened read/write by us; concurrent external
        // truncation is outside the engine's contract.
        let mut map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        let base = map.as_mut_ptr();
        Ok(MemoryPool {
            map,
            base,
            len,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_at(&self, start: usize, buf: &mut [u8]) {
        debug_assert!(start + buf.len() <= self.len);
        // Safety: bounds checked by ChunkStorage before dispatch
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(start), buf.as_mut_ptr(), buf.len());
        }
    }

    fn write_at(&self, start: usize, buf: &[u8]) {
        debug_assert!(start + buf.len() <= self.len);
        // Safety: bounds checked by ChunkStorage before dispatch
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.base.add(start), buf.len());
        }
    }

    /// Flush a file-backed mapping; no-op for anonymous pools
    pub fn flush(&self) -> Result<()> {
        if self.path.is_some() {
            self.map.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("len", &self.len)
            .field("path", &self.path)
            .finish()
    }
}

/// Spillover file or block device
#[derive(Debug)]
pub struct SpillDevice {
    file: File,
    path: PathBuf,
}

impl SpillDevice {
    /// Open (creating if needed) and make sure at least `len` bytes exist
    ///
    /// Regular files are extended sparsely so reads of never-written chunks
    /// are full-length. Block devices are used as they are.
    pub fn open<P: AsRef<Path>>(path: P, len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let metadata = file.metadata()?;
        if metadata.is_file() && metadata.len() < len {
            file.set_len(len)?;
        }

        Ok(SpillDevice {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.file.read_at(buf, offset)?;
        full_transfer(buf.len(), n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let n = self.file.write_at(buf, offset)?;
        full_transfer(buf.len(), n)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// A positioned call that moved fewer bytes than asked is an error, never
/// retried
fn full_transfer(expected: usize, actual: usize) -> Result<()> {
    if actual != expected {
        return Err(StoreError::ShortTransfer { expected, actual });
    }
    Ok(())
}

/// Byte-range access to chunks of either tier
#[derive(Debug)]
pub struct ChunkStorage {
    geometry: ChunkGeometry,
    memory: Option<MemoryPool>,
    spill: Option<SpillDevice>,
}

impl ChunkStorage {
    /// Assemble storage from already opened tiers
    pub fn new(
        geometry: ChunkGeometry,
        memory: Option<MemoryPool>,
        spill: Option<SpillDevice>,
    ) -> Result<Self> {
        if let Some(pool) = &memory {
            if (pool.len() as u64) < geometry.memory_bytes() {
                return Err(StoreError::InvalidConfig(format!(
                    "memory pool holds {} bytes, need {}",
                    pool.len(),
                    geometry.memory_bytes()
                )));
            }
        }

        Ok(ChunkStorage {
            geometry,
            memory,
            spill,
        })
    }

    /// Open the tiers a configuration enables
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let geometry = config.geometry();

        let memory = if config.use_memory && geometry.max_memory_chunks > 0 {
            let len = usize::try_from(geometry.memory_bytes()).map_err(|_| {
                StoreError::InvalidConfig("memory pool does not fit in the address space".into())
            })?;
            let pool = match &config.memory_path {
                Some(path) => MemoryPool::open(path, len)?,
                None => MemoryPool::anonymous(len)?,
            };
            debug!(bytes = len, path = ?pool.path(), "memory pool mapped");
            Some(pool)
        } else {
            None
        };

        let spill = match (&config.spill_path, config.use_spillover) {
            (Some(path), true) if geometry.max_spill_chunks > 0 => {
                let device = SpillDevice::open(path, geometry.spill_bytes())?;
                debug!(bytes = geometry.spill_bytes(), path = %path.display(), "spillover device opened");
                Some(device)
            }
            _ => None,
        };

        info!(
            chunk_size = geometry.size,
            memory_chunks = geometry.max_memory_chunks,
            spill_chunks = geometry.max_spill_chunks,
            "chunk storage ready"
        );

        Self::new(geometry, memory, spill)
    }

    pub fn geometry(&self) -> &ChunkGeometry {
        &self.geometry
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    pub fn has_spillover(&self) -> bool {
        self.spill.is_some()
    }

    fn check_segment(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= self.geometry.size => Ok(()),
            _ => Err(StoreError::SegmentOutOfBounds {
                offset,
                len,
                chunk_size: self.geometry.size,
            }),
        }
    }

    /// Copy `buf.len()` bytes out of a chunk starting at `offset`
    pub fn read(&self, descriptor: &ChunkDescriptor, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_segment(offset, buf.len())?;

        match descriptor.resolve(&self.geometry)? {
            PhysicalChunk::Memory { index } => {
                let pool = self
                    .memory
                    .as_ref()
                    .ok_or(StoreError::TierNotAttached(Tier::Memory))?;
                let start = (index * self.geometry.size + offset) as usize;
                pool.read_at(start, buf);
                Ok(())
            }
            PhysicalChunk::Spill { index } => {
                let device = self
                    .spill
                    .as_ref()
                    .ok_or(StoreError::TierNotAttached(Tier::Spillover))?;
                device.read_at(index * self.geometry.size + offset, buf)
            }
        }
    }

    /// Copy `buf` into a chunk starting at `offset`
    pub fn write(&self, descriptor: &ChunkDescriptor, offset: u64, buf: &[u8]) -> Result<()> {
        self.check_segment(offset, buf.len())?;

        match descriptor.resolve(&self.geometry)? {
            PhysicalChunk::Memory { index } => {
                let pool = self
                    .memory
                    .as_ref()
                    .ok_or(StoreError::TierNotAttached(Tier::Memory))?;
                let start = (index * self.geometry.size + offset) as usize;
                pool.write_at(start, buf);
                Ok(())
            }
            PhysicalChunk::Spill { index } => {
                let device = self
                    .spill
                    .as_ref()
                    .ok_or(StoreError::TierNotAttached(Tier::Spillover))?;
                device.write_at(index * self.geometry.size + offset, buf)
            }
        }
    }

    /// Flush both tiers
    pub fn sync(&self) -> Result<()> {
        if let Some(pool) = &self.memory {
            pool.flush()?;
        }
        if let Some(device) = &self.spill {
            device.sync()?;
        }
        Ok(())
    }
}
