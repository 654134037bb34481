//! Fixed-chunk file store
//!
//! Maps a file's byte stream onto fixed-size chunks. `extend` and `shrink`
//! grow and trim the chunk map; `read` and `write` split a byte range into
//! chunk-local segments and hand each one to [`ChunkStorage`].
//!
//! None of the operations roll back: chunks allocated before a failed
//! `extend` stay allocated, and segments copied before a failed `read` or
//! `write` stay copied.

use crate::allocator::{AllocatorStats, ChunkAllocator};
use crate::chunk::{FileId, FileMeta};
use crate::config::{ChunkGeometry, StoreConfig};
use crate::error::{Result, StoreError};
use crate::storage::ChunkStorage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One chunk-local piece of a byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Logical chunk index
    pub chunk: u64,
    /// Offset within the chunk
    pub offset: u64,
    /// Offset within the caller's buffer
    pub buf_start: usize,
    pub len: usize,
}

/// Splits `[position, position + len)` at chunk boundaries
///
/// The first segment runs from `position` to the end of its chunk (or the end
/// of the range); every later segment starts at offset 0 of the next chunk.
#[derive(Debug, Clone)]
pub struct Segments {
    size: u64,
    chunk: u64,
    offset: u64,
    done: usize,
    total: usize,
}

impl Segments {
    pub fn new(geometry: &ChunkGeometry, position: u64, len: usize) -> Self {
        Segments {
            size: geometry.size,
            chunk: geometry.chunk_index(position),
            offset: geometry.chunk_offset(position),
            done: 0,
            total: len,
        }
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.done >= self.total {
            return None;
        }

        let room = (self.size - self.offset) as usize;
        let len = room.min(self.total - self.done);
        let segment = Segment {
            chunk: self.chunk,
            offset: self.offset,
            buf_start: self.done,
            len,
        };

        self.done += len;
        self.chunk += 1;
        self.offset = 0;
        Some(segment)
    }
}

/// Logical file I/O over allocated chunks
#[derive(Debug, Clone)]
pub struct FixedChunkStore {
    geometry: ChunkGeometry,
    file_chunk_limit: u64,
    allocator: Arc<ChunkAllocator>,
    storage: Arc<ChunkStorage>,
}

impl FixedChunkStore {
    pub fn new(
        allocator: Arc<ChunkAllocator>,
        storage: Arc<ChunkStorage>,
        file_chunk_limit: u64,
    ) -> Self {
        FixedChunkStore {
            geometry: *storage.geometry(),
            file_chunk_limit,
            allocator,
            storage,
        }
    }

    pub fn geometry(&self) -> &ChunkGeometry {
        &self.geometry
    }

    /// Bytes currently reserved for a file
    pub fn capacity(&self, meta: &FileMeta) -> u64 {
        self.geometry.capacity(meta.chunk_count())
    }

    /// Reserve chunks until the file can hold `length` bytes
    ///
    /// Every failure is NoSpace class: allocator errors of the Io class are
    /// wrapped in [`StoreError::ExtendFailed`]. On failure the file keeps every
    /// chunk allocated so far; re-read [`capacity`](Self::capacity) to learn how
    /// far it got.
    pub fn extend(&self, file_id: FileId, meta: &mut FileMeta, length: u64) -> Result<()> {
        while self.capacity(meta) < length {
            let next = meta.chunk_count();
            if next >= self.file_chunk_limit {
                warn!(file_id, limit = self.file_chunk_limit, "file chunk limit reached");
                return Err(StoreError::FileChunkLimit {
                    limit: self.file_chunk_limit,
                });
            }

            match self.allocator.allocate(file_id, meta, next) {
                Ok(()) => {}
                Err(err) if err.is_no_space() => {
                    debug!(file_id, chunk = next, error = %err, "failed to allocate chunk");
                    return Err(err);
                }
                Err(err) => {
                    debug!(file_id, chunk = next, error = %err, "no tier can serve chunk");
                    return Err(StoreError::ExtendFailed {
                        chunk: next,
                        source: Box::new(err),
                    });
                }
            }
            meta.increment_count();
        }

        Ok(())
    }

    /// Give back chunks not needed for `length` bytes
    ///
    /// Keeps `(length >> chunk_bits) + 1` chunks for any non-zero length, so a
    /// length that is an exact multiple of the chunk size retains one spare
    /// chunk. Chunks are released newest first.
    pub fn shrink(&self, file_id: FileId, meta: &mut FileMeta, length: u64) -> Result<()> {
        let keep = if length == 0 {
            0
        } else {
            (length >> self.geometry.bits) + 1
        };

        while meta.chunk_count() > keep {
            let last = meta.chunk_count() - 1;
            self.allocator.free(file_id, meta, last)?;
            meta.decrement_count();
        }

        Ok(())
    }

    /// Fill `buf` from the file starting at `position`
    pub fn read(&self, file_id: FileId, meta: &FileMeta, position: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(meta, position, buf.len())?;

        for seg in Segments::new(&self.geometry, position, buf.len()) {
            let descriptor = meta.descriptor(seg.chunk)?;
            let out = &mut buf[seg.buf_start..seg.buf_start + seg.len];
            if let Err(err) = self.storage.read(descriptor, seg.offset, out) {
                debug!(file_id, chunk = seg.chunk, error = %err, "chunk read failed");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Store `buf` in the file starting at `position`
    pub fn write(&self, file_id: FileId, meta: &FileMeta, position: u64, buf: &[u8]) -> Result<()> {
        self.check_range(meta, position, buf.len())?;

        for seg in Segments::new(&self.geometry, position, buf.len()) {
            let descriptor = meta.descriptor(seg.chunk)?;
            let src = &buf[seg.buf_start..seg.buf_start + seg.len];
            if let Err(err) = self.storage.write(descriptor, seg.offset, src) {
                debug!(file_id, chunk = seg.chunk, error = %err, "chunk write failed");
                return Err(err);
            }
        }

        Ok(())
    }

    // Only guards against u64 wrap-around; ranges past the file's capacity
    // are caught segment by segment.
    fn check_range(&self, meta: &FileMeta, position: u64, len: usize) -> Result<()> {
        match position.checked_add(len as u64) {
            Some(_) => Ok(()),
            None => Err(StoreError::ChunkOutOfRange {
                chunk: self.geometry.chunk_index(position),
                chunk_count: meta.chunk_count(),
            }),
        }
    }
}

/// A ready-to-use store: configuration, both tiers, free lists and file store
#[derive(Debug)]
pub struct TierStore {
    config: StoreConfig,
    allocator: Arc<ChunkAllocator>,
    storage: Arc<ChunkStorage>,
    files: FixedChunkStore,
}

impl TierStore {
    /// Validate the configuration and open every enabled tier
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate_all()?;

        let storage = Arc::new(ChunkStorage::open(&config)?);
        let allocator = Arc::new(ChunkAllocator::from_config(&config));
        let files = FixedChunkStore::new(
            allocator.clone(),
            storage.clone(),
            config.file_chunk_limit(),
        );

        info!(
            file_chunk_limit = config.file_chunk_limit(),
            policy = ?allocator.policy(),
            "tier store opened"
        );

        Ok(TierStore {
            config,
            allocator,
            storage,
            files,
        })
    }

    /// Load a TOML configuration file and open the store
    pub fn open_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::open(StoreConfig::load(path)?)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn geometry(&self) -> &ChunkGeometry {
        self.files.geometry()
    }

    /// The file store shared by all files of this store
    pub fn files(&self) -> &FixedChunkStore {
        &self.files
    }

    pub fn storage(&self) -> &ChunkStorage {
        &self.storage
    }

    pub fn allocator(&self) -> &ChunkAllocator {
        &self.allocator
    }

    /// Empty chunk map sized for this store's per-file limit
    pub fn new_file(&self) -> FileMeta {
        let hint = self.config.file_chunk_limit().min(1024) as usize;
        FileMeta::with_capacity(hint)
    }

    pub fn capacity(&self, meta: &FileMeta) -> u64 {
        self.files.capacity(meta)
    }

    pub fn extend(&self, file_id: FileId, meta: &mut FileMeta, length: u64) -> Result<()> {
        self.files.extend(file_id, meta, length)
    }

    pub fn shrink(&self, file_id: FileId, meta: &mut FileMeta, length: u64) -> Result<()> {
        self.files.shrink(file_id, meta, length)
    }

    pub fn read(&self, file_id: FileId, meta: &FileMeta, position: u64, buf: &mut [u8]) -> Result<()> {
        self.files.read(file_id, meta, position, buf)
    }

    pub fn write(&self, file_id: FileId, meta: &FileMeta, position: u64, buf: &[u8]) -> Result<()> {
        self.files.write(file_id, meta, position, buf)
    }

    pub fn stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }

    pub fn sync(&self) -> Result<()> {
        self.storage.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkDescriptor;
    use tempfile::NamedTempFile;

    fn small_store(spill: &NamedTempFile) -> TierStore {
        let config = StoreConfig::memory_only(2, 2).with_spillover(spill.path(), 2);
        TierStore::open(config).unwrap()
    }

    #[test]
    fn test_segments_single_chunk() {
        let g = ChunkGeometry::new(2, 2, 2);
        let segs: Vec<_> = Segments::new(&g, 1, 2).collect();
        assert_eq!(
            segs,
            vec![Segment {
                chunk: 0,
                offset: 1,
                buf_start: 0,
                len: 2
            }]
        );
    }

    #[test]
    fn test_segments_straddle() {
        let g = ChunkGeometry::new(2, 2, 2);
        let segs: Vec<_> = Segments::new(&g, 3, 7).collect();
        assert_eq!(
            segs,
            vec![
                Segment { chunk: 0, offset: 3, buf_start: 0, len: 1 },
                Segment { chunk: 1, offset: 0, buf_start: 1, len: 4 },
                Segment { chunk: 2, offset: 0, buf_start: 5, len: 2 },
            ]
        );
    }

    #[test]
    fn test_segments_empty() {
        let g = ChunkGeometry::new(2, 2, 2);
        assert_eq!(Segments::new(&g, 5, 0).count(), 0);
    }

    #[test]
    fn test_extend_is_idempotent() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();

        store.extend(1, &mut meta, 5).unwrap();
        assert_eq!(meta.chunk_count(), 2);
        let stats = store.stats();

        store.extend(1, &mut meta, 5).unwrap();
        store.extend(1, &mut meta, 8).unwrap();
        assert_eq!(meta.chunk_count(), 2);
        assert_eq!(store.stats(), stats);

        // Smaller target never shrinks
        store.extend(1, &mut meta, 1).unwrap();
        assert_eq!(meta.chunk_count(), 2);
    }

    #[test]
    fn test_extend_partial_on_exhaustion() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();

        let err = store.extend(1, &mut meta, 20).unwrap_err();
        assert!(err.is_no_space());
        assert_eq!(meta.chunk_count(), 4);
        assert_eq!(store.capacity(&meta), 16);
    }

    #[test]
    fn test_extend_respects_file_limit() {
        let spill = NamedTempFile::new().unwrap();
        let config = StoreConfig::memory_only(2, 2)
            .with_spillover(spill.path(), 2)
            .with_max_file_chunks(1);
        let store = TierStore::open(config).unwrap();
        let mut meta = store.new_file();

        let err = store.extend(1, &mut meta, 5).unwrap_err();
        assert!(matches!(err, StoreError::FileChunkLimit { limit: 1 }));
        assert_eq!(meta.chunk_count(), 1);
        assert_eq!(store.stats().memory_free, 1);
    }

    #[test]
    fn test_shrink_keeps_spare_chunk() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(1, &mut meta, 16).unwrap();

        store.shrink(1, &mut meta, 8).unwrap();
        assert_eq!(meta.chunk_count(), 3);

        store.shrink(1, &mut meta, 3).unwrap();
        assert_eq!(meta.chunk_count(), 1);

        store.shrink(1, &mut meta, 0).unwrap();
        assert_eq!(meta.chunk_count(), 0);
        assert_eq!(store.stats().memory_free, 2);
        assert_eq!(store.stats().spill_free, 2);
    }

    #[test]
    fn test_failed_free_stops_shrink() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(1, &mut meta, 12).unwrap();

        // Chunk 1 carries a spill location with an id from the memory range
        *meta.slot_mut(1) = ChunkDescriptor::spillover(0);

        let err = store.shrink(1, &mut meta, 0).unwrap_err();
        assert!(matches!(err, StoreError::LocationMismatch { .. }));

        // Chunk 2 was released before the failure; chunk 1 still counts
        assert_eq!(meta.chunk_count(), 2);
        assert_eq!(*meta.descriptor(1).unwrap(), ChunkDescriptor::spillover(0));
        let stats = store.stats();
        assert_eq!(stats.spill_free, 2);
        assert_eq!(stats.memory_free, 0);
    }

    #[test]
    fn test_extend_wraps_unservable_tier() {
        let store = TierStore::open(StoreConfig::memory_only(2, 2).with_tiers(false, false, false))
            .unwrap();
        let mut meta = store.new_file();

        let err = store.extend(1, &mut meta, 8).unwrap_err();
        assert!(err.is_no_space());
        assert!(matches!(err, StoreError::ExtendFailed { chunk: 0, .. }));
    }

    #[test]
    fn test_shrink_never_grows() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(1, &mut meta, 4).unwrap();

        store.shrink(1, &mut meta, 12).unwrap();
        assert_eq!(meta.chunk_count(), 1);
    }

    #[test]
    fn test_read_past_capacity_rejected() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(1, &mut meta, 4).unwrap();

        let mut buf = [0u8; 6];
        let err = store.read(1, &meta, 0, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ChunkOutOfRange {
                chunk: 1,
                chunk_count: 1
            }
        ));
    }

    #[test]
    fn test_write_stops_at_first_bad_segment() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(1, &mut meta, 4).unwrap();

        assert!(store.write(1, &meta, 2, b"wxyz").is_err());

        // First segment was committed
        let mut out = [0u8; 2];
        store.read(1, &meta, 2, &mut out).unwrap();
        assert_eq!(&out, b"wx");
    }

    #[test]
    fn test_zero_length_io() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let meta = store.new_file();

        store.write(1, &meta, 0, &[]).unwrap();
        store.read(1, &meta, 100, &mut []).unwrap();
    }

    #[test]
    fn test_overflowing_range_rejected() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let meta = store.new_file();

        let mut buf = [0u8; 2];
        assert!(store.read(1, &meta, u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_spilled_chunk_descriptor() {
        let spill = NamedTempFile::new().unwrap();
        let store = small_store(&spill);
        let mut meta = store.new_file();
        store.extend(3, &mut meta, 12).unwrap();

        assert_eq!(*meta.descriptor(2).unwrap(), ChunkDescriptor::spillover(2));
    }
}
