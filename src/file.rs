//! Per-file locking
//!
//! [`FileMeta`] has no lock of its own. `LockedFile` pairs it with a mutex so a
//! single file id can be shared between threads; every operation holds the
//! lock for its whole duration.

use crate::chunk::{FileId, FileMeta};
use crate::error::Result;
use crate::store::FixedChunkStore;
use parking_lot::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct LockedFile {
    id: FileId,
    meta: Mutex<FileMeta>,
}

impl LockedFile {
    pub fn new(id: FileId) -> Self {
        Self::with_meta(id, FileMeta::new())
    }

    pub fn with_meta(id: FileId, meta: FileMeta) -> Self {
        LockedFile {
            id,
            meta: Mutex::new(meta),
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    /// Direct access to the chunk map
    pub fn lock(&self) -> MutexGuard<'_, FileMeta> {
        self.meta.lock()
    }

    pub fn chunk_count(&self) -> u64 {
        self.meta.lock().chunk_count()
    }

    pub fn extend(&self, store: &FixedChunkStore, length: u64) -> Result<()> {
        store.extend(self.id, &mut self.meta.lock(), length)
    }

    pub fn shrink(&self, store: &FixedChunkStore, length: u64) -> Result<()> {
        store.shrink(self.id, &mut self.meta.lock(), length)
    }

    pub fn read(&self, store: &FixedChunkStore, position: u64, buf: &mut [u8]) -> Result<()> {
        store.read(self.id, &self.meta.lock(), position, buf)
    }

    pub fn write(&self, store: &FixedChunkStore, position: u64, buf: &[u8]) -> Result<()> {
        store.write(self.id, &self.meta.lock(), position, buf)
    }

    /// Extend to cover the range, then write it, under one lock acquisition
    pub fn write_extending(&self, store: &FixedChunkStore, position: u64, buf: &[u8]) -> Result<()> {
        let mut meta = self.meta.lock();
        store.extend(self.id, &mut meta, position.saturating_add(buf.len() as u64))?;
        store.write(self.id, &meta, position, buf)
    }

    pub fn into_inner(self) -> FileMeta {
        self.meta.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::TierStore;
    use std::sync::Arc;

    #[test]
    fn test_shared_file_appends() {
        let store = Arc::new(TierStore::open(StoreConfig::memory_only(6, 64)).unwrap());
        let file = Arc::new(LockedFile::new(11));

        // Each thread owns a disjoint 64-byte stripe of the same file
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let store = store.clone();
                let file = file.clone();
                std::thread::spawn(move || {
                    let data = vec![t; 64];
                    file.write_extending(store.files(), t as u64 * 64, &data)
                        .unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(file.chunk_count(), 8);
        for t in 0..8u8 {
            let mut out = vec![0u8; 64];
            file.read(store.files(), t as u64 * 64, &mut out).unwrap();
            assert!(out.iter().all(|&b| b == t));
        }

        let meta = Arc::try_unwrap(file).unwrap().into_inner();
        assert_eq!(meta.chunk_count(), 8);
    }

    #[test]
    fn test_shrink_through_lock() {
        let store = TierStore::open(StoreConfig::memory_only(4, 4)).unwrap();
        let file = LockedFile::new(2);

        file.extend(store.files(), 64).unwrap();
        assert_eq!(file.chunk_count(), 4);

        file.shrink(store.files(), 0).unwrap();
        assert_eq!(file.chunk_count(), 0);
        assert_eq!(store.stats().memory_free, 4);
    }
}
