//! Store configuration
//!
//! Fixed at construction and read-only afterwards. Loaded from TOML or built
//! programmatically; any field left out takes the runtime default:
//!
//! | field               | default            |
//! |---------------------|--------------------|
//! | `chunk_bits`        | 24 (16 MiB chunks) |
//! | `max_memory_chunks` | 16 (256 MiB pool)  |
//! | `max_spill_chunks`  | 64 (1 GiB device)  |
//! | `max_file_chunks`   | memory + spill     |
//! | `use_memory`        | true               |
//! | `use_spillover`     | false              |

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

pub const DEFAULT_CHUNK_BITS: u32 = 24;
pub const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_SPILL_BYTES: u64 = 1024 * 1024 * 1024;

/// Upper bound on chunks per tier (keeps id arithmetic far from overflow)
const MAX_TIER_CHUNKS: u64 = 1 << 32;

/// What happens to a spillover id when its chunk is freed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpillReclaim {
    /// Push the id back onto the spillover free list
    #[default]
    Recycle,
    /// Clear the descriptor but never reuse the id
    Leak,
}

/// Process-wide chunk store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// log2 of the chunk size
    #[validate(range(min = 2, max = 30))]
    pub chunk_bits: u32,

    /// Chunks in the memory pool
    #[validate(range(max = 4294967296u64))]
    pub max_memory_chunks: u64,

    /// Chunks on the spillover device
    #[validate(range(max = 4294967296u64))]
    pub max_spill_chunks: u64,

    /// Per-file chunk cap (`None` = memory + spill)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_chunks: Option<u64>,

    pub use_memory: bool,
    pub use_spillover: bool,

    /// Selecting the container tier is accepted but every allocation against
    /// it fails
    pub use_container: bool,

    pub spill_reclaim: SpillReclaim,

    /// Back the memory pool with a shared file mapping (e.g. under /dev/shm)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_path: Option<PathBuf>,

    /// Spillover file or block device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spill_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            chunk_bits: DEFAULT_CHUNK_BITS,
            max_memory_chunks: DEFAULT_MEMORY_BYTES >> DEFAULT_CHUNK_BITS,
            max_spill_chunks: DEFAULT_SPILL_BYTES >> DEFAULT_CHUNK_BITS,
            max_file_chunks: None,
            use_memory: true,
            use_spillover: false,
            use_container: false,
            spill_reclaim: SpillReclaim::Recycle,
            memory_path: None,
            spill_path: None,
        }
    }
}

impl StoreConfig {
    /// Memory-only configuration with the given geometry
    pub fn memory_only(chunk_bits: u32, max_memory_chunks: u64) -> Self {
        StoreConfig {
            chunk_bits,
            max_memory_chunks,
            max_spill_chunks: 0,
            ..Default::default()
        }
    }

    pub fn with_spillover<P: Into<PathBuf>>(mut self, path: P, max_spill_chunks: u64) -> Self {
        self.use_spillover = true;
        self.max_spill_chunks = max_spill_chunks;
        self.spill_path = Some(path.into());
        self
    }

    pub fn with_memory_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.memory_path = Some(path.into());
        self
    }

    pub fn with_max_file_chunks(mut self, limit: u64) -> Self {
        self.max_file_chunks = Some(limit);
        self
    }

    pub fn with_spill_reclaim(mut self, policy: SpillReclaim) -> Self {
        self.spill_reclaim = policy;
        self
    }

    pub fn with_tiers(mut self, memory: bool, spillover: bool, container: bool) -> Self {
        self.use_memory = memory;
        self.use_spillover = spillover;
        self.use_container = container;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::InvalidConfig(e.to_string()))
    }

    /// Field ranges plus cross-field checks
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;

        if self.max_file_chunks == Some(0) {
            return Err(StoreError::InvalidConfig(
                "max_file_chunks must be at least 1".into(),
            ));
        }

        if self.use_spillover && self.max_spill_chunks > 0 && self.spill_path.is_none() {
            return Err(StoreError::InvalidConfig(
                "use_spillover requires spill_path".into(),
            ));
        }

        let geometry = self.geometry();
        let memory_bytes = geometry
            .max_memory_chunks
            .checked_mul(geometry.size)
            .ok_or_else(|| StoreError::InvalidConfig("memory pool size overflows".into()))?;
        if usize::try_from(memory_bytes).is_err() {
            return Err(StoreError::InvalidConfig(
                "memory pool does not fit in the address space".into(),
            ));
        }
        geometry
            .max_spill_chunks
            .checked_mul(geometry.size)
            .ok_or_else(|| StoreError::InvalidConfig("spillover size overflows".into()))?;

        Ok(())
    }

    /// Effective per-file chunk cap
    pub fn file_chunk_limit(&self) -> u64 {
        self.max_file_chunks
            .unwrap_or(self.max_memory_chunks + self.max_spill_chunks)
    }

    pub fn geometry(&self) -> ChunkGeometry {
        ChunkGeometry::new(self.chunk_bits, self.max_memory_chunks, self.max_spill_chunks)
    }
}

/// Chunk size, mask and the tier id ranges derived from a [`StoreConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub bits: u32,
    pub size: u64,
    pub mask: u64,
    pub max_memory_chunks: u64,
    pub max_spill_chunks: u64,
}

impl ChunkGeometry {
    /// `bits` above 63 is clamped; [`StoreConfig`] validation keeps it in 2..=30
    pub fn new(bits: u32, max_memory_chunks: u64, max_spill_chunks: u64) -> Self {
        let bits = bits.min(63);
        let size = 1u64 << bits;
        ChunkGeometry {
            bits,
            size,
            mask: size - 1,
            max_memory_chunks: max_memory_chunks.min(MAX_TIER_CHUNKS),
            max_spill_chunks: max_spill_chunks.min(MAX_TIER_CHUNKS),
        }
    }

    /// Logical chunk holding byte `pos`
    #[inline]
    pub fn chunk_index(&self, pos: u64) -> u64 {
        pos >> self.bits
    }

    /// Offset of byte `pos` within its chunk
    #[inline]
    pub fn chunk_offset(&self, pos: u64) -> u64 {
        pos & self.mask
    }

    /// Bytes covered by `chunks` chunks
    #[inline]
    pub fn capacity(&self, chunks: u64) -> u64 {
        chunks << self.bits
    }

    /// First physical id on the spillover device
    #[inline]
    pub fn spill_base(&self) -> u64 {
        self.max_memory_chunks
    }

    pub fn is_memory_id(&self, id: u64) -> bool {
        id < self.max_memory_chunks
    }

    pub fn is_spill_id(&self, id: u64) -> bool {
        id >= self.max_memory_chunks && id - self.max_memory_chunks < self.max_spill_chunks
    }

    pub fn memory_bytes(&self) -> u64 {
        self.max_memory_chunks.saturating_mul(self.size)
    }

    pub fn spill_bytes(&self) -> u64 {
        self.max_spill_chunks.saturating_mul(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_definitions() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_bits, 24);
        assert_eq!(config.max_memory_chunks, 16);
        assert_eq!(config.max_spill_chunks, 64);
        assert_eq!(config.file_chunk_limit(), 80);
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_geometry() {
        let g = ChunkGeometry::new(2, 2, 2);
        assert_eq!(g.size, 4);
        assert_eq!(g.mask, 3);
        assert_eq!(g.chunk_index(9), 2);
        assert_eq!(g.chunk_offset(9), 1);
        assert_eq!(g.capacity(3), 12);
        assert!(g.is_memory_id(1));
        assert!(!g.is_memory_id(2));
        assert!(g.is_spill_id(2));
        assert!(g.is_spill_id(3));
        assert!(!g.is_spill_id(4));
    }

    #[test]
    fn test_geometry_clamps_shift() {
        let g = ChunkGeometry::new(64, 2, 2);
        assert_eq!(g.bits, 63);
        assert_eq!(g.size, 1 << 63);
        assert_eq!(g.memory_bytes(), u64::MAX);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StoreConfig::from_toml_str(
            r#"
            chunk_bits = 12
            max_memory_chunks = 8
            use_spillover = true
            max_spill_chunks = 4
            spill_path = "/tmp/tierfs.spill"
            spill_reclaim = "leak"
            "#,
        )
        .unwrap();

        assert_eq!(config.geometry().size, 4096);
        assert_eq!(config.max_memory_chunks, 8);
        assert_eq!(config.spill_reclaim, SpillReclaim::Leak);
        assert_eq!(config.file_chunk_limit(), 12);
        assert!(config.use_memory);
    }

    #[test]
    fn test_rejects_bad_chunk_bits() {
        let err = StoreConfig::from_toml_str("chunk_bits = 40").unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = StoreConfig::from_toml_str("chunk_size = 4096").unwrap_err();
        assert!(matches!(err, StoreError::ConfigParse(_)));
    }

    #[test]
    fn test_spillover_requires_path() {
        let config = StoreConfig::memory_only(12, 4).with_tiers(true, true, false);
        let config = StoreConfig {
            max_spill_chunks: 4,
            ..config
        };
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_zero_file_limit_rejected() {
        let config = StoreConfig::memory_only(12, 4).with_max_file_chunks(0);
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = StoreConfig::memory_only(16, 32).with_max_file_chunks(8);
        let text = config.to_toml_string().unwrap();
        let parsed = StoreConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
