//! # Config - tuning surface shared by the storage crates
//!
//! [`Options`] carries every knob the write path reads: block size, table
//! size limit, bloom filter false-positive rate and memtable size. The
//! compaction/leveling fields are not interpreted here; they are carried so
//! the level manager sitting on top of this core can read them from the same
//! struct.
//!
//! Loading options from files or the environment is the embedding
//! application's job. This crate only provides defaults and validation.
//!
//! ## Example
//!
//! ```rust
//! use config::Options;
//!
//! let opt = Options {
//!     block_size: 4 * 1024,
//!     ..Options::default()
//! };
//! opt.validate().unwrap();
//! ```

use thiserror::Error;

/// Default uncompressed block size (4 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;
/// Default table size limit (64 MiB).
pub const DEFAULT_SSTABLE_MAX_SIZE: u64 = 64 << 20;
/// Default memtable (arena) size (64 MiB).
pub const DEFAULT_MEMTABLE_SIZE: u64 = 64 << 20;
/// Default bloom filter false-positive rate (1%).
pub const DEFAULT_BLOOM_FALSE_POSITIVE: f64 = 0.01;

/// Tables are addressed with 32-bit offsets, so neither limit may reach 4 GiB.
const MAX_U32_SIZE: u64 = u32::MAX as u64;

/// Errors reported by [`Options::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("block_size must be > 0")]
    ZeroBlockSize,

    #[error("block_size {0} does not fit in a 32-bit table offset")]
    BlockSizeTooLarge(usize),

    #[error("sstable_max_size must be > 0")]
    ZeroTableSize,

    #[error("sstable_max_size {0} does not fit in a 32-bit table offset")]
    TableSizeTooLarge(u64),

    #[error("memtable_size must be > 0")]
    ZeroMemtableSize,

    #[error("bloom_false_positive must be in [0, 1), got {0}")]
    BloomRate(f64),
}

/// Storage options consumed by the memtable, table builder and engine glue.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Directory holding the WAL and table files (engine glue only).
    pub work_dir: std::path::PathBuf,
    /// Arena size for a fresh memtable; also the flush threshold.
    pub memtable_size: u64,
    /// Size estimate at which a table builder reports it is full.
    pub sstable_max_size: u64,
    /// Maximum uncompressed size of a single block inside a table.
    pub block_size: usize,
    /// Bloom filter false-positive probability. `0.0` disables the filter.
    pub bloom_false_positive: f64,

    // Passed through to the level manager.
    pub num_compactors: usize,
    pub base_level_size: u64,
    /// Expected size ratio between adjacent levels.
    pub level_size_multiplier: usize,
    pub table_size_multiplier: usize,
    pub base_table_size: u64,
    pub num_level_zero_tables: usize,
    pub max_level_num: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            work_dir: std::path::PathBuf::from("data"),
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            sstable_max_size: DEFAULT_SSTABLE_MAX_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_false_positive: DEFAULT_BLOOM_FALSE_POSITIVE,
            num_compactors: 1,
            base_level_size: 10 << 20,
            level_size_multiplier: 10,
            table_size_multiplier: 2,
            base_table_size: 2 << 20,
            num_level_zero_tables: 15,
            max_level_num: 7,
        }
    }
}

impl Options {
    /// Returns `true` when tables should carry a bloom filter.
    #[must_use]
    pub fn bloom_enabled(&self) -> bool {
        self.bloom_false_positive > 0.0
    }

    /// Checks the fields this core interprets. Pass-through compaction
    /// fields are left to the level manager.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.block_size as u64 >= MAX_U32_SIZE {
            return Err(ConfigError::BlockSizeTooLarge(self.block_size));
        }
        if self.sstable_max_size == 0 {
            return Err(ConfigError::ZeroTableSize);
        }
        if self.sstable_max_size >= MAX_U32_SIZE {
            return Err(ConfigError::TableSizeTooLarge(self.sstable_max_size));
        }
        if self.memtable_size == 0 {
            return Err(ConfigError::ZeroMemtableSize);
        }
        if !(0.0..1.0).contains(&self.bloom_false_positive) {
            return Err(ConfigError::BloomRate(self.bloom_false_positive));
        }
        Ok(())
    }
}
