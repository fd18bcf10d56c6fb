//! # Store Geometry and Format Limits
//!
//! This module centralizes the on-disk layout constants. Constants that
//! depend on each other are co-located and their relationships enforced with
//! compile-time assertions.
//!
//! ## Layout Dependency Graph
//!
//! ```text
//! HEADER_BLOCK_SIZE (32 bytes)
//!       |
//!       +-> index region starts at exactly this offset
//!
//! INDEX_SLOT_SIZE (4 bytes per bucket)
//!       |
//!       +-> index block size must be a multiple of it
//!           (bucket_count = index_size / INDEX_SLOT_SIZE)
//!
//! DATA_BLOCK_HEADER_SIZE (16 bytes)
//!       |
//!       +-> first record offset = data_offset + 16
//!           (write watermark never drops below this)
//!
//! MAX_VALUE_SIZE (128 MiB)
//!       |
//!       +-> must not exceed MAX_DATA_BLOCK_SIZE or a record could
//!           declare a value no data block can hold
//! ```
//!
//! ## Defaults
//!
//! A default store is 32 B + 4 MiB + 128 MiB, about 132 MiB total, giving
//! 1,048,576 hash buckets. The geometry is configurable per store file but
//! fixed once the file exists; the header records it and open-time
//! validation rejects files whose size disagrees.

use eyre::{ensure, Result};

/// Size of the fixed file header at offset 0.
pub const HEADER_BLOCK_SIZE: usize = 32;

/// Width of one index bucket slot (a little-endian u32 record offset).
pub const INDEX_SLOT_SIZE: usize = 4;

/// Size of the allocator header at the start of the data region.
pub const DATA_BLOCK_HEADER_SIZE: usize = 16;

/// On-disk format version stamped into every header.
pub const FORMAT_VERSION: u32 = 123;

/// Default index region size: 4 MiB, one million-odd buckets.
pub const DEFAULT_INDEX_BLOCK_SIZE: u32 = 4 * 1024 * 1024;

/// Default data region size: 128 MiB.
pub const DEFAULT_DATA_BLOCK_SIZE: u32 = 128 * 1024 * 1024;

/// Largest index region a header may declare.
pub const MAX_INDEX_BLOCK_SIZE: u32 = 128 * 1024 * 1024;

/// Largest data region a header may declare.
pub const MAX_DATA_BLOCK_SIZE: u32 = 1024 * 1024 * 1024;

/// Largest key a record may carry.
pub const MAX_KEY_SIZE: u32 = 64 * 1024;

/// Largest value a record may carry.
pub const MAX_VALUE_SIZE: u32 = 128 * 1024 * 1024;

const _: () = assert!(
    DEFAULT_INDEX_BLOCK_SIZE % INDEX_SLOT_SIZE as u32 == 0,
    "index block must be a whole number of bucket slots"
);
const _: () = assert!(DEFAULT_INDEX_BLOCK_SIZE <= MAX_INDEX_BLOCK_SIZE);
const _: () = assert!(DEFAULT_DATA_BLOCK_SIZE <= MAX_DATA_BLOCK_SIZE);
const _: () = assert!(
    MAX_VALUE_SIZE <= MAX_DATA_BLOCK_SIZE,
    "a maximal value must be storable in a maximal data block"
);

/// Region sizes for one store file. Fixed for the file's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    index_size: u32,
    data_size: u32,
}

impl Geometry {
    pub fn new(index_size: u32, data_size: u32) -> Result<Self> {
        ensure!(
            index_size as usize >= INDEX_SLOT_SIZE,
            "index block of {} bytes cannot hold a single bucket slot",
            index_size
        );
        ensure!(
            index_size % INDEX_SLOT_SIZE as u32 == 0,
            "index block size {} is not a multiple of the {}-byte slot width",
            index_size,
            INDEX_SLOT_SIZE
        );
        ensure!(
            index_size <= MAX_INDEX_BLOCK_SIZE,
            "index block size {} exceeds the {} limit",
            index_size,
            MAX_INDEX_BLOCK_SIZE
        );
        ensure!(
            data_size as usize > DATA_BLOCK_HEADER_SIZE,
            "data block of {} bytes leaves no room past its {}-byte header",
            data_size,
            DATA_BLOCK_HEADER_SIZE
        );
        ensure!(
            data_size <= MAX_DATA_BLOCK_SIZE,
            "data block size {} exceeds the {} limit",
            data_size,
            MAX_DATA_BLOCK_SIZE
        );
        Ok(Self {
            index_size,
            data_size,
        })
    }

    pub fn index_size(&self) -> u32 {
        self.index_size
    }

    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    pub fn bucket_count(&self) -> u32 {
        self.index_size / INDEX_SLOT_SIZE as u32
    }

    /// File offset of the index region. Always immediately after the header.
    pub fn index_offset(&self) -> u32 {
        HEADER_BLOCK_SIZE as u32
    }

    /// File offset of the data region.
    pub fn data_offset(&self) -> u32 {
        self.index_offset() + self.index_size
    }

    /// Exact byte size of the store file.
    pub fn total_size(&self) -> u32 {
        HEADER_BLOCK_SIZE as u32 + self.index_size + self.data_size
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            index_size: DEFAULT_INDEX_BLOCK_SIZE,
            data_size: DEFAULT_DATA_BLOCK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_matches_documented_sizes() {
        let geo = Geometry::default();
        assert_eq!(geo.index_size(), 4 * 1024 * 1024);
        assert_eq!(geo.data_size(), 128 * 1024 * 1024);
        assert_eq!(geo.bucket_count(), 1_048_576);
        assert_eq!(geo.index_offset(), 32);
        assert_eq!(geo.data_offset(), 32 + 4 * 1024 * 1024);
        assert_eq!(geo.total_size(), 32 + 4 * 1024 * 1024 + 128 * 1024 * 1024);
    }

    #[test]
    fn geometry_rejects_unaligned_index_size() {
        assert!(Geometry::new(4094, 1024).is_err());
    }

    #[test]
    fn geometry_rejects_oversized_regions() {
        assert!(Geometry::new(MAX_INDEX_BLOCK_SIZE + 4, 1024).is_err());
        assert!(Geometry::new(4096, MAX_DATA_BLOCK_SIZE + 1).is_err());
    }

    #[test]
    fn geometry_rejects_degenerate_data_block() {
        assert!(Geometry::new(4096, DATA_BLOCK_HEADER_SIZE as u32).is_err());
    }

    #[test]
    fn custom_geometry_offsets_are_contiguous() {
        let geo = Geometry::new(4096, 65536).unwrap();
        assert_eq!(geo.data_offset(), geo.index_offset() + geo.index_size());
        assert_eq!(
            geo.total_size(),
            geo.data_offset() + geo.data_size()
        );
    }
}
