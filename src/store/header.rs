//! # File Header Block
//!
//! The first 32 bytes of every store file describe the rest of it. The
//! header is the only self-describing part of the format: readers learn the
//! region offsets and sizes from it on every operation rather than trusting
//! any out-of-band configuration.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       4     version         (currently 123)
//! 4       4     total_size      exact byte size of the file
//! 8       8     modified_time   Unix seconds of last successful write
//! 16      4     index_offset    always 32
//! 20      4     index_size
//! 24      4     data_offset     index_offset + index_size
//! 28      4     data_size
//! ```
//!
//! All fields are little-endian. The struct uses zerocopy little-endian
//! field types so it can be read directly off the unaligned mapping.
//!
//! Reading validates the documented maxima and the three layout invariants
//! (`index_offset == 32`, `data_offset == index_offset + index_size`,
//! `data_offset + data_size == total_size`), so a header that passes
//! [`HeaderBlock::read`] is safe to carve regions from.

use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{ensure, Result};
use zerocopy::little_endian::{I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    Geometry, FORMAT_VERSION, HEADER_BLOCK_SIZE, INDEX_SLOT_SIZE, MAX_DATA_BLOCK_SIZE,
    MAX_INDEX_BLOCK_SIZE,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct HeaderBlock {
    version: U32,
    total_size: U32,
    modified_time: I64,
    index_offset: U32,
    index_size: U32,
    data_offset: U32,
    data_size: U32,
}

const _: () = assert!(std::mem::size_of::<HeaderBlock>() == HEADER_BLOCK_SIZE);

impl HeaderBlock {
    /// Header for a freshly created store with the given geometry.
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            version: U32::new(FORMAT_VERSION),
            total_size: U32::new(geometry.total_size()),
            modified_time: I64::new(unix_now()),
            index_offset: U32::new(geometry.index_offset()),
            index_size: U32::new(geometry.index_size()),
            data_offset: U32::new(geometry.data_offset()),
            data_size: U32::new(geometry.data_size()),
        }
    }

    /// Decodes and validates the header at the front of `bytes`.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= HEADER_BLOCK_SIZE,
            "buffer too small for the header block: {} < {}",
            bytes.len(),
            HEADER_BLOCK_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..HEADER_BLOCK_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse the header block: {:?}", e))?;
        let header = *header;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.version() == FORMAT_VERSION,
            "unsupported format version {} (expected {})",
            self.version(),
            FORMAT_VERSION
        );
        ensure!(
            self.index_size() <= MAX_INDEX_BLOCK_SIZE,
            "header declares an index block of {} bytes, above the {} limit",
            self.index_size(),
            MAX_INDEX_BLOCK_SIZE
        );
        ensure!(
            self.data_size() <= MAX_DATA_BLOCK_SIZE,
            "header declares a data block of {} bytes, above the {} limit",
            self.data_size(),
            MAX_DATA_BLOCK_SIZE
        );
        ensure!(
            self.index_size() % INDEX_SLOT_SIZE as u32 == 0,
            "index block size {} is not a multiple of the {}-byte slot width",
            self.index_size(),
            INDEX_SLOT_SIZE
        );
        ensure!(
            self.index_offset() == HEADER_BLOCK_SIZE as u32,
            "index block at offset {} must start right after the {}-byte header",
            self.index_offset(),
            HEADER_BLOCK_SIZE
        );
        ensure!(
            self.data_offset() == self.index_offset() + self.index_size(),
            "data block at offset {} must start right after the index block (offset {} + {} bytes)",
            self.data_offset(),
            self.index_offset(),
            self.index_size()
        );
        ensure!(
            self.data_offset() as u64 + self.data_size() as u64 == self.total_size() as u64,
            "data block (offset {}, {} bytes) must end exactly at the declared total size {}",
            self.data_offset(),
            self.data_size(),
            self.total_size()
        );
        Ok(())
    }

    /// Serializes the header into the front of `dst`.
    pub fn save(&self, dst: &mut [u8]) -> Result<()> {
        ensure!(
            dst.len() >= HEADER_BLOCK_SIZE,
            "buffer too small to save the header block: {} < {}",
            dst.len(),
            HEADER_BLOCK_SIZE
        );
        dst[..HEADER_BLOCK_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn total_size(&self) -> u32 {
        self.total_size.get()
    }

    pub fn modified_time(&self) -> i64 {
        self.modified_time.get()
    }

    pub fn set_modified_now(&mut self) {
        self.modified_time = I64::new(unix_now());
    }

    pub fn index_offset(&self) -> u32 {
        self.index_offset.get()
    }

    pub fn index_size(&self) -> u32 {
        self.index_size.get()
    }

    pub fn data_offset(&self) -> u32 {
        self.data_offset.get()
    }

    pub fn data_size(&self) -> u32 {
        self.data_size.get()
    }
}

/// Current time as Unix seconds. Clamps to 0 for clocks before the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
