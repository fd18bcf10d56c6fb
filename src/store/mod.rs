//! # On-Disk Store Structures
//!
//! This module owns everything that touches the store file's layout:
//!
//! - `header`: the 32-byte self-describing file header
//! - `index`: the flat array of hash-bucket slots
//! - `data`: the record allocator and chain operations
//! - `mmap`: file creation/opening, memory mapping, and advisory lock guards
//!
//! The file is three regions, back to back, with no padding:
//!
//! ```text
//! offset 0                 32          32 + index_size      total_size
//! +------------------------+-----------+---------------------+
//! | header                 | index     | data                |
//! +------------------------+-----------+---------------------+
//! ```
//!
//! All offsets stored in the file - index slots, record `next` pointers, the
//! data block's write watermark - are absolute file offsets. Region slices
//! are carved out of the whole-file mapping with [`carve`] / [`carve_mut`]
//! after the header has been read and validated, so every region view is
//! bounds-checked against the header exactly once per operation.

pub mod data;
pub mod header;
pub mod index;
pub mod mmap;

use eyre::{ensure, Result};

use crate::config::HEADER_BLOCK_SIZE;
use header::HeaderBlock;

/// Splits the whole-file mapping into `(index, data)` region slices.
pub fn carve<'a>(block: &'a [u8], header: &HeaderBlock) -> Result<(&'a [u8], &'a [u8])> {
    check_block_len(block.len(), header)?;
    let index_end = (header.index_offset() + header.index_size()) as usize;
    let index = &block[header.index_offset() as usize..index_end];
    let data = &block[header.data_offset() as usize..(header.data_offset() + header.data_size()) as usize];
    Ok((index, data))
}

/// Splits the whole-file mapping into mutable `(index, data)` region slices.
pub fn carve_mut<'a>(
    block: &'a mut [u8],
    header: &HeaderBlock,
) -> Result<(&'a mut [u8], &'a mut [u8])> {
    check_block_len(block.len(), header)?;
    let (_, rest) = block.split_at_mut(header.index_offset() as usize);
    let (index, rest) = rest.split_at_mut(header.index_size() as usize);
    let data = &mut rest[..header.data_size() as usize];
    Ok((index, data))
}

fn check_block_len(len: usize, header: &HeaderBlock) -> Result<()> {
    ensure!(
        len == header.total_size() as usize,
        "mapping is {} bytes but the header declares {}",
        len,
        header.total_size()
    );
    ensure!(
        len >= HEADER_BLOCK_SIZE,
        "mapping of {} bytes cannot hold the {}-byte header",
        len,
        HEADER_BLOCK_SIZE
    );
    Ok(())
}
