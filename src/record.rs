//! # Data-Record Codec
//!
//! A data record is the variable-length unit stored in the data block. Every
//! record carries its key inline plus the offset of the next record sharing
//! its hash bucket, forming a singly-linked collision chain:
//!
//! ```text
//! +-----------+-----------+-----------+-------------+--------+
//! | key_size  | data_size | key       | value       | next   |
//! | (u32 LE)  | (u32 LE)  | key_size B| data_size B | (u32)  |
//! +-----------+-----------+-----------+-------------+--------+
//! ```
//!
//! `next` is an absolute file offset, 0 marking the end of the chain. Total
//! record size is `12 + key_size + data_size`.
//!
//! Decoding is zero-copy: [`DataRecord::read_from`] borrows key and value
//! straight out of the source slice (in practice, the store mapping).
//! Declared sizes are validated against the format limits before any field
//! is sliced, so a chain pointer landing in garbage fails cleanly instead of
//! chasing absurd lengths.

use eyre::{ensure, Result};

use crate::config::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::encoding::{Cursor, CursorMut};
use crate::error::StoreError;

/// Bytes a record occupies beyond its key and value: the two size fields
/// and the next pointer.
pub const RECORD_OVERHEAD: u32 = 12;

/// Size of the record storing `key_len` key bytes and `value_len` value bytes.
pub fn record_size(key_len: usize, value_len: usize) -> u32 {
    RECORD_OVERHEAD + key_len as u32 + value_len as u32
}

/// A decoded record borrowing its key and value from the source slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRecord<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub next: u32,
}

impl<'a> DataRecord<'a> {
    pub fn size(&self) -> u32 {
        record_size(self.key.len(), self.value.len())
    }

    /// Decodes the record starting at the front of `src`.
    ///
    /// `src` may extend past the record's end; trailing bytes are ignored.
    pub fn read_from(src: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(src);

        let key_size = cur.u32().map_err(|_| {
            StoreError::CorruptRecord(format!(
                "truncated record header: {} bytes available",
                src.len()
            ))
        })?;
        let value_size = cur.u32().map_err(|_| {
            StoreError::CorruptRecord(format!(
                "truncated record header: {} bytes available",
                src.len()
            ))
        })?;

        if key_size > MAX_KEY_SIZE {
            return Err(StoreError::CorruptRecord(format!(
                "declared key size {} exceeds the {} limit",
                key_size, MAX_KEY_SIZE
            ))
            .into());
        }
        if value_size > MAX_VALUE_SIZE {
            return Err(StoreError::CorruptRecord(format!(
                "declared value size {} exceeds the {} limit",
                value_size, MAX_VALUE_SIZE
            ))
            .into());
        }

        let body_len = key_size as usize + value_size as usize + 4;
        if src.len() - cur.position() < body_len {
            return Err(StoreError::CorruptRecord(format!(
                "record body of {} bytes is truncated: {} available",
                body_len,
                src.len() - cur.position()
            ))
            .into());
        }

        let key = cur.bytes(key_size as usize)?;
        let value = cur.bytes(value_size as usize)?;
        let next = cur.u32()?;

        Ok(Self { key, value, next })
    }

    /// Encodes the record into the front of `dst`.
    pub fn write_to(&self, dst: &mut [u8]) -> Result<()> {
        let size = self.size() as usize;
        ensure!(
            dst.len() >= size,
            "record of {} bytes does not fit in {} available",
            size,
            dst.len()
        );

        let mut cur = CursorMut::new(dst);
        cur.put_u32(self.key.len() as u32)?;
        cur.put_u32(self.value.len() as u32)?;
        cur.put_bytes(self.key)?;
        cur.put_bytes(self.value)?;
        cur.put_u32(self.next)?;
        Ok(())
    }
}
