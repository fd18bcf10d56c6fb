//! # Data Block
//!
//! The data region is a bump allocator over variable-length records. Its
//! first 16 bytes are an allocator header:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     write_watermark   absolute file offset of the next append
//! 4       4     live_bytes        sum of sizes of reachable records
//! 8       8     reserved          zero
//! ```
//!
//! Records are appended at the watermark and never moved. A same-size update
//! rewrites a record in place; any other update appends a replacement and
//! abandons the old bytes; a delete unlinks the record from its chain and
//! leaves the bytes behind. `live_bytes` tracks what is still reachable, so
//! `watermark - (data_offset + 16) - live_bytes` is exactly the garbage that
//! only [`DataBlock::reset`] (driven by a defrag) reclaims.
//!
//! All offsets handled here - chain heads from the index, record `next`
//! pointers, the watermark - are absolute file offsets. Every pointer is
//! validated before use: anything below the first record slot or past the
//! region's end is a corrupt record, not a crash.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DATA_BLOCK_HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::encoding::put_u32;
use crate::error::StoreError;
use crate::record::{record_size, DataRecord};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataBlockHeader {
    write_watermark: U32,
    live_bytes: U32,
    reserved: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<DataBlockHeader>() == DATA_BLOCK_HEADER_SIZE);

impl DataBlockHeader {
    /// Header for an empty data block starting at file offset `base`.
    pub fn new(base: u32) -> Self {
        Self {
            write_watermark: U32::new(base + DATA_BLOCK_HEADER_SIZE as u32),
            live_bytes: U32::new(0),
            reserved: [0u8; 8],
        }
    }

    pub fn write_watermark(&self) -> u32 {
        self.write_watermark.get()
    }

    pub fn live_bytes(&self) -> u32 {
        self.live_bytes.get()
    }

    fn set_write_watermark(&mut self, offset: u32) {
        self.write_watermark = U32::new(offset);
    }

    fn set_live_bytes(&mut self, bytes: u32) {
        self.live_bytes = U32::new(bytes);
    }
}

/// Outcome of walking a bucket chain for a key.
#[derive(Debug)]
pub enum ChainSearch<'a> {
    /// The key is on the chain.
    Found {
        record: DataRecord<'a>,
        /// Offset of the matching record.
        offset: u32,
        /// Offset of its predecessor, or 0 when the match is the chain head.
        prev: u32,
    },
    /// The chain ended without a match; `tail` is the last record walked,
    /// so a caller appending a new record can link it in.
    Miss { tail: u32 },
}

/// Owned counterpart of [`ChainSearch`] for mutation paths, which cannot
/// keep borrowed record views alive across writes.
#[derive(Debug, Clone, Copy)]
enum FindMeta {
    Found {
        offset: u32,
        prev: u32,
        next: u32,
        value_len: usize,
        size: u32,
    },
    Miss {
        tail: u32,
    },
}

/// View over the data region. `B` is `&[u8]` for lookups or `&mut [u8]`
/// for mutations. `base` is the region's absolute file offset.
#[derive(Debug)]
pub struct DataBlock<B> {
    base: u32,
    buf: B,
}

impl<B: AsRef<[u8]>> DataBlock<B> {
    pub fn new(base: u32, buf: B) -> Result<Self> {
        ensure!(
            buf.as_ref().len() > DATA_BLOCK_HEADER_SIZE,
            "data region of {} bytes leaves no room past its {}-byte header",
            buf.as_ref().len(),
            DATA_BLOCK_HEADER_SIZE
        );
        Ok(Self { base, buf })
    }

    /// First valid record offset.
    fn floor(&self) -> u32 {
        self.base + DATA_BLOCK_HEADER_SIZE as u32
    }

    /// One past the last valid byte.
    fn ceiling(&self) -> u32 {
        self.base + self.buf.as_ref().len() as u32
    }

    /// Decodes and validates the allocator header.
    pub fn header(&self) -> Result<DataBlockHeader> {
        let bytes = &self.buf.as_ref()[..DATA_BLOCK_HEADER_SIZE];
        let header = DataBlockHeader::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to parse the data block header: {:?}", e))?;
        let header = *header;

        ensure!(
            header.write_watermark() >= self.floor() && header.write_watermark() <= self.ceiling(),
            "write watermark {:#x} is outside the data region [{:#x}, {:#x}]",
            header.write_watermark(),
            self.floor(),
            self.ceiling()
        );
        ensure!(
            header.live_bytes() <= header.write_watermark() - self.floor(),
            "live byte count {} exceeds the {} bytes written so far",
            header.live_bytes(),
            header.write_watermark() - self.floor()
        );
        Ok(header)
    }

    /// Translates an absolute record offset into an index into the region,
    /// rejecting pointers outside `[floor, ceiling)`.
    fn rel(&self, offset: u32) -> Result<usize> {
        if offset < self.floor() {
            return Err(StoreError::CorruptRecord(format!(
                "record offset {:#x} points below the data region (first record slot is {:#x})",
                offset,
                self.floor()
            ))
            .into());
        }
        if offset >= self.ceiling() {
            return Err(StoreError::CorruptRecord(format!(
                "record offset {:#x} points past the data region end {:#x}",
                offset,
                self.ceiling()
            ))
            .into());
        }
        Ok((offset - self.base) as usize)
    }

    pub fn read_record(&self, offset: u32) -> Result<DataRecord<'_>> {
        let at = self.rel(offset)?;
        DataRecord::read_from(&self.buf.as_ref()[at..])
    }

    /// Walks the chain starting at `head`, comparing raw key bytes.
    pub fn find(&self, head: u32, key: &[u8]) -> Result<ChainSearch<'_>> {
        let mut offset = head;
        let mut prev = 0;
        loop {
            let record = self.read_record(offset)?;
            if record.key == key {
                return Ok(ChainSearch::Found {
                    record,
                    offset,
                    prev,
                });
            }
            if record.next == 0 {
                return Ok(ChainSearch::Miss { tail: offset });
            }
            prev = offset;
            offset = record.next;
        }
    }

    /// The value stored for `key` on the chain at `head`, if present.
    pub fn fetch(&self, head: u32, key: &[u8]) -> Result<Option<&[u8]>> {
        match self.find(head, key)? {
            ChainSearch::Found { record, .. } => Ok(Some(record.value)),
            ChainSearch::Miss { .. } => Ok(None),
        }
    }

    /// Copies every key-value pair on the chain at `head` into `out`.
    pub fn collect_into(&self, head: u32, out: &mut HashMap<String, Vec<u8>>) -> Result<()> {
        let mut offset = head;
        while offset != 0 {
            let record = self.read_record(offset)?;
            let key = std::str::from_utf8(record.key).map_err(|_| {
                StoreError::CorruptRecord(format!(
                    "record at offset {:#x} holds a non-UTF-8 key",
                    offset
                ))
            })?;
            out.insert(key.to_string(), record.value.to_vec());
            offset = record.next;
        }
        Ok(())
    }

    /// Bytes still available for appends.
    pub fn free_bytes(&self) -> Result<u32> {
        Ok(self.ceiling() - self.header()?.write_watermark())
    }

    /// Bytes consumed below the watermark, reachable or not.
    pub fn used_bytes(&self) -> Result<u32> {
        Ok(self.header()?.write_watermark() - self.floor())
    }

    fn find_meta(&self, head: u32, key: &[u8]) -> Result<FindMeta> {
        Ok(match self.find(head, key)? {
            ChainSearch::Found {
                record,
                offset,
                prev,
            } => FindMeta::Found {
                offset,
                prev,
                next: record.next,
                value_len: record.value.len(),
                size: record.size(),
            },
            ChainSearch::Miss { tail } => FindMeta::Miss { tail },
        })
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataBlock<B> {
    fn save_header(&mut self, header: &DataBlockHeader) -> Result<()> {
        self.buf.as_mut()[..DATA_BLOCK_HEADER_SIZE].copy_from_slice(header.as_bytes());
        Ok(())
    }

    /// Empties the block: zeroed header fields, watermark back at the first
    /// record slot. The abandoned record bytes are left in place; nothing
    /// points at them anymore.
    pub fn reset(&mut self) -> Result<()> {
        let base = self.base;
        self.save_header(&DataBlockHeader::new(base))
    }

    /// Appends a new record with no successor and returns its offset.
    pub fn save(&mut self, key: &[u8], value: &[u8]) -> Result<u32> {
        if key.is_empty() || value.is_empty() {
            return Err(StoreError::InvalidArgument(
                "key and value must be non-empty".to_string(),
            )
            .into());
        }
        if key.len() as u64 > MAX_KEY_SIZE as u64 {
            return Err(StoreError::InvalidArgument(format!(
                "key of {} bytes exceeds the {} limit",
                key.len(),
                MAX_KEY_SIZE
            ))
            .into());
        }
        if value.len() as u64 > MAX_VALUE_SIZE as u64 {
            return Err(StoreError::InvalidArgument(format!(
                "value of {} bytes exceeds the {} limit",
                value.len(),
                MAX_VALUE_SIZE
            ))
            .into());
        }

        let mut header = self.header()?;
        let size = record_size(key.len(), value.len());
        let offset = self.append_at_watermark(
            &mut header,
            &DataRecord {
                key,
                value,
                next: 0,
            },
        )?;
        header.set_live_bytes(header.live_bytes() + size);
        self.save_header(&header)?;
        Ok(offset)
    }

    /// Sets the value for `key` on the chain at `head` and returns the new
    /// chain head (unchanged unless the head record itself was replaced).
    pub fn update(&mut self, head: u32, key: &[u8], value: &[u8]) -> Result<u32> {
        match self.find_meta(head, key)? {
            // Not on the chain: append and link it behind the tail.
            FindMeta::Miss { tail } => {
                let offset = self.save(key, value)?;
                self.set_next(tail, offset)?;
                Ok(head)
            }
            FindMeta::Found {
                offset,
                prev,
                next,
                value_len,
                size,
            } => {
                if value_len == value.len() {
                    // Exact fit: rewrite in place, accounting unchanged.
                    self.write_record_at(offset, &DataRecord { key, value, next })?;
                    return Ok(head);
                }

                // Size changed: append a replacement carrying the old
                // record's successor, abandon the old bytes.
                let mut header = self.header()?;
                let new_offset =
                    self.append_at_watermark(&mut header, &DataRecord { key, value, next })?;
                let new_size = record_size(key.len(), value.len());
                header.set_live_bytes(header.live_bytes() + new_size - size);
                self.save_header(&header)?;

                if prev == 0 {
                    // The head moved; the caller must repoint the bucket.
                    Ok(new_offset)
                } else {
                    self.set_next(prev, new_offset)?;
                    Ok(head)
                }
            }
        }
    }

    /// Unlinks `key` from the chain at `head` and returns the new head
    /// (0 when the chain became empty).
    pub fn delete(&mut self, head: u32, key: &[u8]) -> Result<u32> {
        match self.find_meta(head, key)? {
            FindMeta::Miss { .. } => Err(StoreError::DeleteChainMiss {
                key: String::from_utf8_lossy(key).into_owned(),
            }
            .into()),
            FindMeta::Found {
                prev, next, size, ..
            } => {
                let new_head = if prev == 0 {
                    next
                } else {
                    self.set_next(prev, next)?;
                    head
                };

                let mut header = self.header()?;
                let live = header.live_bytes().checked_sub(size).ok_or_else(|| {
                    StoreError::CorruptRecord(format!(
                        "live byte count {} cannot drop by a {}-byte record",
                        header.live_bytes(),
                        size
                    ))
                })?;
                header.set_live_bytes(live);
                self.save_header(&header)?;
                Ok(new_head)
            }
        }
    }

    /// Writes `record` at the watermark, advances it, and returns the
    /// record's offset. The caller owns the live-byte accounting.
    fn append_at_watermark(
        &mut self,
        header: &mut DataBlockHeader,
        record: &DataRecord<'_>,
    ) -> Result<u32> {
        let size = record.size();
        let available = self.ceiling() - header.write_watermark();
        if size > available {
            return Err(StoreError::OutOfSpace {
                needed: size,
                available,
            }
            .into());
        }

        let offset = header.write_watermark();
        self.write_record_at(offset, record)?;
        header.set_write_watermark(offset + size);
        Ok(offset)
    }

    fn write_record_at(&mut self, offset: u32, record: &DataRecord<'_>) -> Result<()> {
        let at = self.rel(offset)?;
        record.write_to(&mut self.buf.as_mut()[at..])
    }

    /// Repoints the `next` field of the record at `offset`.
    fn set_next(&mut self, offset: u32, next: u32) -> Result<()> {
        let position = {
            let record = self.read_record(offset)?;
            self.rel(offset)? + 8 + record.key.len() + record.value.len()
        };
        put_u32(self.buf.as_mut(), position, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 96;

    fn empty_block(size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        DataBlock::new(BASE, &mut buf[..]).unwrap().reset().unwrap();
        buf
    }

    #[test]
    fn fresh_block_has_watermark_at_first_record_slot() {
        let mut buf = empty_block(512);
        let block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let header = block.header().unwrap();
        assert_eq!(header.write_watermark(), BASE + 16);
        assert_eq!(header.live_bytes(), 0);
        assert_eq!(block.used_bytes().unwrap(), 0);
        assert_eq!(block.free_bytes().unwrap(), 512 - 16);
    }

    #[test]
    fn save_appends_and_accounts() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();

        let first = block.save(b"one", b"1111").unwrap();
        assert_eq!(first, BASE + 16);
        let second = block.save(b"two", b"2222").unwrap();
        assert_eq!(second, first + record_size(3, 4));

        let header = block.header().unwrap();
        assert_eq!(header.write_watermark(), second + record_size(3, 4));
        assert_eq!(header.live_bytes(), 2 * record_size(3, 4));

        let record = block.read_record(first).unwrap();
        assert_eq!(record.key, b"one");
        assert_eq!(record.value, b"1111");
        assert_eq!(record.next, 0);
    }

    #[test]
    fn save_rejects_empty_key_or_value() {
        let mut buf = empty_block(256);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        for (key, value) in [(&b""[..], &b"v"[..]), (&b"k"[..], &b""[..])] {
            let err = block.save(key, value).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn exact_fit_append_succeeds_one_byte_over_fails() {
        // Room for the header plus exactly one 22-byte record.
        let mut buf = empty_block(16 + 22);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        block.save(b"key", b"val4444").unwrap();

        let err = block.save(b"k", b"v").unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::OutOfSpace { needed, available }) => {
                assert_eq!(*needed, 14);
                assert_eq!(*available, 0);
            }
            other => panic!("expected OutOfSpace, got {:?}", other),
        }
    }

    #[test]
    fn find_walks_chains_and_reports_predecessors() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();

        let head = block.save(b"head", b"h").unwrap();
        let mid = block.save(b"mid", b"m").unwrap();
        let tail = block.save(b"tail", b"t").unwrap();
        block.set_next(head, mid).unwrap();
        block.set_next(mid, tail).unwrap();

        match block.find(head, b"head").unwrap() {
            ChainSearch::Found { offset, prev, .. } => {
                assert_eq!(offset, head);
                assert_eq!(prev, 0);
            }
            other => panic!("expected Found, got {:?}", other),
        }
        match block.find(head, b"tail").unwrap() {
            ChainSearch::Found { offset, prev, .. } => {
                assert_eq!(offset, tail);
                assert_eq!(prev, mid);
            }
            other => panic!("expected Found, got {:?}", other),
        }
        match block.find(head, b"absent").unwrap() {
            ChainSearch::Miss { tail: last } => assert_eq!(last, tail),
            other => panic!("expected Miss, got {:?}", other),
        }
    }

    #[test]
    fn fetch_returns_value_or_none() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"k", b"value").unwrap();

        assert_eq!(block.fetch(head, b"k").unwrap(), Some(&b"value"[..]));
        assert_eq!(block.fetch(head, b"other").unwrap(), None);
    }

    #[test]
    fn update_same_size_rewrites_in_place() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"k", b"aaaa").unwrap();
        let watermark = block.header().unwrap().write_watermark();

        let new_head = block.update(head, b"k", b"bbbb").unwrap();
        assert_eq!(new_head, head);
        assert_eq!(block.header().unwrap().write_watermark(), watermark);
        assert_eq!(block.fetch(head, b"k").unwrap(), Some(&b"bbbb"[..]));
    }

    #[test]
    fn update_of_head_with_new_size_moves_the_head() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"k", b"short").unwrap();
        let live_before = block.header().unwrap().live_bytes();

        let new_head = block.update(head, b"k", b"a longer value").unwrap();
        assert_ne!(new_head, head);
        assert_eq!(block.fetch(new_head, b"k").unwrap(), Some(&b"a longer value"[..]));

        // Accounting moved from the old record to the new one.
        let expected = live_before - record_size(1, 5) + record_size(1, 14);
        assert_eq!(block.header().unwrap().live_bytes(), expected);
    }

    #[test]
    fn update_of_interior_record_keeps_the_head_and_relinks() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"first", b"1").unwrap();
        let second = block.save(b"second", b"2").unwrap();
        block.set_next(head, second).unwrap();

        let new_head = block.update(head, b"second", b"much larger").unwrap();
        assert_eq!(new_head, head);
        assert_eq!(
            block.fetch(head, b"second").unwrap(),
            Some(&b"much larger"[..])
        );
        // The old slot is abandoned; the chain skips to the replacement.
        let head_rec = block.read_record(head).unwrap();
        assert_ne!(head_rec.next, second);
    }

    #[test]
    fn update_miss_appends_and_links_behind_the_tail() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"first", b"1").unwrap();

        let new_head = block.update(head, b"second", b"2").unwrap();
        assert_eq!(new_head, head);
        assert_eq!(block.fetch(head, b"second").unwrap(), Some(&b"2"[..]));
        assert_eq!(block.fetch(head, b"first").unwrap(), Some(&b"1"[..]));
    }

    #[test]
    fn delete_of_head_returns_successor() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"a", b"1").unwrap();
        let second = block.save(b"b", b"2").unwrap();
        block.set_next(head, second).unwrap();

        let new_head = block.delete(head, b"a").unwrap();
        assert_eq!(new_head, second);
        assert_eq!(block.fetch(new_head, b"b").unwrap(), Some(&b"2"[..]));
    }

    #[test]
    fn delete_of_interior_record_relinks_the_predecessor() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"a", b"1").unwrap();
        let mid = block.save(b"b", b"2").unwrap();
        let tail = block.save(b"c", b"3").unwrap();
        block.set_next(head, mid).unwrap();
        block.set_next(mid, tail).unwrap();

        let new_head = block.delete(head, b"b").unwrap();
        assert_eq!(new_head, head);
        assert_eq!(block.fetch(head, b"b").unwrap(), None);
        assert_eq!(block.fetch(head, b"c").unwrap(), Some(&b"3"[..]));
        assert_eq!(block.read_record(head).unwrap().next, tail);
    }

    #[test]
    fn delete_decrements_live_bytes() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"a", b"1").unwrap();
        let live = block.header().unwrap().live_bytes();

        block.delete(head, b"a").unwrap();
        assert_eq!(
            block.header().unwrap().live_bytes(),
            live - record_size(1, 1)
        );
    }

    #[test]
    fn delete_miss_on_a_populated_chain_is_an_error() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"a", b"1").unwrap();

        let err = block.delete(head, b"ghost").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::DeleteChainMiss { .. })
        ));
    }

    #[test]
    fn pointers_outside_the_region_are_corrupt() {
        let mut buf = empty_block(512);
        let block = DataBlock::new(BASE, &mut buf[..]).unwrap();

        // Below the first record slot (inside a header) and past the end.
        for offset in [0, BASE, BASE + 15, BASE + 512, u32::MAX] {
            let err = block.read_record(offset).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::CorruptRecord(_))
            ));
        }
    }

    #[test]
    fn header_rejects_out_of_range_watermark() {
        let mut buf = empty_block(512);
        // Watermark pointing below the first record slot.
        buf[..4].copy_from_slice(&(BASE + 8).to_le_bytes());
        let block = DataBlock::new(BASE, &buf[..]).unwrap();
        assert!(block.header().is_err());

        let mut buf = empty_block(512);
        // Live bytes exceeding what was ever written.
        buf[4..8].copy_from_slice(&400u32.to_le_bytes());
        let block = DataBlock::new(BASE, &buf[..]).unwrap();
        assert!(block.header().is_err());
    }

    #[test]
    fn collect_gathers_a_whole_chain() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        let head = block.save(b"a", b"1").unwrap();
        block.update(head, b"b", b"2").unwrap();
        block.update(head, b"c", b"3").unwrap();

        let mut out = HashMap::new();
        block.collect_into(head, &mut out).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out["a"], b"1");
        assert_eq!(out["b"], b"2");
        assert_eq!(out["c"], b"3");
    }

    #[test]
    fn reset_rewinds_the_watermark_and_accounting() {
        let mut buf = empty_block(512);
        let mut block = DataBlock::new(BASE, &mut buf[..]).unwrap();
        block.save(b"a", b"1").unwrap();
        block.save(b"b", b"2").unwrap();

        block.reset().unwrap();
        let header = block.header().unwrap();
        assert_eq!(header.write_watermark(), BASE + 16);
        assert_eq!(header.live_bytes(), 0);
    }
}
