//! # Bucket Index Block
//!
//! The index is a flat array of 4-byte little-endian slots over the index
//! region. Slot `i` holds either 0 (empty) or the absolute file offset of
//! the head of the record chain for every key hashing to bucket `i`.
//!
//! The bucket for a key is `hash(key) % bucket_count`. The default hash is
//! 32-bit FNV-1a over the key's UTF-8 bytes; the function is injected as a
//! policy so collision behavior can be exercised deterministically (a
//! constant hash funnels every key into one bucket). Distinct keys sharing
//! a bucket coexist on the chain - the data block compares raw key bytes
//! while walking, so the index never needs to disambiguate collisions.

use eyre::{ensure, Result};

use crate::config::INDEX_SLOT_SIZE;
use crate::encoding::{get_u32, put_u32};

/// Hash policy: maps a key to a 32-bit bucket selector.
pub type HashFn = fn(&str) -> u32;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the key's UTF-8 bytes. The default hash policy.
pub fn fnv1a_32(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// View over the index region. `B` is `&[u8]` for lookups or `&mut [u8]`
/// when slots are being written.
#[derive(Debug)]
pub struct IndexBlock<B> {
    buf: B,
    hash: HashFn,
}

impl<B: AsRef<[u8]>> IndexBlock<B> {
    pub fn new(buf: B, hash: HashFn) -> Result<Self> {
        let len = buf.as_ref().len();
        ensure!(
            len >= INDEX_SLOT_SIZE && len % INDEX_SLOT_SIZE == 0,
            "index region of {} bytes is not a whole number of {}-byte slots",
            len,
            INDEX_SLOT_SIZE
        );
        Ok(Self { buf, hash })
    }

    pub fn bucket_count(&self) -> u32 {
        (self.buf.as_ref().len() / INDEX_SLOT_SIZE) as u32
    }

    pub fn bucket_of(&self, key: &str) -> u32 {
        (self.hash)(key) % self.bucket_count()
    }

    /// Chain-head offset for `key`'s bucket; 0 means the bucket is empty.
    pub fn get(&self, key: &str) -> Result<u32> {
        get_u32(self.buf.as_ref(), self.slot_position(self.bucket_of(key)))
    }

    /// Every non-zero bucket offset, once, in bucket order.
    pub fn enumerate_non_empty(&self) -> Vec<u32> {
        self.buf
            .as_ref()
            .chunks_exact(INDEX_SLOT_SIZE)
            .filter_map(|slot| {
                let offset = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                (offset != 0).then_some(offset)
            })
            .collect()
    }

    fn slot_position(&self, bucket: u32) -> usize {
        bucket as usize * INDEX_SLOT_SIZE
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexBlock<B> {
    /// Points `key`'s bucket at `offset`. 0 clears the slot.
    pub fn set(&mut self, key: &str, offset: u32) -> Result<()> {
        let position = self.slot_position(self.bucket_of(key));
        put_u32(self.buf.as_mut(), position, offset)
    }

    /// Empties every bucket.
    pub fn reset(&mut self) {
        self.buf.as_mut().fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn get_returns_zero_for_untouched_bucket() {
        let buf = vec![0u8; 64];
        let index = IndexBlock::new(&buf[..], fnv1a_32).unwrap();
        assert_eq!(index.bucket_count(), 16);
        assert_eq!(index.get("anything").unwrap(), 0);
    }

    #[test]
    fn set_then_get_roundtrips_through_the_slot() {
        let mut buf = vec![0u8; 64];
        let mut index = IndexBlock::new(&mut buf[..], fnv1a_32).unwrap();
        index.set("flag", 0x2040).unwrap();
        assert_eq!(index.get("flag").unwrap(), 0x2040);

        index.set("flag", 0).unwrap();
        assert_eq!(index.get("flag").unwrap(), 0);
    }

    #[test]
    fn constant_hash_funnels_all_keys_into_one_bucket() {
        let mut buf = vec![0u8; 64];
        let mut index = IndexBlock::new(&mut buf[..], |_| 32).unwrap();
        assert_eq!(index.bucket_of("a"), 32 % 16);
        assert_eq!(index.bucket_of("b"), index.bucket_of("a"));

        index.set("a", 77).unwrap();
        assert_eq!(index.get("b").unwrap(), 77);
    }

    #[test]
    fn enumerate_yields_non_empty_slots_in_bucket_order() {
        let mut buf = vec![0u8; 64];
        put_u32(&mut buf, 3 * INDEX_SLOT_SIZE, 300).unwrap();
        put_u32(&mut buf, 0, 100).unwrap();
        put_u32(&mut buf, 9 * INDEX_SLOT_SIZE, 900).unwrap();

        let index = IndexBlock::new(&buf[..], fnv1a_32).unwrap();
        assert_eq!(index.enumerate_non_empty(), vec![100, 300, 900]);
    }

    #[test]
    fn reset_empties_every_bucket() {
        let mut buf = vec![0u8; 64];
        let mut index = IndexBlock::new(&mut buf[..], fnv1a_32).unwrap();
        index.set("a", 1).unwrap();
        index.set("b", 2).unwrap();
        index.reset();
        assert!(index.enumerate_non_empty().is_empty());
    }

    #[test]
    fn new_rejects_ragged_region() {
        assert!(IndexBlock::new(&[0u8; 6][..], fnv1a_32).is_err());
        assert!(IndexBlock::new(&[0u8; 0][..], fnv1a_32).is_err());
    }
}
