//! # Store Handles
//!
//! Two handles share the store file:
//!
//! - [`Manager`] - the writer. Creates the file on first open (or validates
//!   an existing one), maps it read-write, and mutates it under the
//!   exclusive advisory lock. A process runs at most one manager per store;
//!   the handle serializes its own calls internally, so it can be shared
//!   across threads.
//! - [`Reader`] - a consumer. Maps the file read-only and looks keys up
//!   under the shared advisory lock. Any number of reader processes may
//!   coexist with the writer.
//!
//! Every operation re-reads the 32-byte header under its lock, walks the
//! index and data regions directly against the mapping, and copies results
//! out before the lock drops. No lock is ever held across an API boundary.
//!
//! ## Lock Choreography
//!
//! | Operation | Lock |
//! |---|---|
//! | `get`, `map`, `stats` | shared |
//! | `set`, `delete` | exclusive |
//! | `defrag` | shared (snapshot), then exclusive (rebuild) |
//! | `close` | shared (so the unmap cannot race a cross-process write) |
//!
//! Lock acquisition blocks indefinitely behind an incompatible holder;
//! callers needing a deadline must enforce one externally. When two writers
//! race for the exclusive lock, the OS picks the order - only mutual
//! exclusion is guaranteed.

use std::fs::File;
use std::path::Path;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use memmap2::{Mmap, MmapMut};
use parking_lot::Mutex;

use crate::config::Geometry;
use crate::error::StoreError;
use crate::store::data::DataBlock;
use crate::store::header::HeaderBlock;
use crate::store::index::{fnv1a_32, IndexBlock};
use crate::store::mmap::{create_rw, open_ro, open_rw, FileLock};
use crate::store::{carve, carve_mut};

pub use crate::store::index::HashFn;

/// Data-block occupancy and the last-write stamp, captured under the
/// shared lock. A snapshot: the store may move on as soon as the call
/// returns, so never cache `modified_time` across operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Bytes of records still reachable through the index.
    pub live_bytes: u32,
    /// Bytes consumed below the write watermark, reachable or not. The
    /// difference from `live_bytes` is reclaimable only by a defrag.
    pub used_bytes: u32,
    /// Bytes still available for appends.
    pub free_bytes: u32,
    /// Unix seconds of the last successful write.
    pub modified_time: i64,
}

/// Configures and opens store handles.
///
/// The geometry applies only when a [`Manager`] creates a missing file (an
/// existing file is validated against it; readers learn the layout from the
/// file header). The hash policy must agree between every handle on the
/// same store - it is a configuration point precisely so tests can force
/// collisions deterministically.
#[derive(Debug, Clone)]
pub struct Builder {
    geometry: Geometry,
    hash: HashFn,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            geometry: Geometry::default(),
            hash: fnv1a_32,
        }
    }

    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn hash_fn(mut self, hash: HashFn) -> Self {
        self.hash = hash;
        self
    }

    pub fn open_manager<P: AsRef<Path>>(self, path: P) -> Result<Manager> {
        Manager::open_with(path.as_ref(), self)
    }

    pub fn open_reader<P: AsRef<Path>>(self, path: P) -> Result<Reader> {
        Reader::open_with(path.as_ref(), self)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// The writer handle.
#[derive(Debug)]
pub struct Manager {
    file: File,
    block: Mutex<MmapMut>,
    hash: HashFn,
}

impl Manager {
    /// Opens the store at `path` with the default geometry and hash,
    /// creating the file if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Builder::new().open_manager(path)
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    fn open_with(path: &Path, builder: Builder) -> Result<Self> {
        let Builder { geometry, hash } = builder;

        let (file, block) = if path.exists() {
            let (file, block) = open_rw(path, geometry.total_size())?;
            let _lock = FileLock::exclusive(&file)?;
            HeaderBlock::read(&block[..])
                .wrap_err_with(|| format!("invalid store file '{}'", path.display()))?;
            drop(_lock);
            (file, block)
        } else {
            let (file, mut block) = create_rw(path, geometry.total_size())?;
            let _lock = FileLock::exclusive(&file)?;

            let header = HeaderBlock::new(&geometry);
            header.save(&mut block[..])?;
            let (_, data_region) = carve_mut(&mut block[..], &header)?;
            DataBlock::new(geometry.data_offset(), data_region)?.reset()?;
            drop(_lock);
            (file, block)
        };

        Ok(Self {
            file,
            block: Mutex::new(block),
            hash,
        })
    }

    /// Value stored for `key`. Shared-locked, identical to a reader's get.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let block = self.block.lock();
        let _lock = FileLock::shared(&self.file)?;
        read_value(&block[..], self.hash, key)
    }

    /// Stores `value` under `key`, overwriting any previous value.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut block = self.block.lock();
        let _lock = FileLock::exclusive(&self.file)?;
        write_pair(&mut block[..], self.hash, key, value)
    }

    /// Removes `key`. An empty index slot is a silent success so cleanup
    /// can be idempotent; a populated chain that lacks the key is a
    /// [`StoreError::DeleteChainMiss`], since the index claims the key
    /// should have been there.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut block = self.block.lock();
        let _lock = FileLock::exclusive(&self.file)?;
        delete_key(&mut block[..], self.hash, key)
    }

    /// Copies every live key-value pair out of the store. The snapshot is
    /// independent: it stays valid after the lock is released.
    pub fn map(&self) -> Result<HashMap<String, Vec<u8>>> {
        let block = self.block.lock();
        let _lock = FileLock::shared(&self.file)?;
        snapshot(&block[..], self.hash)
    }

    /// Rewrites the store from its live pairs, reclaiming abandoned bytes.
    ///
    /// Snapshots under the shared lock, then rebuilds - index and data
    /// reset, every pair re-inserted through the normal write path - under
    /// the exclusive lock. Afterwards `used_bytes == live_bytes`.
    pub fn defrag(&self) -> Result<()> {
        let mut block = self.block.lock();

        let pairs = {
            let _lock = FileLock::shared(&self.file)?;
            snapshot(&block[..], self.hash)?
        };

        let _lock = FileLock::exclusive(&self.file)?;
        let header = HeaderBlock::read(&block[..])?;
        {
            let (index_region, data_region) = carve_mut(&mut block[..], &header)?;
            IndexBlock::new(index_region, self.hash)?.reset();
            DataBlock::new(header.data_offset(), data_region)?.reset()?;
        }
        for (key, value) in &pairs {
            write_pair(&mut block[..], self.hash, key, value)?;
        }
        Ok(())
    }

    /// Occupancy counters and the last-write stamp.
    pub fn stats(&self) -> Result<StoreStats> {
        let block = self.block.lock();
        let _lock = FileLock::shared(&self.file)?;
        read_stats(&block[..])
    }

    /// Unmaps and closes the store. Consuming the handle makes a close/read
    /// race within this process unrepresentable; the shared lock keeps the
    /// unmap ordered against writers in other processes.
    pub fn close(self) -> Result<()> {
        let Manager { file, block, .. } = self;
        let _lock = FileLock::shared(&file)?;
        drop(block);
        Ok(())
    }
}

/// A read-only consumer handle.
#[derive(Debug)]
pub struct Reader {
    file: File,
    block: Mmap,
    hash: HashFn,
}

impl Reader {
    /// Opens an existing store at `path` with the default hash.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Builder::new().open_reader(path)
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    fn open_with(path: &Path, builder: Builder) -> Result<Self> {
        let (file, block) = open_ro(path)?;
        {
            let _lock = FileLock::shared(&file)?;
            let header = HeaderBlock::read(&block[..])
                .wrap_err_with(|| format!("invalid store file '{}'", path.display()))?;
            if block.len() as u64 != header.total_size() as u64 {
                return Err(StoreError::SizeMismatch {
                    expected: header.total_size() as u64,
                    actual: block.len() as u64,
                })
                .wrap_err_with(|| format!("refusing to open '{}'", path.display()));
            }
        }

        Ok(Self {
            file,
            block,
            hash: builder.hash,
        })
    }

    /// Value stored for `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let _lock = FileLock::shared(&self.file)?;
        read_value(&self.block[..], self.hash, key)
    }

    /// Occupancy counters and the last-write stamp.
    pub fn stats(&self) -> Result<StoreStats> {
        let _lock = FileLock::shared(&self.file)?;
        read_stats(&self.block[..])
    }

    /// Unmaps and closes the store.
    pub fn close(self) -> Result<()> {
        let Reader { file, block, .. } = self;
        let _lock = FileLock::shared(&file)?;
        drop(block);
        Ok(())
    }
}

fn read_value(block: &[u8], hash: HashFn, key: &str) -> Result<Vec<u8>> {
    let header = HeaderBlock::read(block)?;
    let (index_region, data_region) = carve(block, &header)?;

    let index = IndexBlock::new(index_region, hash)?;
    let head = index.get(key)?;
    if head == 0 {
        return Err(StoreError::not_in_index(key).into());
    }

    let data = DataBlock::new(header.data_offset(), data_region)?;
    match data.fetch(head, key.as_bytes())? {
        Some(value) => Ok(value.to_vec()),
        None => Err(StoreError::not_in_chain(key).into()),
    }
}

fn write_pair(block: &mut [u8], hash: HashFn, key: &str, value: &[u8]) -> Result<()> {
    let mut header = HeaderBlock::read(block)?;
    {
        let (index_region, data_region) = carve_mut(block, &header)?;
        let mut index = IndexBlock::new(index_region, hash)?;
        let mut data = DataBlock::new(header.data_offset(), data_region)?;

        let head = index.get(key)?;
        let new_head = if head == 0 {
            data.save(key.as_bytes(), value)?
        } else {
            data.update(head, key.as_bytes(), value)?
        };
        if new_head != head {
            index.set(key, new_head)?;
        }
    }
    header.set_modified_now();
    header.save(block)
}

fn delete_key(block: &mut [u8], hash: HashFn, key: &str) -> Result<()> {
    let mut header = HeaderBlock::read(block)?;
    let removed = {
        let (index_region, data_region) = carve_mut(block, &header)?;
        let mut index = IndexBlock::new(index_region, hash)?;

        let head = index.get(key)?;
        if head == 0 {
            // Empty slot: nothing to delete, and that is fine.
            false
        } else {
            let mut data = DataBlock::new(header.data_offset(), data_region)?;
            let new_head = data.delete(head, key.as_bytes())?;
            if new_head != head {
                index.set(key, new_head)?;
            }
            true
        }
    };
    if removed {
        header.set_modified_now();
        header.save(block)?;
    }
    Ok(())
}

fn snapshot(block: &[u8], hash: HashFn) -> Result<HashMap<String, Vec<u8>>> {
    let header = HeaderBlock::read(block)?;
    let (index_region, data_region) = carve(block, &header)?;

    let index = IndexBlock::new(index_region, hash)?;
    let data = DataBlock::new(header.data_offset(), data_region)?;

    let mut out = HashMap::new();
    for head in index.enumerate_non_empty() {
        data.collect_into(head, &mut out)?;
    }
    Ok(out)
}

fn read_stats(block: &[u8]) -> Result<StoreStats> {
    let header = HeaderBlock::read(block)?;
    let (_, data_region) = carve(block, &header)?;
    let data = DataBlock::new(header.data_offset(), data_region)?;

    Ok(StoreStats {
        live_bytes: data.header()?.live_bytes(),
        used_bytes: data.used_bytes()?,
        free_bytes: data.free_bytes()?,
        modified_time: header.modified_time(),
    })
}
